use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Account, LedgerTransaction};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("email already exists")]
    DuplicateEmail,
    #[error("idempotency key already exists")]
    DuplicateIdempotencyKey,
    #[error("account balance changed concurrently")]
    BalanceConflict,
    #[error("account not found: {0}")]
    AccountNotFound(Uuid),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub trait LedgerStore: Send + Sync {
    /// Insert a new account row. `DuplicateEmail` on the email uniqueness
    /// constraint.
    fn create_account(&self, account: &Account) -> Result<(), StorageError>;

    fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StorageError>;
    fn account_by_email(&self, email: &str) -> Result<Option<Account>, StorageError>;

    fn transaction_by_key(&self, key: &str) -> Result<Option<LedgerTransaction>, StorageError>;

    /// Transactions for an account, newest first.
    fn transactions_for_account(&self, id: Uuid) -> Result<Vec<LedgerTransaction>, StorageError>;

    /// Atomically set the account balance and insert the transaction row.
    ///
    /// The balance write is conditional: it applies only while the stored
    /// balance still equals `expected_balance`, failing `BalanceConflict`
    /// otherwise. `DuplicateIdempotencyKey` is raised by the uniqueness
    /// constraint on the transaction's key, never pre-checked. On any
    /// failure, no partial effect is visible.
    fn apply_mutation(
        &self,
        account_id: Uuid,
        expected_balance: Decimal,
        new_balance: Decimal,
        tx: &LedgerTransaction,
    ) -> Result<(), StorageError>;
}
