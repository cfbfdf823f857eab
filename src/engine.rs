use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use tillbook_core::{
    models::{LedgerTransaction, TransactionKind},
    money::{AmountLimits, Money, MoneyError},
    storage::{LedgerStore, StorageError},
};

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Retry budget for the balance compare-and-set under contention. The
/// idempotency key is not consumed by a failed attempt, so exhaustion is
/// safe to surface as a retryable error.
const MAX_COMMIT_ATTEMPTS: u32 = 8;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    InvalidAmount(#[from] MoneyError),
    #[error("email already exists")]
    DuplicateEmail,
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },
    #[error("transient storage failure, retry with the same idempotency key")]
    Storage,
}

/// Log the backend detail, surface a stable message. Driver errors never
/// reach callers (§7 of the design).
pub(crate) fn storage_failure(err: StorageError) -> LedgerError {
    tracing::error!(error = %err, "storage failure");
    LedgerError::Storage
}

/// Result of a credit or debit. `duplicate` means some earlier attempt under
/// the same idempotency key already applied; callers treat it as success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationOutcome {
    pub transaction_id: Uuid,
    pub amount: Decimal,
    pub new_balance: Decimal,
    pub duplicate: bool,
}

/// The ledger engine: check-then-commit with race recovery.
///
/// The early probe for the idempotency key is only an optimization; the
/// storage uniqueness constraint is the single source of truth for "did this
/// key already run". The engine holds no locks of its own.
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    limits: AmountLimits,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn LedgerStore>, limits: AmountLimits) -> Self {
        Self { store, limits }
    }

    pub fn credit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<MutationOutcome, LedgerError> {
        self.mutate(account_id, amount, idempotency_key, TransactionKind::Credit)
    }

    pub fn debit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<MutationOutcome, LedgerError> {
        self.mutate(account_id, amount, idempotency_key, TransactionKind::Debit)
    }

    fn mutate(
        &self,
        account_id: Uuid,
        amount: Decimal,
        idempotency_key: &str,
        kind: TransactionKind,
    ) -> Result<MutationOutcome, LedgerError> {
        // Validation fails before any storage access.
        if account_id.is_nil() {
            return Err(LedgerError::InvalidArgument(
                "account id must not be nil".to_string(),
            ));
        }
        validate_idempotency_key(idempotency_key)?;
        let amount = Money::from_decimal(amount, &self.limits)?;

        // Fast path for legitimate retries: the key already committed.
        if let Some(existing) = self
            .store
            .transaction_by_key(idempotency_key)
            .map_err(storage_failure)?
        {
            tracing::debug!(account = %account_id, key = idempotency_key, "duplicate request, returning original outcome");
            return self.duplicate_outcome(&existing);
        }

        for attempt in 0..MAX_COMMIT_ATTEMPTS {
            let account = self
                .store
                .account_by_id(account_id)
                .map_err(storage_failure)?
                .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

            // Solvency check against the freshly read balance.
            let new_balance = match kind {
                TransactionKind::Credit => account.balance + amount.value(),
                TransactionKind::Debit => {
                    if account.balance < amount.value() {
                        return Err(LedgerError::InsufficientFunds {
                            balance: account.balance,
                            requested: amount.value(),
                        });
                    }
                    account.balance - amount.value()
                }
            };

            // Second line of defense; unreachable if the check above holds.
            if new_balance < Decimal::ZERO {
                return Err(LedgerError::InsufficientFunds {
                    balance: account.balance,
                    requested: amount.value(),
                });
            }

            let tx = LedgerTransaction {
                id: Uuid::new_v4(),
                account_id,
                kind,
                amount: amount.value(),
                balance_after: new_balance,
                idempotency_key: idempotency_key.to_string(),
                created_at: OffsetDateTime::now_utc(),
            };

            match self
                .store
                .apply_mutation(account_id, account.balance, new_balance, &tx)
            {
                Ok(()) => {
                    tracing::debug!(
                        account = %account_id,
                        transaction = %tx.id,
                        key = idempotency_key,
                        kind = ?kind,
                        new_balance = %new_balance,
                        "mutation committed"
                    );
                    return Ok(MutationOutcome {
                        transaction_id: tx.id,
                        amount: tx.amount,
                        new_balance,
                        duplicate: false,
                    });
                }
                // Race recovery: a concurrent request with the same key
                // committed between the probe and here. Return its outcome.
                Err(StorageError::DuplicateIdempotencyKey) => {
                    tracing::debug!(account = %account_id, key = idempotency_key, "lost idempotency race, recovering");
                    let existing = self
                        .store
                        .transaction_by_key(idempotency_key)
                        .map_err(storage_failure)?
                        .ok_or(LedgerError::Storage)?;
                    return self.duplicate_outcome(&existing);
                }
                // A distinct request moved the balance under us. The key is
                // untouched; re-read and retry the commit.
                Err(StorageError::BalanceConflict) => {
                    tracing::debug!(account = %account_id, attempt, "balance changed concurrently, retrying");
                    continue;
                }
                Err(StorageError::AccountNotFound(_)) => {
                    return Err(LedgerError::AccountNotFound(account_id.to_string()));
                }
                Err(e) => return Err(storage_failure(e)),
            }
        }

        tracing::warn!(account = %account_id, key = idempotency_key, "commit retries exhausted");
        Err(LedgerError::Storage)
    }

    fn duplicate_outcome(
        &self,
        existing: &LedgerTransaction,
    ) -> Result<MutationOutcome, LedgerError> {
        let account = self
            .store
            .account_by_id(existing.account_id)
            .map_err(storage_failure)?
            .ok_or_else(|| LedgerError::AccountNotFound(existing.account_id.to_string()))?;
        Ok(MutationOutcome {
            transaction_id: existing.id,
            amount: existing.amount,
            new_balance: account.balance,
            duplicate: true,
        })
    }
}

fn validate_idempotency_key(key: &str) -> Result<(), LedgerError> {
    if key.is_empty() {
        return Err(LedgerError::InvalidArgument(
            "idempotency key must not be empty".to_string(),
        ));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(LedgerError::InvalidArgument(format!(
            "idempotency key exceeds {} bytes",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    Ok(())
}
