use std::sync::Arc;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use tillbook_core::{
    models::{Account, LedgerTransaction},
    money::AmountLimits,
    storage::{LedgerStore, StorageError},
};

use crate::engine::{storage_failure, LedgerEngine, LedgerError, MutationOutcome};

pub const MAX_NAME_LEN: usize = 100;

/// The public face of the ledger: open accounts, move money, read history.
pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    engine: LedgerEngine,
}

impl AccountService {
    pub fn new(store: Arc<dyn LedgerStore>, limits: AmountLimits) -> Self {
        Self {
            engine: LedgerEngine::new(store.clone(), limits),
            store,
        }
    }

    pub fn open_account(&self, email: &str, name: &str) -> Result<Account, LedgerError> {
        let email = normalize_email(email)?;
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(LedgerError::InvalidArgument(format!(
                "name must be 1 to {} characters",
                MAX_NAME_LEN
            )));
        }

        let account = Account {
            id: Uuid::new_v4(),
            email,
            name: name.to_string(),
            balance: Decimal::new(0, 2),
            created_at: OffsetDateTime::now_utc(),
        };

        match self.store.create_account(&account) {
            Ok(()) => {
                tracing::info!(account = %account.id, "account opened");
                Ok(account)
            }
            Err(StorageError::DuplicateEmail) => Err(LedgerError::DuplicateEmail),
            Err(e) => Err(storage_failure(e)),
        }
    }

    pub fn account(&self, id: Uuid) -> Result<Account, LedgerError> {
        self.store
            .account_by_id(id)
            .map_err(storage_failure)?
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))
    }

    pub fn account_by_email(&self, email: &str) -> Result<Account, LedgerError> {
        let email = normalize_email(email)?;
        self.store
            .account_by_email(&email)
            .map_err(storage_failure)?
            .ok_or(LedgerError::AccountNotFound(email))
    }

    pub fn credit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<MutationOutcome, LedgerError> {
        self.engine.credit(account_id, amount, idempotency_key)
    }

    pub fn debit(
        &self,
        account_id: Uuid,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<MutationOutcome, LedgerError> {
        self.engine.debit(account_id, amount, idempotency_key)
    }

    /// Newest-first transaction history. Fails for an absent account rather
    /// than returning an empty list.
    pub fn history(&self, account_id: Uuid) -> Result<Vec<LedgerTransaction>, LedgerError> {
        self.account(account_id)?;
        self.store
            .transactions_for_account(account_id)
            .map_err(storage_failure)
    }
}

/// Trim, lowercase, and require one `@` with non-empty local and domain
/// parts. Anything deeper is the caller's problem.
fn normalize_email(raw: &str) -> Result<String, LedgerError> {
    let email = raw.trim().to_ascii_lowercase();
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            Ok(email)
        }
        _ => Err(LedgerError::InvalidArgument("invalid email".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tillbook_memory::MemoryStore;

    fn service() -> AccountService {
        AccountService::new(Arc::new(MemoryStore::new()), AmountLimits::default())
    }

    #[test]
    fn open_account_normalizes_email_and_starts_at_zero() {
        let service = service();
        let account = service.open_account("  Alice@Example.COM ", "Alice").unwrap();
        assert_eq!(account.email, "alice@example.com");
        assert_eq!(account.balance, dec!(0.00));
        assert_eq!(account.balance.to_string(), "0.00");
    }

    #[test]
    fn duplicate_email_detected_after_normalization() {
        let service = service();
        service.open_account("alice@example.com", "Alice").unwrap();
        let err = service.open_account("ALICE@example.com", "Other").unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateEmail));
    }

    #[test]
    fn rejects_bad_email_shapes() {
        let service = service();
        for email in ["", "no-at-sign", "@nodomain", "nolocal@", "a@b@c"] {
            let err = service.open_account(email, "Name").unwrap_err();
            assert!(matches!(err, LedgerError::InvalidArgument(_)), "{email}");
        }
    }

    #[test]
    fn rejects_bad_names() {
        let service = service();
        assert!(service.open_account("a@example.com", "   ").is_err());
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(service.open_account("b@example.com", &long).is_err());
        let exact = "x".repeat(MAX_NAME_LEN);
        assert!(service.open_account("c@example.com", &exact).is_ok());
    }

    #[test]
    fn lookup_by_email_uses_normalized_form() {
        let service = service();
        let opened = service.open_account("dave@example.com", "Dave").unwrap();
        let found = service.account_by_email(" DAVE@example.com").unwrap();
        assert_eq!(found.id, opened.id);
    }

    #[test]
    fn history_of_missing_account_fails() {
        let service = service();
        let err = service.history(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }
}
