use std::{
    collections::HashMap,
    sync::RwLock,
};

use rust_decimal::Decimal;
use uuid::Uuid;

use tillbook_core::{
    models::{Account, LedgerTransaction},
    storage::{LedgerStore, StorageError},
};

/// In-memory store, primarily a test double for the durable backends.
///
/// All state sits behind one `RwLock`, so `apply_mutation` takes the write
/// lock once and the constraint check, the conditional balance write and the
/// row insert are a single atomic unit.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    email_index: HashMap<String, Uuid>,
    // Insertion order doubles as the newest-first ordering key.
    transactions: Vec<LedgerTransaction>,
    key_index: HashMap<String, usize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl LedgerStore for MemoryStore {
    fn create_account(&self, account: &Account) -> Result<(), StorageError> {
        let mut inner = self.inner.write().unwrap();
        if inner.email_index.contains_key(&account.email) {
            return Err(StorageError::DuplicateEmail);
        }
        inner.email_index.insert(account.email.clone(), account.id);
        inner.accounts.insert(account.id, account.clone());
        tracing::debug!(account = %account.id, "account created");
        Ok(())
    }

    fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StorageError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.accounts.get(&id).cloned())
    }

    fn account_by_email(&self, email: &str) -> Result<Option<Account>, StorageError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .email_index
            .get(email)
            .and_then(|id| inner.accounts.get(id))
            .cloned())
    }

    fn transaction_by_key(&self, key: &str) -> Result<Option<LedgerTransaction>, StorageError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .key_index
            .get(key)
            .map(|idx| inner.transactions[*idx].clone()))
    }

    fn transactions_for_account(&self, id: Uuid) -> Result<Vec<LedgerTransaction>, StorageError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.account_id == id)
            .cloned()
            .collect())
    }

    fn apply_mutation(
        &self,
        account_id: Uuid,
        expected_balance: Decimal,
        new_balance: Decimal,
        tx: &LedgerTransaction,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.write().unwrap();

        if inner.key_index.contains_key(&tx.idempotency_key) {
            return Err(StorageError::DuplicateIdempotencyKey);
        }

        let account = inner
            .accounts
            .get_mut(&account_id)
            .ok_or(StorageError::AccountNotFound(account_id))?;
        if account.balance != expected_balance {
            return Err(StorageError::BalanceConflict);
        }
        account.balance = new_balance;

        let idx = inner.transactions.len();
        inner.transactions.push(tx.clone());
        inner.key_index.insert(tx.idempotency_key.clone(), idx);
        tracing::debug!(account = %account_id, transaction = %tx.id, "mutation applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tillbook_core::models::TransactionKind;
    use time::OffsetDateTime;

    fn account(email: &str) -> Account {
        Account {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: "Test".to_string(),
            balance: Decimal::new(0, 2),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn transaction(account_id: Uuid, key: &str, amount: Decimal, after: Decimal) -> LedgerTransaction {
        LedgerTransaction {
            id: Uuid::new_v4(),
            account_id,
            kind: TransactionKind::Credit,
            amount,
            balance_after: after,
            idempotency_key: key.to_string(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn duplicate_email_rejected() {
        let store = MemoryStore::new();
        store.create_account(&account("a@example.com")).unwrap();
        let err = store.create_account(&account("a@example.com")).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateEmail));
    }

    #[test]
    fn lookup_by_email_and_id() {
        let store = MemoryStore::new();
        let acct = account("b@example.com");
        store.create_account(&acct).unwrap();
        assert_eq!(store.account_by_id(acct.id).unwrap().unwrap().id, acct.id);
        assert_eq!(
            store.account_by_email("b@example.com").unwrap().unwrap().id,
            acct.id
        );
        assert!(store.account_by_email("missing@example.com").unwrap().is_none());
    }

    #[test]
    fn duplicate_key_rejected_and_nothing_applied() {
        let store = MemoryStore::new();
        let acct = account("c@example.com");
        store.create_account(&acct).unwrap();

        let tx = transaction(acct.id, "k1", dec!(10.00), dec!(10.00));
        store
            .apply_mutation(acct.id, dec!(0.00), dec!(10.00), &tx)
            .unwrap();

        let tx2 = transaction(acct.id, "k1", dec!(10.00), dec!(20.00));
        let err = store
            .apply_mutation(acct.id, dec!(10.00), dec!(20.00), &tx2)
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateIdempotencyKey));

        // Balance untouched by the failed mutation
        let acct = store.account_by_id(acct.id).unwrap().unwrap();
        assert_eq!(acct.balance, dec!(10.00));
        assert_eq!(store.transactions_for_account(acct.id).unwrap().len(), 1);
    }

    #[test]
    fn stale_expected_balance_conflicts() {
        let store = MemoryStore::new();
        let acct = account("d@example.com");
        store.create_account(&acct).unwrap();

        let tx = transaction(acct.id, "k1", dec!(5.00), dec!(5.00));
        store
            .apply_mutation(acct.id, dec!(0.00), dec!(5.00), &tx)
            .unwrap();

        // Second writer still thinks the balance is 0.00
        let tx2 = transaction(acct.id, "k2", dec!(3.00), dec!(3.00));
        let err = store
            .apply_mutation(acct.id, dec!(0.00), dec!(3.00), &tx2)
            .unwrap_err();
        assert!(matches!(err, StorageError::BalanceConflict));
        assert!(store.transaction_by_key("k2").unwrap().is_none());
    }

    #[test]
    fn history_is_newest_first() {
        let store = MemoryStore::new();
        let acct = account("e@example.com");
        store.create_account(&acct).unwrap();

        store
            .apply_mutation(
                acct.id,
                dec!(0.00),
                dec!(1.00),
                &transaction(acct.id, "k1", dec!(1.00), dec!(1.00)),
            )
            .unwrap();
        store
            .apply_mutation(
                acct.id,
                dec!(1.00),
                dec!(3.00),
                &transaction(acct.id, "k2", dec!(2.00), dec!(3.00)),
            )
            .unwrap();

        let history = store.transactions_for_account(acct.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].idempotency_key, "k2");
        assert_eq!(history[1].idempotency_key, "k1");
    }
}
