use std::{str::FromStr, sync::Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use tillbook_core::{
    models::{Account, LedgerTransaction, TransactionKind},
    storage::{LedgerStore, StorageError},
};

/// Durable store on SQLite. The idempotency protocol leans on the unique
/// index over `transactions.idempotency_key`; the balance write in
/// `apply_mutation` is conditional on the observed balance, so two stale
/// writers cannot both commit.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                name TEXT NOT NULL,
                balance TEXT NOT NULL CHECK (CAST(balance AS NUMERIC) >= 0),
                created_at INTEGER NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_accounts_email
                ON accounts(email);

            CREATE TABLE IF NOT EXISTS transactions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                amount TEXT NOT NULL CHECK (CAST(amount AS NUMERIC) > 0),
                balance_after TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_key
                ON transactions(idempotency_key);

            CREATE INDEX IF NOT EXISTS idx_transactions_account_created
                ON transactions(account_id, created_at DESC);
            ",
        )
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

fn decimal_to_db(value: Decimal) -> String {
    let mut value = value;
    value.rescale(2);
    value.to_string()
}

fn decimal_from_db(raw: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(raw).map_err(|e| StorageError::Backend(format!("invalid decimal: {}", e)))
}

fn uuid_from_db(raw: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Backend(format!("invalid uuid: {}", e)))
}

fn timestamp_to_db(value: OffsetDateTime) -> i64 {
    value.unix_timestamp_nanos() as i64
}

fn timestamp_from_db(raw: i64) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::from_unix_timestamp_nanos(raw as i128)
        .map_err(|e| StorageError::Backend(format!("invalid timestamp: {}", e)))
}

fn kind_to_db(kind: TransactionKind) -> &'static str {
    match kind {
        TransactionKind::Credit => "credit",
        TransactionKind::Debit => "debit",
    }
}

fn kind_from_db(raw: &str) -> Result<TransactionKind, StorageError> {
    match raw {
        "credit" => Ok(TransactionKind::Credit),
        "debit" => Ok(TransactionKind::Debit),
        other => Err(StorageError::Backend(format!(
            "unknown transaction kind: {}",
            other
        ))),
    }
}

/// Map a rusqlite error, classifying the uniqueness violations the engine's
/// protocol depends on. Everything else stays an opaque backend error.
fn map_sqlite_err(e: rusqlite::Error) -> StorageError {
    if let rusqlite::Error::SqliteFailure(err, Some(msg)) = &e {
        if err.code == rusqlite::ErrorCode::ConstraintViolation {
            if msg.contains("accounts.email") {
                return StorageError::DuplicateEmail;
            }
            if msg.contains("transactions.idempotency_key") {
                return StorageError::DuplicateIdempotencyKey;
            }
        }
    }
    StorageError::Backend(e.to_string())
}

type AccountRow = (String, String, String, String, i64);
type TransactionRow = (String, String, String, String, String, String, i64);

fn account_from_row(row: AccountRow) -> Result<Account, StorageError> {
    Ok(Account {
        id: uuid_from_db(&row.0)?,
        email: row.1,
        name: row.2,
        balance: decimal_from_db(&row.3)?,
        created_at: timestamp_from_db(row.4)?,
    })
}

fn transaction_from_row(row: TransactionRow) -> Result<LedgerTransaction, StorageError> {
    Ok(LedgerTransaction {
        id: uuid_from_db(&row.0)?,
        account_id: uuid_from_db(&row.1)?,
        kind: kind_from_db(&row.2)?,
        amount: decimal_from_db(&row.3)?,
        balance_after: decimal_from_db(&row.4)?,
        idempotency_key: row.5,
        created_at: timestamp_from_db(row.6)?,
    })
}

const SELECT_ACCOUNT: &str = "SELECT id, email, name, balance, created_at FROM accounts";
const SELECT_TRANSACTION: &str =
    "SELECT id, account_id, kind, amount, balance_after, idempotency_key, created_at
     FROM transactions";

impl LedgerStore for SqliteStore {
    fn create_account(&self, account: &Account) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO accounts (id, email, name, balance, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                account.id.to_string(),
                account.email,
                account.name,
                decimal_to_db(account.balance),
                timestamp_to_db(account.created_at),
            ],
        )
        .map_err(map_sqlite_err)?;
        tracing::debug!(account = %account.id, "account created");
        Ok(())
    }

    fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<AccountRow> = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_ACCOUNT),
                params![id.to_string()],
                |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                },
            )
            .optional()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.map(account_from_row).transpose()
    }

    fn account_by_email(&self, email: &str) -> Result<Option<Account>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<AccountRow> = conn
            .query_row(
                &format!("{} WHERE email = ?1", SELECT_ACCOUNT),
                params![email],
                |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                },
            )
            .optional()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.map(account_from_row).transpose()
    }

    fn transaction_by_key(&self, key: &str) -> Result<Option<LedgerTransaction>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let row: Option<TransactionRow> = conn
            .query_row(
                &format!("{} WHERE idempotency_key = ?1", SELECT_TRANSACTION),
                params![key],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.map(transaction_from_row).transpose()
    }

    fn transactions_for_account(&self, id: Uuid) -> Result<Vec<LedgerTransaction>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE account_id = ?1 ORDER BY created_at DESC, seq DESC",
                SELECT_TRANSACTION
            ))
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let rows = stmt
            .query_map(params![id.to_string()], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut result = Vec::new();
        for row in rows {
            let row: TransactionRow = row.map_err(|e| StorageError::Backend(e.to_string()))?;
            result.push(transaction_from_row(row)?);
        }
        Ok(result)
    }

    fn apply_mutation(
        &self,
        account_id: Uuid,
        expected_balance: Decimal,
        new_balance: Decimal,
        tx: &LedgerTransaction,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().unwrap();
        let txn = conn
            .transaction()
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        // Conditional write: only applies while the stored balance still
        // matches what the engine read.
        let updated = txn
            .execute(
                "UPDATE accounts SET balance = ?1 WHERE id = ?2 AND balance = ?3",
                params![
                    decimal_to_db(new_balance),
                    account_id.to_string(),
                    decimal_to_db(expected_balance),
                ],
            )
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if updated == 0 {
            let exists: bool = txn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM accounts WHERE id = ?1",
                    params![account_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            // Dropping the transaction rolls back.
            return Err(if exists {
                StorageError::BalanceConflict
            } else {
                StorageError::AccountNotFound(account_id)
            });
        }

        txn.execute(
            "INSERT INTO transactions (id, account_id, kind, amount, balance_after, idempotency_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tx.id.to_string(),
                tx.account_id.to_string(),
                kind_to_db(tx.kind),
                decimal_to_db(tx.amount),
                decimal_to_db(tx.balance_after),
                tx.idempotency_key,
                timestamp_to_db(tx.created_at),
            ],
        )
        .map_err(map_sqlite_err)?;

        txn.commit()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        tracing::debug!(account = %account_id, transaction = %tx.id, "mutation applied");
        Ok(())
    }
}
