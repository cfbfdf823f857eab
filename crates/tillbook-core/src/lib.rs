pub mod models;
pub mod money;
pub mod storage;

pub use models::{Account, LedgerTransaction, TransactionKind};
pub use money::{AmountLimits, Money, MoneyError};
pub use storage::{LedgerStore, StorageError};
