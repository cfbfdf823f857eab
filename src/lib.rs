pub mod config;
pub mod engine;
pub mod service;

pub use engine::{LedgerEngine, LedgerError, MutationOutcome};
pub use service::AccountService;
pub use tillbook_core::{
    models::{Account, LedgerTransaction, TransactionKind},
    money::{AmountLimits, Money, MoneyError},
    storage::{LedgerStore, StorageError},
};
