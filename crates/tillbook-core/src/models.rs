use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use time::OffsetDateTime;
use uuid::Uuid;

/// Serialize a timestamp as its human-readable UTC form.
fn serialize_timestamp<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// An account row. `balance` is the single mutable cell in the model;
/// everything else is written once at creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub balance: Decimal,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
}

/// A committed ledger transaction. Rows are append-only; `balance_after`
/// snapshots the account balance at write time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub idempotency_key: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: OffsetDateTime,
}
