use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::account::AccountId;

pub mod in_memory;

pub type TransferId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger storage failure: {0}")]
    Storage(String),
}

/// One completed transfer. Records are created by the engine on successful
/// completion and are never mutated or deleted afterwards; the struct exposes
/// read access only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    id: TransferId,
    sender: AccountId,
    receiver: AccountId,
    amount: Decimal,
    timestamp: DateTime<Utc>,
}

impl TransferRecord {
    pub(crate) fn new(
        id: TransferId,
        sender: AccountId,
        receiver: AccountId,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sender,
            receiver,
            amount,
            timestamp,
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn sender(&self) -> AccountId {
        self.sender
    }

    pub fn receiver(&self) -> AccountId {
        self.receiver
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Append-only audit trail of completed transfers.
///
/// The trait exposes no update or delete operation on purpose. It is also the
/// integration point for swapping the in-memory trail for durable storage;
/// the engine treats a failed [`append`](TransferLedger::append) as an abort
/// signal and rolls the balance mutations back.
pub trait TransferLedger {
    /// Durably writes one record, assigning the next creation-ordered id.
    fn append(
        &self,
        sender: AccountId,
        receiver: AccountId,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<TransferRecord, LedgerError>;

    /// Snapshot of all records in insertion order.
    fn list(&self) -> Vec<TransferRecord>;

    /// True if any record cites the account as sender or receiver.
    fn references(&self, account: AccountId) -> bool;
}
