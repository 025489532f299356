use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::account::AccountId;

use super::{LedgerError, TransferId, TransferLedger, TransferRecord};

/// Keeps the audit trail in a growing vector. Appends serialize on the
/// ledger's own mutex; readers get cloned snapshots.
#[derive(Default)]
pub struct InMemoryTransferLedger {
    records: Mutex<Vec<TransferRecord>>,
}

impl InMemoryTransferLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferLedger for InMemoryTransferLedger {
    fn append(
        &self,
        sender: AccountId,
        receiver: AccountId,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<TransferRecord, LedgerError> {
        let mut records = self.records.lock();
        let id = records.len() as TransferId + 1;
        let record = TransferRecord::new(id, sender, receiver, amount, timestamp);
        records.push(record.clone());
        Ok(record)
    }

    fn list(&self) -> Vec<TransferRecord> {
        self.records.lock().clone()
    }

    fn references(&self, account: AccountId) -> bool {
        self.records
            .lock()
            .iter()
            .any(|record| record.sender() == account || record.receiver() == account)
    }
}
