use std::io::Write;

use chrono::{DateTime, Utc};
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{account::AccountId, ledger::TransferId};

#[derive(Debug, Serialize)]
pub struct AccountRow {
    pub id: AccountId,
    pub name: String,
    pub balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct TransferRow {
    pub id: TransferId,
    pub sender: AccountId,
    pub receiver: AccountId,
    pub amount: Decimal,
    pub timestamp: String,
}

/// Display formatting for the audit listing. The engine hands out raw UTC
/// instants; rendering them is this layer's job.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn print_report<W, T>(output: &mut W, rows: impl Iterator<Item = T>) -> anyhow::Result<()>
where
    W: Write,
    T: Serialize,
{
    let mut writer = Writer::from_writer(output);
    for row in rows {
        if let Err(err) = writer.serialize(row) {
            anyhow::bail!("Failed to write to CSV: {err}")
        }
    }
    // Ensure all data is flushed to the output
    if let Err(err) = writer.flush() {
        anyhow::bail!("Failed to flush CSV writer: {err}")
    }
    Ok(())
}
