//! Glue for driving the engine from an operations file. This could live in a
//! crate of its own next to the binary, but keeping it here lets the
//! integration tests run the whole pipeline.

use std::io::{Read, Write};

use anyhow::Result;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    engine::{TransferEngine, TransferError},
    ledger::in_memory::InMemoryTransferLedger,
    store::{AccountRef, AccountUpdate, StoreError},
};
use csv_parser::{CsvOperationParser, Operation, OperationKind};
use csv_printer::{AccountRow, TransferRow, format_timestamp, print_report};

pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Column `{0}` is required for this operation")]
    MissingColumn(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Which report is written once all operations have run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Accounts,
    Transfers,
}

pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub report: Report,
    pub error_printer: Box<dyn FnMut(u64, OperationError)>,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let parser = CsvOperationParser::new(self.input);

        let engine = TransferEngine::new(InMemoryTransferLedger::new());

        for (line, operation) in parser {
            if let Err(err) = apply(&engine, operation) {
                (self.error_printer)(line, err);
            }
        }

        match self.report {
            Report::Accounts => print_report(
                self.output,
                engine.accounts().into_iter().map(|acc| AccountRow {
                    id: acc.id(),
                    name: acc.name().to_string(),
                    balance: acc.balance(),
                }),
            ),
            Report::Transfers => print_report(
                self.output,
                engine.transfers().into_iter().map(|record| TransferRow {
                    id: record.id(),
                    sender: record.sender(),
                    receiver: record.receiver(),
                    amount: record.amount(),
                    timestamp: format_timestamp(record.timestamp()),
                }),
            ),
        }
    }
}

fn apply(
    engine: &TransferEngine<InMemoryTransferLedger>,
    operation: Operation,
) -> Result<(), OperationError> {
    match operation.op {
        OperationKind::Create => {
            let name = operation.name.ok_or(OperationError::MissingColumn("name"))?;
            // a blank balance column means an empty opening balance
            let balance = operation.balance.unwrap_or(Decimal::ZERO);
            engine.create_account(&name, balance)?;
        }
        OperationKind::Update => {
            let name = operation.name.ok_or(OperationError::MissingColumn("name"))?;
            let account = engine.account(&AccountRef::Name(name))?;
            engine.update_account(
                account.id(),
                AccountUpdate {
                    name: None,
                    balance: operation.balance,
                },
            )?;
        }
        OperationKind::Delete => {
            let name = operation.name.ok_or(OperationError::MissingColumn("name"))?;
            let account = engine.account(&AccountRef::Name(name))?;
            engine.delete_account(account.id())?;
        }
        OperationKind::Transfer => {
            let from = operation.from.ok_or(OperationError::MissingColumn("from"))?;
            let to = operation.to.ok_or(OperationError::MissingColumn("to"))?;
            let amount = operation
                .amount
                .ok_or(OperationError::MissingColumn("amount"))?;
            engine.transfer(&AccountRef::Name(from), &AccountRef::Name(to), amount)?;
        }
    }
    Ok(())
}
