use std::fs::File;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use vault_ledger::bin_utils::{OperationError, Report, Service};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let filename = std::env::args()
        .nth(1)
        .context("Expected an operations file as the first argument")?;
    let report = match std::env::args().nth(2).as_deref() {
        None | Some("accounts") => Report::Accounts,
        Some("transfers") => Report::Transfers,
        Some(other) => anyhow::bail!("Unknown report `{other}`, expected `accounts` or `transfers`"),
    };
    let file = File::open(&filename).with_context(|| format!("Failed to open `{filename}`"))?;

    let service = Service {
        input: file,
        output: &mut std::io::stdout(),
        report,
        error_printer: Box::new(|line, err| match err {
            OperationError::MissingColumn(_) => eprintln!("Error at line {line}: {err}"),
            OperationError::Store(_) | OperationError::Transfer(_) => {
                // business rejections; the run keeps going
                eprintln!("Rejected at line {line}: {err}")
            }
        }),
    };
    service.run()
}
