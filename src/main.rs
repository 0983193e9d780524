use std::process::ExitCode;

use clap::Parser;
use coffer::LedgerError;
use coffer::cli::Cli;
use coffer::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(&cli.settings.log, cli.settings.log_json) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<LedgerError>() {
                Some(ledger_err) => {
                    if ledger_err.is_retryable() {
                        tracing::error!(error = %format!("{:#}", err), "command failed");
                    }
                    eprintln!("Error: {}", ledger_err.public_message());
                }
                None => eprintln!("Error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}
