use futures::prelude::*;
use habr_tg::tracing_err;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    if dotenvy::dotenv().is_err() {
        eprintln!("Dotenv config was not found, ignoring this...")
    }

    let logging_task = habr_tg::init_logging();

    habr_tg::init_metrics();

    // Ctrl+C is handled by the bot dispatcher, which then lets the mailout
    // finish its current cycle
    let exit_code = AssertUnwindSafe(async {
        let config = habr_tg::Config::load_or_panic();

        habr_tg::run(config)
            .await
            .map(|()| ExitCode::SUCCESS)
            .unwrap_or_else(|err| {
                error!(err = tracing_err(&err), "Exiting with an error...");
                ExitCode::FAILURE
            })
    })
    .catch_unwind()
    .unwrap_or_else(|_| {
        error!("Exiting due to a panic...");
        ExitCode::FAILURE
    })
    .await;

    logging_task.shutdown().await;

    exit_code
}
