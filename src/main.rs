use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use diamond_bot::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli::execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}
