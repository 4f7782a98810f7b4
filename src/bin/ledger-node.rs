//! Process entry point: parses CLI arguments, initializes structured logging,
//! and dispatches to the typed command handlers in `ledger_node::cli`.

use clap::Parser;
use ledger_node::cli::{self, Cli};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    if let Err(err) = cli::run(cli) {
        tracing::error!(%err, "ledger-node exited with an error");
        std::process::exit(1);
    }
}
