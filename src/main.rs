//! Convoy CLI: declarative infrastructure reconciliation.

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("CONVOY_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "convoy=debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = convoy::cli::Cli::parse();
    let verbose = cli.verbose;
    init_tracing(verbose);
    if let Err(e) = convoy::cli::dispatch(cli) {
        if verbose {
            eprintln!("error: {}", convoy::error::format_err_chain(&e));
        } else {
            eprintln!("error: {}", e);
        }
        std::process::exit(1);
    }
}
