//! Demonstration CLI entry point for the `forgec` driver (NEW §2a).
//!
//! Wires up `tracing-subscriber` (when the `tracing-init` feature is
//! enabled) and hands argv to [`forgec::cli`]. Buildfile parsing proper
//! remains a collaborator; this binary only exercises the driver's
//! contract end to end.

use clap::Parser;
use forgec::cli::Cli;

fn main() {
    #[cfg(feature = "tracing-init")]
    {
        use tracing_subscriber::EnvFilter;
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_env("FORGEC_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
            .init();
    }

    let cli = Cli::parse();
    match forgec::cli::run(&cli) {
        Ok(snapshot) => {
            tracing::debug!(?snapshot, "run complete");
        }
        Err(err) => {
            eprintln!("forgec: {err}");
            std::process::exit(1);
        }
    }
}
