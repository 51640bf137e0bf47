//! Porter CLI entry point.

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use porter::cli::Cli;

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Initialize tracing; the hook dispatcher layers its own per-event log
    // tee on top of this.
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("porter=info".parse()?))
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Execute command
    cli.execute()
}
