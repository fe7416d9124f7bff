//! trackflow CLI
//!
//! Command-line interface for the trackflow engine.

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use trackflow::cli::commands::{self, RunOptions};
use trackflow::cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    debug!("trackflow v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            input,
            output,
            filters,
            set,
            chunk_size,
            config,
            dict_dump,
        } => commands::run(&RunOptions {
            input,
            output,
            filters,
            set,
            chunk_size,
            config,
            dict_dump,
        }),
        Commands::Filters => commands::list_filters(),
    }
}
