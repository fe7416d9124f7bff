//! CLI Module
//!
//! Command-line interface for running filter chains.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// trackflow - run a file through a chain of filters
#[derive(Parser, Debug)]
#[command(name = "trackflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one track from input to output
    #[command(name = "run")]
    Run {
        /// Input file, or @stdin
        input: String,

        /// Output file, or @stdout (default)
        #[arg(short, long)]
        output: Option<String>,

        /// Filter inserted between input and output (repeatable)
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        /// Dictionary entry NAME=VALUE set before the track starts (repeatable)
        #[arg(short, long = "set")]
        set: Vec<String>,

        /// Read size of the input filter in bytes
        #[arg(long)]
        chunk_size: Option<usize>,

        /// JSON engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the track report and dictionary as JSON on stderr
        #[arg(long)]
        dict_dump: bool,
    },

    /// List the available filters
    #[command(name = "filters")]
    Filters,
}
