//! CLI argument definitions using clap
//!
//! Commands:
//! - promoter init --config <path>
//! - promoter serve --config <path> [--port <port>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Promoter - staging to production promotion engine
#[derive(Parser, Debug)]
#[command(name = "promoter")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default configuration file
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./promoter.json")]
        config: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Start the promotion API server
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./promoter.json")]
        config: PathBuf,

        /// Override the configured HTTP port
        #[arg(long)]
        port: Option<u16>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
