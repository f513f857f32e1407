//! Command-line arguments

use clap::Parser;
use std::path::PathBuf;

/// Record OPS24x radar speed samples to a SQLite database
#[derive(Parser, Debug)]
#[command(name = "ops24x-logger")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Record from a simulated module instead of the configured port
    #[arg(long)]
    pub simulate: bool,
}

impl Cli {
    /// Default log level for the verbosity count
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
