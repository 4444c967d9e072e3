//! Command Line Interface (CLI) arguments.

use std::path::PathBuf;

use clap::Parser;

/// Experiment metrics database command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// Path to a JSON or YAML request file to execute
    pub request_file: PathBuf,

    /// Database connection URL
    #[arg(
        long,
        default_value = "sqlite://exptdb.sqlite",
        env = "EXPTDB_DATABASE_URL"
    )]
    pub database_url: String,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
