//! Command line arguments

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::source::SourceMode;

/// Upload automation-service exports to S3
#[derive(Debug, Parser)]
#[command(name = "report-uploader", version)]
pub struct Cli {
    /// Defaults to `run`
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Resolve, transform and upload the configured CSV and JSON exports
    Run {
        /// Overrides `SOURCE_MODE`
        #[arg(long, value_enum)]
        mode: Option<SourceMode>,
    },
    /// Upload one local file to one key
    Upload {
        /// File to upload
        file: PathBuf,
        /// Destination key inside the bucket
        key: String,
    },
}

impl Cli {
    /// The command to execute
    #[must_use]
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run { mode: None })
    }
}

/// Exit code for a failed parse: usage errors exit 1, help and version exit 0
#[must_use]
pub fn parse_error_exit_code(error: &clap::Error) -> ExitCode {
    if error.use_stderr() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
