//! Orchestrator errors
//!
//! Everything here is fatal for the current run. Failing tests are not errors;
//! they are folded into the aggregate totals.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::coverage::CoverageError;
use crate::results::ReadError;

/// Exit code used when the run is aborted by an orchestrator error
pub const FATAL_EXIT: i32 = 255;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to start worker {token} with `{command}`")]
    Startup {
        token: usize,
        command: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "Worker {token} crashed{}\nThe process: {}\nCaptured stderr:\n{stderr}",
        .exit_code.map(|c| format!(" with exit code {c}")).unwrap_or_default(),
        .command.as_deref().unwrap_or("<no command assigned>")
    )]
    WorkerCrashed {
        token: usize,
        exit_code: Option<i32>,
        command: Option<String>,
        stderr: String,
    },

    #[error(
        "{source}\nThe process: {command}\nThis means the test binary was unable to run \"{unit}\"{}",
        .exit_code.map(|c| format!(" (exit code {c})")).unwrap_or_default()
    )]
    MalformedResult {
        unit: String,
        path: PathBuf,
        command: String,
        exit_code: Option<i32>,
        #[source]
        source: ReadError,
    },

    #[error(transparent)]
    Coverage(#[from] CoverageError),

    #[error("Failed to prepare scratch files in {}", .path.display())]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write output")]
    Output(#[from] io::Error),

    #[error("Failed to write report {}", .path.display())]
    Report {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RunnerError {
    pub fn exit_code(&self) -> i32 {
        FATAL_EXIT
    }
}
