//! Worker side of the scheduler protocol
//!
//! A worker is a long-lived `parasuite worker` process. It reads one JSON
//! message per line on stdin, runs the requested command to completion and
//! answers `FINISHED <exit code>` on stdout. The wrapped command's stdout is
//! redirected to stderr so nothing else ever reaches the protocol channel.

use serde::{Deserialize, Serialize};
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Readiness line written after every run
pub const FINISHED: &str = "FINISHED";

/// Exit code reported when the command could not be run at all
const NOT_RUN: i32 = 255;

/// Messages sent from the scheduler to a worker
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Run { argv: Vec<String> },
    Exit,
}

impl WorkerMessage {
    /// Encode as a single protocol line
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"exit"}"#.to_string());
        line.push('\n');
        line
    }
}

/// Parse a `FINISHED <code>` line; the code is absent when it is not numeric
pub fn parse_finished(line: &str) -> Option<Option<i32>> {
    let rest = line.trim().strip_prefix(FINISHED)?;
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some(rest.trim().parse().ok())
}

/// Serve protocol messages until `exit` or end of input
pub async fn serve<R, W>(input: R, mut output: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let message: WorkerMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring unreadable message: {}", e);
                continue;
            }
        };

        match message {
            WorkerMessage::Exit => break,
            WorkerMessage::Run { argv } => {
                let code = run(&argv).await;
                output
                    .write_all(format!("{FINISHED} {code}\n").as_bytes())
                    .await?;
                output.flush().await?;
            }
        }
    }

    Ok(())
}

async fn run(argv: &[String]) -> i32 {
    let Some((program, args)) = argv.split_first() else {
        warn!("Received an empty command");
        return NOT_RUN;
    };

    debug!("Running {}", shell_words::join(argv));

    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(std::io::stderr()))
        .status()
        .await;

    match status {
        Ok(status) => status.code().unwrap_or(NOT_RUN),
        Err(e) => {
            warn!("Failed to run {}: {}", program, e);
            NOT_RUN
        }
    }
}
