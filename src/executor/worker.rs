//! Supervised worker process
//!
//! Each `Worker` owns one long-lived `parasuite worker` child. A reader task
//! forwards the child's `FINISHED` lines and the end of its stdout to the
//! scheduler's event channel, so readiness is observed without ever blocking
//! on a single worker. The tail of the child's stderr is kept for crash
//! reports.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::wrapper::{parse_finished, WorkerMessage};
use crate::error::RunnerError;
use crate::models::{Invocation, ResultDocument, ScratchDir, TestUnit};
use crate::output::Reporter;
use crate::results::{ResultAggregator, ResultReader};

/// Bytes of stderr kept per worker
const STDERR_TAIL: usize = 64 * 1024;

/// How long a crash report waits for the rest of stderr
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of a worker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
    Stopping,
    Stopped,
    Crashed,
}

/// Something a worker's stdout reported
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerSignal {
    /// The current unit is done; carries the test binary's exit code
    Finished(Option<i32>),
    /// Stdout reached end of file
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerEvent {
    pub token: usize,
    pub signal: WorkerSignal,
}

/// How to launch worker processes
#[derive(Clone, Debug)]
pub struct WorkerCommand {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// One supervised worker process
pub struct Worker {
    token: usize,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    state: WorkerState,
    unit: Option<TestUnit>,
    finished: Option<Option<i32>>,
    stdout_closed: bool,
    exit_code: Option<Option<i32>>,
}

impl Worker {
    /// Spawn a worker in its idle, message-listening mode
    pub fn start(
        token: usize,
        command: &WorkerCommand,
        events: UnboundedSender<WorkerEvent>,
    ) -> Result<Self, RunnerError> {
        let startup = |source: std::io::Error| RunnerError::Startup {
            token,
            command: shell_words::join(&command.argv),
            source,
        };

        let (program, args) = command
            .argv
            .split_first()
            .ok_or_else(|| startup(std::io::Error::other("empty worker command")))?;

        let mut child = Command::new(program)
            .args(args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(startup)?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| startup(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| startup(std::io::Error::other("stderr not captured")))?;

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_finished(&line) {
                    Some(code) => {
                        let signal = WorkerSignal::Finished(code);
                        if events.send(WorkerEvent { token, signal }).is_err() {
                            return;
                        }
                    }
                    None => trace!("worker {}: {}", token, line),
                }
            }
            let _ = events.send(WorkerEvent {
                token,
                signal: WorkerSignal::Closed,
            });
        });

        debug!("Started worker {} (pid {:?})", token, child.id());

        Ok(Self {
            token,
            child,
            stdin,
            stderr: Some(tokio::spawn(collect_tail(stderr))),
            state: WorkerState::Idle,
            unit: None,
            finished: None,
            stdout_closed: false,
            exit_code: None,
        })
    }

    pub fn token(&self) -> usize {
        self.token
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn has_unit(&self) -> bool {
        self.unit.is_some()
    }

    /// Record a signal observed on this worker's stdout
    pub fn on_signal(&mut self, signal: WorkerSignal) {
        match signal {
            WorkerSignal::Finished(code) if self.unit.is_some() => self.finished = Some(code),
            WorkerSignal::Finished(_) => debug!("Worker {} finished with no unit", self.token),
            WorkerSignal::Closed => self.stdout_closed = true,
        }
    }

    /// True when no unit is assigned or the assigned unit has completed
    pub fn is_free(&self) -> bool {
        self.unit.is_none() || self.finished.is_some()
    }

    /// True until the process has terminated
    pub fn is_running(&mut self) -> bool {
        if self.exit_code.is_some() {
            return false;
        }
        if !self.stdout_closed {
            return true;
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("Worker {} exited with {}", self.token, status);
                self.exit_code = Some(status.code());
                if self.state == WorkerState::Stopping {
                    self.state = WorkerState::Stopped;
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                debug!("Failed to poll worker {}: {}", self.token, e);
                self.exit_code = Some(None);
                false
            }
        }
    }

    /// Hand `unit` to this worker. The worker must be free and hold no unit.
    pub async fn assign(
        &mut self,
        mut unit: TestUnit,
        invocation: &Invocation,
        scratch: &ScratchDir,
    ) -> Result<(), RunnerError> {
        debug_assert!(self.unit.is_none(), "worker {} is busy", self.token);

        let argv = unit
            .command_args(invocation, scratch)
            .map_err(|source| RunnerError::Scratch {
                path: scratch.path().to_path_buf(),
                source,
            })?;

        debug!("Worker {} running {}", self.token, unit);
        self.unit = Some(unit);
        self.finished = None;
        self.state = WorkerState::Busy;

        if let Err(e) = self.send(&WorkerMessage::Run { argv }).await {
            debug!("Failed to write to worker {}: {}", self.token, e);
            return Err(self.crash_error().await);
        }
        Ok(())
    }

    async fn send(&mut self, message: &WorkerMessage) -> std::io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed"))?;
        stdin.write_all(message.to_line().as_bytes()).await?;
        stdin.flush().await
    }

    /// Parse the completed unit's result document and print its progress.
    ///
    /// Returns `None` when no unit is assigned. The result file is removed
    /// whether or not it could be parsed.
    pub fn print_feedback<W: Write>(
        &mut self,
        reader: &ResultReader,
        results: &mut ResultAggregator,
        reporter: &mut Reporter<W>,
        pad_shortfall: bool,
    ) -> Result<Option<ResultDocument>, RunnerError> {
        let Some(unit) = self.unit.as_mut() else {
            return Ok(None);
        };
        let Some(path) = unit.result_path().map(Path::to_path_buf) else {
            return Ok(None);
        };

        let parsed = reader.parse(&path);
        unit.discard_result();

        let document = parsed.map_err(|source| RunnerError::MalformedResult {
            unit: unit.to_string(),
            path,
            command: unit.last_command().unwrap_or_default().to_string(),
            exit_code: self.finished.flatten(),
            source,
        })?;

        let items = document.feedback();
        let padded = results.correct_overhead(items.len(), unit.expected_count(), pad_shortfall);
        reporter.print_feedback(&items, padded, results.expected_total())?;

        Ok(Some(document))
    }

    /// Coverage snapshot location of the current unit
    pub fn coverage_path(&self) -> Option<&Path> {
        self.unit.as_ref().and_then(TestUnit::coverage_path)
    }

    /// Release the completed unit and its scratch files
    pub fn reset(&mut self) {
        self.unit = None;
        self.finished = None;
        if self.state == WorkerState::Busy {
            self.state = WorkerState::Idle;
        }
    }

    /// Ask the worker to exit once its current unit is done
    pub async fn stop(&mut self) {
        if self.stdin.is_some() {
            if let Err(e) = self.send(&WorkerMessage::Exit).await {
                debug!("Failed to stop worker {}: {}", self.token, e);
            }
        }
        self.stdin = None;
        if matches!(self.state, WorkerState::Idle | WorkerState::Busy) {
            self.state = WorkerState::Stopping;
        }
        debug!("Stopping worker {}", self.token);
    }

    /// Build the crash report for a worker that died unexpectedly
    pub async fn crash_error(&mut self) -> RunnerError {
        self.state = WorkerState::Crashed;

        let exit_code = match self.exit_code {
            Some(code) => code,
            None => match self.child.try_wait() {
                Ok(Some(status)) => status.code(),
                _ => None,
            },
        };

        let stderr = match self.stderr.take() {
            Some(handle) => match timeout(STDERR_GRACE, handle).await {
                Ok(Ok(tail)) => tail,
                _ => String::new(),
            },
            None => String::new(),
        };

        let command = self
            .unit
            .take()
            .and_then(|unit| unit.last_command().map(str::to_string));

        RunnerError::WorkerCrashed {
            token: self.token,
            exit_code,
            command,
            stderr,
        }
    }
}

/// Read `stderr` to the end, keeping only the last `STDERR_TAIL` bytes
async fn collect_tail(mut stderr: ChildStderr) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > STDERR_TAIL {
                    let excess = tail.len() - STDERR_TAIL;
                    tail.drain(..excess);
                }
            }
        }
    }

    String::from_utf8_lossy(&tail).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn shell(script: &str) -> WorkerCommand {
        WorkerCommand::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_startup_error_for_missing_program() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let command = WorkerCommand::new(vec!["/nonexistent/parasuite".to_string()]);

        let error = Worker::start(4, &command, tx).err().unwrap();
        assert!(matches!(error, RunnerError::Startup { token: 4, .. }));
    }

    #[tokio::test]
    async fn test_finished_signal_and_clean_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let command = shell("read line; echo 'noise'; echo 'FINISHED 1'; read line").with_env("TEST_TOKEN", "1");
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::at(dir.path()).unwrap();

        let mut worker = Worker::start(1, &command, tx).unwrap();
        assert!(worker.is_free());
        assert!(worker.is_running());

        worker
            .assign(TestUnit::file("ATest.php"), &Invocation::new("phpunit"), &scratch)
            .await
            .unwrap();
        assert_eq!(worker.state(), WorkerState::Busy);
        assert!(!worker.is_free());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.signal, WorkerSignal::Finished(Some(1)));
        worker.on_signal(event.signal);
        assert!(worker.is_free());

        worker.reset();
        assert_eq!(worker.state(), WorkerState::Idle);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        worker.stop().await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.signal, WorkerSignal::Closed);
        worker.on_signal(event.signal);

        let mut exited = false;
        for _ in 0..100 {
            if !worker.is_running() {
                exited = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(exited);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    /// A worker that copies `source` to the unit's `--log-junit` path
    fn copying(source: &Path) -> WorkerCommand {
        shell(&format!(
            r#"read line; path=$(printf '%s' "$line" | sed 's/.*"--log-junit","\([^"]*\)".*/\1/'); cp '{}' "$path"; echo 'FINISHED 0'; read line"#,
            source.display()
        ))
    }

    fn seven_cases() -> String {
        let cases: String = (0..7)
            .map(|i| format!(r#"<testcase name="testValue with data set #{i}" class="ValueTest" file="/src/ValueTest.php" line="9" assertions="1" time="0.01"/>"#))
            .collect();
        format!(
            r#"<testsuites><testsuite name="ValueTest" file="/src/ValueTest.php" tests="7" assertions="7" errors="0" failures="0" skipped="0" time="0.07">{cases}</testsuite></testsuites>"#
        )
    }

    async fn finish(worker: &mut Worker, rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) {
        let event = rx.recv().await.unwrap();
        assert!(matches!(event.signal, WorkerSignal::Finished(_)));
        worker.on_signal(event.signal);
        assert!(worker.is_free());
    }

    #[tokio::test]
    async fn test_print_feedback_raises_expected_total_on_surplus() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("result.xml");
        std::fs::write(&source, seven_cases()).unwrap();
        let scratch = ScratchDir::at(dir.path().join("scratch")).unwrap();

        let mut results = ResultAggregator::new();
        let mut reporter = Reporter::new(Vec::new()).no_color();
        results.add_expected(5);

        let mut worker = Worker::start(1, &copying(&source), tx).unwrap();
        let unit = TestUnit::file("ValueTest.php").with_expected_count(5);
        worker
            .assign(unit, &Invocation::new("phpunit"), &scratch)
            .await
            .unwrap();
        finish(&mut worker, &mut rx).await;

        let document = worker
            .print_feedback(&ResultReader::default(), &mut results, &mut reporter, true)
            .unwrap()
            .unwrap();
        assert_eq!(document.case_count(), 7);
        assert_eq!(results.expected_total(), 7);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);

        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert!(text.starts_with("......."));
        assert!(text.trim_end().ends_with("7 / 7 (100%)"));

        worker.reset();
        worker.stop().await;
    }

    #[tokio::test]
    async fn test_print_feedback_without_result_document() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let command = shell("read line; echo 'FINISHED 1'; read line");
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::at(dir.path()).unwrap();

        let mut results = ResultAggregator::new();
        let mut reporter = Reporter::new(Vec::new()).no_color();

        let mut worker = Worker::start(3, &command, tx).unwrap();
        worker
            .assign(TestUnit::file("BrokenTest.php"), &Invocation::new("phpunit"), &scratch)
            .await
            .unwrap();
        finish(&mut worker, &mut rx).await;

        let error = worker
            .print_feedback(&ResultReader::default(), &mut results, &mut reporter, true)
            .unwrap_err();
        match &error {
            RunnerError::MalformedResult {
                unit,
                command,
                exit_code,
                ..
            } => {
                assert_eq!(unit, "BrokenTest.php");
                assert!(command.contains("--log-junit"));
                assert_eq!(*exit_code, Some(1));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(error.to_string().contains("unable to run \"BrokenTest.php\" (exit code 1)"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(results.totals().tests, 0);

        worker.stop().await;
    }

    #[tokio::test]
    async fn test_crash_error_carries_stderr_and_command() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let command = shell("read line; echo 'Segmentation fault' >&2; exit 139");
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::at(dir.path()).unwrap();

        let mut worker = Worker::start(2, &command, tx).unwrap();
        worker
            .assign(TestUnit::file("CrashTest.php"), &Invocation::new("phpunit"), &scratch)
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.signal, WorkerSignal::Closed);
        worker.on_signal(event.signal);

        while worker.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!worker.is_free());

        let error = worker.crash_error().await;
        assert_eq!(worker.state(), WorkerState::Crashed);
        match error {
            RunnerError::WorkerCrashed {
                token,
                exit_code,
                command,
                stderr,
            } => {
                assert_eq!(token, 2);
                assert_eq!(exit_code, Some(139));
                assert!(command.unwrap().ends_with("CrashTest.php"));
                assert!(stderr.contains("Segmentation fault"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
