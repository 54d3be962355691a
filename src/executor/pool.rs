//! Worker pool scheduler
//!
//! A single control loop owns the pending queue and every worker. Each pass
//! waits briefly for worker events, then checks every active worker: crashed
//! workers abort the run, free workers are flushed and handed the next unit.
//! Once the queue is empty all workers are asked to stop and the pool drains
//! until none is left.

use std::collections::VecDeque;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tracing::debug;

use super::worker::{Worker, WorkerCommand, WorkerEvent};
use crate::coverage::CoverageAggregator;
use crate::error::RunnerError;
use crate::models::{Invocation, ScratchDir, TestUnit, Tier};
use crate::output::Reporter;
use crate::results::{ResultAggregator, ResultReader};

/// Upper bound on a single wait for worker events
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Scheduling settings
#[derive(Clone, Debug)]
pub struct PoolOptions {
    pub processes: usize,
    pub stop_on_failure: bool,
    pub pad_shortfall: bool,
    pub worker_command: Vec<String>,
    pub token_env: String,
    pub run_id: String,
}

impl PoolOptions {
    pub fn new(processes: usize, worker_command: Vec<String>) -> Self {
        Self {
            processes,
            stop_on_failure: false,
            pad_shortfall: false,
            worker_command,
            token_env: "TEST_TOKEN".to_string(),
            run_id: String::new(),
        }
    }

    pub fn with_stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    pub fn with_pad_shortfall(mut self, pad: bool) -> Self {
        self.pad_shortfall = pad;
        self
    }

    pub fn with_token_env(mut self, name: impl Into<String>) -> Self {
        self.token_env = name.into();
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    fn command_for(&self, token: usize) -> WorkerCommand {
        WorkerCommand::new(self.worker_command.clone())
            .with_env(self.token_env.clone(), token.to_string())
            .with_env("UNIQUE_TEST_TOKEN", format!("{}_{}", token, self.run_id))
    }
}

/// Everything a completed unit is folded into
pub struct RunState<W: Write> {
    pub results: ResultAggregator,
    pub coverage: Option<CoverageAggregator>,
    pub reporter: Reporter<W>,
}

impl<W: Write> RunState<W> {
    pub fn new(reporter: Reporter<W>) -> Self {
        Self {
            results: ResultAggregator::new(),
            coverage: None,
            reporter,
        }
    }
}

/// Fixed-size pool of workers fed from a queue of units
pub struct WorkerPool {
    options: PoolOptions,
    invocation: Invocation,
    scratch: ScratchDir,
    reader: ResultReader,
    pending: VecDeque<TestUnit>,
    workers: Vec<Worker>,
    events_tx: UnboundedSender<WorkerEvent>,
    events_rx: UnboundedReceiver<WorkerEvent>,
    exit_tier: Option<Tier>,
}

impl WorkerPool {
    pub fn new(options: PoolOptions, invocation: Invocation, scratch: ScratchDir) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            options,
            invocation,
            scratch,
            reader: ResultReader::default(),
            pending: VecDeque::new(),
            workers: Vec::new(),
            events_tx,
            events_rx,
            exit_tier: None,
        }
    }

    pub fn with_reader(mut self, reader: ResultReader) -> Self {
        self.reader = reader;
        self
    }

    /// Queue units in the order they should be dispatched
    pub fn enqueue(&mut self, units: impl IntoIterator<Item = TestUnit>) {
        self.pending.extend(units);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Worst tier absorbed so far, if any unit completed
    pub fn exit_tier(&self) -> Option<Tier> {
        self.exit_tier
    }

    /// Run every queued unit and return the aggregate exit code
    pub async fn run<W: Write>(&mut self, state: &mut RunState<W>) -> Result<i32, RunnerError> {
        self.start_workers()?;

        while !self.pending.is_empty() && !self.workers.is_empty() {
            self.poll().await;

            for index in 0..self.workers.len() {
                if !self.workers[index].is_running() {
                    return Err(self.workers[index].crash_error().await);
                }
                if !self.workers[index].is_free() {
                    continue;
                }

                self.flush(index, state)?;

                if self.options.stop_on_failure && self.exit_tier > Some(Tier::Success) {
                    if !self.pending.is_empty() {
                        debug!(
                            "Stopping on failure, {} unit(s) not dispatched",
                            self.pending.len()
                        );
                    }
                    self.pending.clear();
                }

                if let Some(unit) = self.pending.pop_front() {
                    self.workers[index]
                        .assign(unit, &self.invocation, &self.scratch)
                        .await?;
                }
            }
        }

        for worker in &mut self.workers {
            worker.stop().await;
        }

        while !self.workers.is_empty() {
            self.poll().await;

            let mut index = 0;
            while index < self.workers.len() {
                let running = self.workers[index].is_running();
                if !running && !self.workers[index].is_free() {
                    return Err(self.workers[index].crash_error().await);
                }
                if self.workers[index].is_free() {
                    self.flush(index, state)?;
                }

                if running {
                    index += 1;
                } else {
                    let worker = self.workers.remove(index);
                    debug!("Worker {} stopped", worker.token());
                }
            }
        }

        Ok(exit_code(self.exit_tier))
    }

    fn start_workers(&mut self) -> Result<(), RunnerError> {
        for token in 1..=self.options.processes {
            let command = self.options.command_for(token);
            let worker = Worker::start(token, &command, self.events_tx.clone())?;
            self.workers.push(worker);
        }
        Ok(())
    }

    /// Wait up to one poll interval for an event, then take everything queued
    async fn poll(&mut self) {
        if let Ok(Some(event)) = timeout(POLL_INTERVAL, self.events_rx.recv()).await {
            self.dispatch(event);
        }
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: WorkerEvent) {
        if let Some(worker) = self.workers.iter_mut().find(|w| w.token() == event.token) {
            worker.on_signal(event.signal);
        }
    }

    /// Absorb the completed unit of a free worker, if it has one
    fn flush<W: Write>(&mut self, index: usize, state: &mut RunState<W>) -> Result<(), RunnerError> {
        let worker = &mut self.workers[index];
        let Some(document) = worker.print_feedback(
            &self.reader,
            &mut state.results,
            &mut state.reporter,
            self.options.pad_shortfall,
        )?
        else {
            worker.reset();
            return Ok(());
        };

        let tier = document.tier();
        state.results.absorb(document);

        if let Some(coverage) = state.coverage.as_mut() {
            if let Some(path) = worker.coverage_path() {
                coverage.absorb_file(path)?;
            }
        }

        debug!("Worker {} completed a unit ({:?})", worker.token(), tier);
        worker.reset();
        self.exit_tier = raise(self.exit_tier, tier);
        Ok(())
    }
}

/// Errors outrank failures outrank success, whatever the arrival order
fn raise(current: Option<Tier>, tier: Tier) -> Option<Tier> {
    current.max(Some(tier))
}

/// A run that completed no unit succeeds
fn exit_code(tier: Option<Tier>) -> i32 {
    tier.unwrap_or(Tier::Success).exit_code()
}
