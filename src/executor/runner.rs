//! Run orchestration
//!
//! `Runner` orders the units, starts the pool, prints the summary and writes
//! the persisted outputs. The summary is printed even when the pool aborts,
//! so a fatal error still shows how far the run got.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, info};

use super::pool::{PoolOptions, RunState, WorkerPool};
use crate::config::{RunnerConfig, UnitOrder};
use crate::coverage::{probe_driver, CoverageAggregator};
use crate::error::RunnerError;
use crate::models::{ScratchDir, TestUnit, Totals};
use crate::output::{Reporter, RunHeader};
use crate::results::{generate_run_id, junit, ResultAggregator, ResultReader, ResultsStorage, RunRecord};
use crate::utils::timer::Timer;

/// What a finished run reports back
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub run_id: String,
    pub exit_code: i32,
    pub totals: Totals,
    pub seed: Option<u64>,
}

/// Drives one run from ordered units to persisted reports
pub struct Runner<W: Write> {
    config: RunnerConfig,
    state: RunState<W>,
    run_id: String,
}

impl<W: Write> Runner<W> {
    pub fn new(config: RunnerConfig, out: W) -> Self {
        let reporter = Reporter::new(out).with_colors(config.colors);
        Self {
            config,
            state: RunState::new(reporter),
            run_id: generate_run_id(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn results(&self) -> &ResultAggregator {
        &self.state.results
    }

    pub fn into_writer(self) -> W {
        self.state.reporter.into_inner()
    }

    /// Run `units` and write every configured report
    pub async fn run(&mut self, units: Vec<TestUnit>) -> Result<RunOutcome, RunnerError> {
        let timer = Timer::start("run");
        let (units, seed) = order_units(units, self.config.order, self.config.seed);
        let mut record = RunRecord::new(
            self.run_id.clone(),
            self.config.binary.display().to_string(),
            self.config.processes,
        )
        .with_seed(seed);

        info!(
            "Running {} unit(s) in {} process(es)",
            units.len(),
            self.config.processes
        );

        if self.config.coverage.enabled() {
            let available = match &self.config.coverage.driver_probe {
                Some(argv) => probe_driver(argv).await,
                None => true,
            };
            self.state.coverage = Some(
                CoverageAggregator::new(self.config.coverage.test_limit)
                    .with_driver_available(available),
            );
        }

        for unit in &units {
            self.state.results.add_expected(unit.expected_count());
        }

        self.state.reporter.start(&RunHeader {
            binary: self.config.binary.display().to_string(),
            processes: self.config.processes,
            functional: self.config.functional,
            configuration: self.config.configuration.clone(),
            seed,
        })?;

        let result = self.run_pool(units).await;

        self.state
            .reporter
            .print_results(&self.state.results, timer.elapsed())?;
        let exit_code = result?;

        self.complete(&mut record, exit_code)?;
        timer.stop();

        info!("Run {} finished with exit code {}", self.run_id, exit_code);
        Ok(RunOutcome {
            run_id: self.run_id.clone(),
            exit_code,
            totals: self.state.results.totals(),
            seed,
        })
    }

    async fn run_pool(&mut self, units: Vec<TestUnit>) -> Result<i32, RunnerError> {
        let scratch = match &self.config.tmp_dir {
            Some(dir) => ScratchDir::at(dir),
            None => ScratchDir::temporary(),
        }
        .map_err(|source| RunnerError::Scratch {
            path: self.config.tmp_dir.clone().unwrap_or_default(),
            source,
        })?;
        debug!("Scratch files in {}", scratch.path().display());

        let options = PoolOptions::new(self.config.processes, self.config.worker_argv())
            .with_stop_on_failure(self.config.stop_on_failure)
            .with_pad_shortfall(self.config.pad_shortfall())
            .with_token_env(self.config.token_env.clone())
            .with_run_id(self.run_id.clone());
        let reader = ResultReader::new(self.config.risky_types.iter().cloned());

        let mut pool =
            WorkerPool::new(options, self.config.invocation(), scratch).with_reader(reader);
        pool.enqueue(units);

        // Dropping the pool kills any worker still alive and removes scratch files
        pool.run(&mut self.state).await
    }

    /// Write the merged JUnit report, coverage outputs and the run record
    fn complete(&mut self, record: &mut RunRecord, exit_code: i32) -> Result<(), RunnerError> {
        let suites = self.state.results.flatten();

        if let Some(path) = &self.config.log_junit {
            junit::write_report(path, &suites).map_err(|source| report_error(path, source))?;
            info!("Wrote JUnit report to {}", path.display());
        }

        if let Some(coverage) = &self.state.coverage {
            if let Some(path) = &self.config.coverage.output {
                coverage
                    .write_json(path)
                    .map_err(|source| report_error(path, source))?;
                info!("Wrote coverage to {}", path.display());
            }
            if self.config.coverage.text {
                self.state.reporter.print_text(&coverage.text_report())?;
            }
        }

        if let Some(dir) = &self.config.results_dir {
            record.finish(exit_code, self.state.results.totals(), &suites);
            ResultsStorage::new(dir)
                .save(record)
                .map_err(|e| report_error(dir, io::Error::other(format!("{e:#}"))))?;
        }

        Ok(())
    }
}

fn report_error(path: &Path, source: io::Error) -> RunnerError {
    RunnerError::Report {
        path: path.to_path_buf(),
        source,
    }
}

/// Apply the dispatch order. Returns the seed actually used for random order.
pub fn order_units(
    mut units: Vec<TestUnit>,
    order: UnitOrder,
    seed: Option<u64>,
) -> (Vec<TestUnit>, Option<u64>) {
    match order {
        UnitOrder::Default => (units, None),
        UnitOrder::Reverse => {
            units.reverse();
            (units, None)
        }
        UnitOrder::Random => {
            let seed = seed.unwrap_or_else(rand::random);
            let mut rng = StdRng::seed_from_u64(seed);
            units.shuffle(&mut rng);
            (units, Some(seed))
        }
    }
}
