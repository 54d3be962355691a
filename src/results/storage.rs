//! Run record storage
//!
//! Keeps one JSON record per finished run in a results directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{SuiteNode, Totals};

/// Persisted summary of one run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run ID
    pub id: String,

    /// Timestamp when the run started
    pub started_at: DateTime<Utc>,

    /// Timestamp when the run finished
    pub finished_at: DateTime<Utc>,

    /// Test binary that was run
    pub binary: String,

    /// Number of worker processes
    pub processes: usize,

    /// Seed used to shuffle units, if any
    pub seed: Option<u64>,

    /// Process exit code of the run
    pub exit_code: i32,

    /// Cumulative totals
    pub totals: Totals,

    /// One entry per test file
    pub suites: Vec<SuiteSummary>,

    /// Environment info
    pub environment: EnvironmentInfo,
}

/// Counts of one flattened suite
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub name: String,
    pub file: String,
    pub tests: u64,
    pub assertions: u64,
    pub failures: u64,
    pub errors: u64,
    pub warnings: u64,
    pub skipped: u64,
    pub time: f64,
}

impl From<&SuiteNode> for SuiteSummary {
    fn from(suite: &SuiteNode) -> Self {
        Self {
            name: suite.name.clone(),
            file: suite.file.clone(),
            tests: suite.tests,
            assertions: suite.assertions,
            failures: suite.failures,
            errors: suite.errors,
            warnings: suite.warnings,
            skipped: suite.skipped,
            time: suite.time,
        }
    }
}

/// Environment information
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Operating system
    pub os: String,

    /// Architecture
    pub arch: String,

    /// Tool version
    pub tool_version: String,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl RunRecord {
    /// Start a record for a run about to begin
    pub fn new(id: impl Into<String>, binary: impl Into<String>, processes: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            started_at: now,
            finished_at: now,
            binary: binary.into(),
            processes,
            seed: None,
            exit_code: 0,
            totals: Totals::default(),
            suites: Vec::new(),
            environment: EnvironmentInfo::default(),
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Fill in the outcome of the run
    pub fn finish(&mut self, exit_code: i32, totals: Totals, suites: &[SuiteNode]) {
        self.finished_at = Utc::now();
        self.exit_code = exit_code;
        self.totals = totals;
        self.suites = suites.iter().map(SuiteSummary::from).collect();
    }

    /// Wall-clock duration in seconds
    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Generate unique run ID
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

/// Results storage manager
pub struct ResultsStorage {
    /// Base directory for run records
    base_dir: PathBuf,
}

impl ResultsStorage {
    /// Create a new results storage
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Create with default directory
    pub fn default_dir() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parasuite")
            .join("runs");
        Self::new(base_dir)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{run_id}.json"))
    }

    /// Save a run record
    pub fn save(&self, run: &RunRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("Failed to create results directory {}", self.base_dir.display())
        })?;

        let path = self.run_path(&run.id);
        let file = File::create(&path).context("Failed to create run record")?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer_pretty(&mut writer, run).context("Failed to write run record")?;
        writer.flush().context("Failed to write run record")?;

        info!("Saved run record to {}", path.display());
        Ok(path)
    }

    /// Load a run record by ID
    pub fn load(&self, run_id: &str) -> Result<RunRecord> {
        let path = self.run_path(run_id);
        let run = self.load_from_path(&path)?;
        debug!("Loaded run record from {}", path.display());
        Ok(run)
    }

    /// Load from a specific path
    pub fn load_from_path(&self, path: &Path) -> Result<RunRecord> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open run record {}", path.display()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context("Failed to parse run record")
    }

    /// All stored runs, newest first. Unreadable records are skipped.
    pub fn list(&self) -> Result<Vec<RunRecord>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match self.load_from_path(&path) {
                    Ok(run) => runs.push(run),
                    Err(e) => {
                        debug!("Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    /// Most recent run, if any
    pub fn latest(&self) -> Result<Option<RunRecord>> {
        Ok(self.list()?.into_iter().next())
    }
}
