//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{RunnerConfig, UnitOrder};

/// Run an external test suite across parallel worker processes
#[derive(Parser, Debug)]
#[command(name = "parasuite")]
#[command(version)]
#[command(about = "Run a test suite in parallel worker processes and merge the results")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: ./parasuite.yaml and friends)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the test suite
    Run(RunArgs),

    /// List the units a run would dispatch
    List(ListArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// View stored run records
    Results(ResultsArgs),

    /// Serve run requests from stdin (used by the orchestrator)
    #[command(hide = true)]
    Worker,
}

/// Arguments for run command
#[derive(ClapArgs, Debug, Default)]
pub struct RunArgs {
    /// Test directories or files
    pub paths: Vec<PathBuf>,

    /// Number of worker processes
    #[arg(short, long)]
    pub processes: Option<usize>,

    /// Test binary
    #[arg(long)]
    pub binary: Option<PathBuf>,

    /// Configuration file handed to the test binary
    #[arg(long)]
    pub configuration: Option<PathBuf>,

    /// Run a named suite of the test binary's configuration (repeatable)
    #[arg(long = "testsuite")]
    pub suites: Vec<String>,

    /// Stop dispatching once a unit fails
    #[arg(long)]
    pub stop_on_failure: bool,

    /// One unit per test method
    #[arg(long)]
    pub functional: bool,

    /// Only run tests from these groups (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub group: Vec<String>,

    /// Skip tests from these groups (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude_group: Vec<String>,

    /// Dispatch order
    #[arg(long, value_enum)]
    pub order: Option<UnitOrder>,

    /// Seed for random order
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory for scratch files
    #[arg(long)]
    pub tmp_dir: Option<PathBuf>,

    /// Write the merged JUnit report here
    #[arg(long)]
    pub log_junit: Option<PathBuf>,

    /// Write the merged coverage snapshot here
    #[arg(long)]
    pub coverage_json: Option<PathBuf>,

    /// Print a covered-line summary
    #[arg(long)]
    pub coverage_text: bool,

    /// Tests kept per covered line (0 = all)
    #[arg(long)]
    pub coverage_test_limit: Option<usize>,

    /// Store a run record in this directory
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_colors: bool,

    /// Arguments passed to the test binary before its options
    #[arg(last = true)]
    pub passthrough: Vec<String>,
}

impl RunArgs {
    /// Override the settings given on the command line
    pub fn apply_to(&self, config: &mut RunnerConfig) {
        if !self.paths.is_empty() {
            config.paths = self.paths.clone();
        }
        if let Some(processes) = self.processes {
            config.processes = processes;
        }
        if let Some(binary) = &self.binary {
            config.binary = binary.clone();
        }
        if let Some(configuration) = &self.configuration {
            config.configuration = Some(configuration.clone());
        }
        if !self.suites.is_empty() {
            config.suites = self.suites.clone();
        }
        if self.stop_on_failure {
            config.stop_on_failure = true;
        }
        if self.functional {
            config.functional = true;
        }
        if !self.group.is_empty() {
            config.groups = self.group.clone();
        }
        if !self.exclude_group.is_empty() {
            config.exclude_groups = self.exclude_group.clone();
        }
        if let Some(order) = self.order {
            config.order = order;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
            // A seed only means something for random order
            if self.order.is_none() {
                config.order = UnitOrder::Random;
            }
        }
        if let Some(tmp_dir) = &self.tmp_dir {
            config.tmp_dir = Some(tmp_dir.clone());
        }
        if let Some(log_junit) = &self.log_junit {
            config.log_junit = Some(log_junit.clone());
        }
        if let Some(output) = &self.coverage_json {
            config.coverage.output = Some(output.clone());
        }
        if self.coverage_text {
            config.coverage.text = true;
        }
        if let Some(limit) = self.coverage_test_limit {
            config.coverage.test_limit = limit;
        }
        if let Some(dir) = &self.results_dir {
            config.results_dir = Some(dir.clone());
        }
        if self.no_colors {
            config.colors = false;
        }
        if !self.passthrough.is_empty() {
            config.passthrough = self.passthrough.clone();
        }
    }
}

/// Arguments for list command
#[derive(ClapArgs, Debug)]
pub struct ListArgs {
    /// Test directories or files
    pub paths: Vec<PathBuf>,

    /// Show expected result counts
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for config command
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "parasuite.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Show environment variables instead
        #[arg(long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate (default: the discovered one)
        file: Option<PathBuf>,
    },
}

/// Arguments for results command
#[derive(ClapArgs, Debug)]
pub struct ResultsArgs {
    /// Show only the newest run
    #[arg(short, long)]
    pub latest: bool,

    /// Run records directory (default: the user data directory)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}
