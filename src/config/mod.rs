//! Configuration module
//!
//! `RunnerConfig` holds every setting of a run. It is layered from built-in
//! defaults, the configuration file, `PARASUITE_*` environment variables and
//! finally command line flags.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::{validate_runner, ConfigFile};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::{FrameworkOption, Invocation};
use crate::results::DEFAULT_RISKY_TYPES;

/// Order in which units are dispatched
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UnitOrder {
    #[default]
    Default,
    Reverse,
    Random,
}

/// An explicitly listed unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Test file
    pub path: PathBuf,

    /// Methods to run; all of them when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,

    /// Results the unit is known to produce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<usize>,
}

/// Coverage collection settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Flag that makes the test binary write a coverage snapshot
    pub flag: String,

    /// Contributors kept per covered line (0 = unlimited)
    pub test_limit: usize,

    /// Where to write the merged snapshot
    pub output: Option<PathBuf>,

    /// Print a covered-line summary after the results
    pub text: bool,

    /// Command that exits cleanly when a coverage driver is available
    pub driver_probe: Option<Vec<String>>,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            flag: "--coverage-json".to_string(),
            test_limit: 0,
            output: None,
            text: false,
            driver_probe: None,
        }
    }
}

impl CoverageConfig {
    /// Coverage is collected when any coverage output is requested
    pub fn enabled(&self) -> bool {
        self.output.is_some() || self.text
    }
}

/// Settings of one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of worker processes
    pub processes: usize,

    /// Test binary
    pub binary: PathBuf,

    /// Configuration file handed to the test binary
    pub configuration: Option<PathBuf>,

    /// Arguments placed right after the binary
    pub passthrough: Vec<String>,

    /// Extra `--name [value]` options
    pub options: Vec<FrameworkOption>,

    /// Flag that makes the test binary write its JUnit document
    pub result_flag: String,

    /// Directories or files searched for tests
    pub paths: Vec<PathBuf>,

    /// File name suffix of test files
    pub suffix: String,

    /// Explicit units, run in addition to discovered files
    pub units: Vec<UnitSpec>,

    /// Named suites of the test binary's configuration
    pub suites: Vec<String>,

    /// One unit per test method
    pub functional: bool,

    /// Only run these groups
    pub groups: Vec<String>,

    /// Skip these groups
    pub exclude_groups: Vec<String>,

    /// Stop dispatching once a unit fails
    pub stop_on_failure: bool,

    /// Dispatch order
    pub order: UnitOrder,

    /// Seed for random order
    pub seed: Option<u64>,

    /// Directory for scratch files; a private temporary directory when unset
    pub tmp_dir: Option<PathBuf>,

    /// Merged JUnit report
    pub log_junit: Option<PathBuf>,

    /// Directory for run records
    pub results_dir: Option<PathBuf>,

    /// Coverage settings
    pub coverage: CoverageConfig,

    /// Worker process command; this executable's `worker` subcommand by default
    pub worker_command: Option<Vec<String>>,

    /// Environment variable carrying the worker token
    pub token_env: String,

    /// Error types reclassified as risky
    pub risky_types: Vec<String>,

    /// Colored output
    pub colors: bool,

    /// Log level
    pub log_level: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            processes: default_processes(),
            binary: PathBuf::from("vendor/bin/phpunit"),
            configuration: None,
            passthrough: Vec::new(),
            options: Vec::new(),
            result_flag: "--log-junit".to_string(),
            paths: vec![PathBuf::from("tests")],
            suffix: "Test.php".to_string(),
            units: Vec::new(),
            suites: Vec::new(),
            functional: false,
            groups: Vec::new(),
            exclude_groups: Vec::new(),
            stop_on_failure: false,
            order: UnitOrder::Default,
            seed: None,
            tmp_dir: None,
            log_junit: None,
            results_dir: None,
            coverage: CoverageConfig::default(),
            worker_command: None,
            token_env: "TEST_TOKEN".to_string(),
            risky_types: DEFAULT_RISKY_TYPES.iter().map(|t| t.to_string()).collect(),
            colors: true,
            log_level: "info".to_string(),
        }
    }
}

fn default_processes() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

impl RunnerConfig {
    /// Pad shortfalls with skips unless group filters may legitimately drop tests
    pub fn pad_shortfall(&self) -> bool {
        self.functional || (self.groups.is_empty() && self.exclude_groups.is_empty())
    }

    /// The command line shared by every unit
    pub fn invocation(&self) -> Invocation {
        let mut options = self.options.clone();
        if let Some(configuration) = &self.configuration {
            if self.suites.is_empty() {
                options.push(FrameworkOption::with_value(
                    "configuration",
                    configuration.display().to_string(),
                ));
            }
        }
        if !self.groups.is_empty() {
            options.push(FrameworkOption::with_value("group", self.groups.join(",")));
        }
        if !self.exclude_groups.is_empty() {
            options.push(FrameworkOption::with_value(
                "exclude-group",
                self.exclude_groups.join(","),
            ));
        }

        let invocation = Invocation::new(&self.binary)
            .with_passthrough(self.passthrough.clone())
            .with_options(options)
            .with_result_flag(self.result_flag.clone());

        if self.coverage.enabled() {
            invocation.with_coverage_flag(self.coverage.flag.clone())
        } else {
            invocation
        }
    }

    /// Worker process command line
    pub fn worker_argv(&self) -> Vec<String> {
        if let Some(command) = &self.worker_command {
            return command.clone();
        }
        let program = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "parasuite".to_string());
        vec![program, "worker".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert!(config.processes >= 1);
        assert_eq!(config.result_flag, "--log-junit");
        assert_eq!(config.token_env, "TEST_TOKEN");
        assert!(!config.coverage.enabled());
        assert!(config.pad_shortfall());
    }

    #[test]
    fn test_invocation_options() {
        let config = RunnerConfig {
            binary: PathBuf::from("phpunit"),
            configuration: Some(PathBuf::from("phpunit.xml")),
            groups: vec!["fast".to_string(), "db".to_string()],
            coverage: CoverageConfig {
                text: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let invocation = config.invocation();
        assert_eq!(
            invocation.options,
            vec![
                FrameworkOption::with_value("configuration", "phpunit.xml"),
                FrameworkOption::with_value("group", "fast,db"),
            ]
        );
        assert_eq!(invocation.coverage_flag.as_deref(), Some("--coverage-json"));
        assert!(!config.pad_shortfall());
    }

    #[test]
    fn test_worker_argv_override() {
        let config = RunnerConfig {
            worker_command: Some(vec!["/usr/bin/parasuite".to_string(), "worker".to_string()]),
            ..Default::default()
        };
        assert_eq!(config.worker_argv(), vec!["/usr/bin/parasuite", "worker"]);
        assert_eq!(RunnerConfig::default().worker_argv()[1], "worker");
    }
}
