//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{CoverageConfig, RunnerConfig, UnitOrder, UnitSpec};
use crate::models::FrameworkOption;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./parasuite.yaml",
    "./parasuite.yml",
    "./.parasuite.yaml",
    "~/.config/parasuite/config.yaml",
];

const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// Full configuration file structure
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Run settings
    #[serde(default)]
    pub runner: RunnerConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            runner: RunnerConfig::default(),
        }
    }
}

impl ConfigFile {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        for location in CONFIG_LOCATIONS {
            let path = expand_path(location);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<(Self, Option<PathBuf>)> {
        match Self::find() {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        // Create parent directory if needed
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }
        validate_runner(&self.runner)
    }

    /// Generate example configuration
    pub fn example() -> Self {
        Self {
            version: default_version(),
            runner: RunnerConfig {
                processes: 4,
                binary: PathBuf::from("vendor/bin/phpunit"),
                configuration: Some(PathBuf::from("phpunit.xml")),
                options: vec![FrameworkOption::with_value("bootstrap", "tests/bootstrap.php")],
                paths: vec![PathBuf::from("tests")],
                units: vec![UnitSpec {
                    path: PathBuf::from("tests/Functional/CheckoutTest.php"),
                    methods: vec!["testCart".to_string(), "testPayment".to_string()],
                    expected: None,
                }],
                order: UnitOrder::Random,
                log_junit: Some(PathBuf::from("build/junit.xml")),
                coverage: CoverageConfig {
                    test_limit: 5,
                    output: Some(PathBuf::from("build/coverage.json")),
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }
}

/// Checks shared by the file loader and the final, fully merged settings
pub fn validate_runner(runner: &RunnerConfig) -> Result<()> {
    if runner.processes == 0 {
        anyhow::bail!("processes must be at least 1");
    }
    if runner.binary.as_os_str().is_empty() {
        anyhow::bail!("binary must not be empty");
    }
    if !runner.suites.is_empty() && runner.configuration.is_none() {
        anyhow::bail!("suites require a configuration file");
    }
    if runner.seed.is_some() && runner.order != UnitOrder::Random {
        anyhow::bail!("seed is only used with order: random");
    }
    if runner.result_flag.is_empty() {
        anyhow::bail!("result_flag must not be empty");
    }
    if matches!(&runner.worker_command, Some(command) if command.is_empty()) {
        anyhow::bail!("worker_command must not be empty");
    }
    Ok(())
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
