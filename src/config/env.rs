//! Environment variable configuration
//!
//! Provides `PARASUITE_*` overrides for configuration.

use std::env;
use std::path::PathBuf;

use super::RunnerConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "PARASUITE";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Worker count from PARASUITE_PROCESSES
    pub processes: Option<usize>,
    /// Test binary from PARASUITE_BINARY
    pub binary: Option<PathBuf>,
    /// Test binary configuration from PARASUITE_CONFIG
    pub configuration: Option<PathBuf>,
    /// Stop on failure from PARASUITE_STOP_ON_FAILURE
    pub stop_on_failure: Option<bool>,
    /// Scratch directory from PARASUITE_TMP_DIR
    pub tmp_dir: Option<PathBuf>,
    /// Merged JUnit report from PARASUITE_LOG_JUNIT
    pub log_junit: Option<PathBuf>,
    /// Coverage contributor cap from PARASUITE_COVERAGE_TEST_LIMIT
    pub coverage_test_limit: Option<usize>,
    /// Log level from PARASUITE_LOG_LEVEL
    pub log_level: Option<String>,
    /// Colored output from PARASUITE_COLORS
    pub colors: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            processes: get_env_parse("PROCESSES"),
            binary: get_env("BINARY").map(PathBuf::from),
            configuration: get_env("CONFIG").map(PathBuf::from),
            stop_on_failure: get_env_bool("STOP_ON_FAILURE"),
            tmp_dir: get_env("TMP_DIR").map(PathBuf::from),
            log_junit: get_env("LOG_JUNIT").map(PathBuf::from),
            coverage_test_limit: get_env_parse("COVERAGE_TEST_LIMIT"),
            log_level: get_env("LOG_LEVEL"),
            colors: get_env_bool("COLORS"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.processes.is_some()
            || self.binary.is_some()
            || self.configuration.is_some()
            || self.stop_on_failure.is_some()
            || self.tmp_dir.is_some()
            || self.log_junit.is_some()
            || self.coverage_test_limit.is_some()
            || self.log_level.is_some()
            || self.colors.is_some()
    }

    /// Override the settings that are set
    pub fn apply_to(&self, config: &mut RunnerConfig) {
        if let Some(processes) = self.processes {
            config.processes = processes;
        }
        if let Some(binary) = &self.binary {
            config.binary = binary.clone();
        }
        if let Some(configuration) = &self.configuration {
            config.configuration = Some(configuration.clone());
        }
        if let Some(stop) = self.stop_on_failure {
            config.stop_on_failure = stop;
        }
        if let Some(tmp_dir) = &self.tmp_dir {
            config.tmp_dir = Some(tmp_dir.clone());
        }
        if let Some(log_junit) = &self.log_junit {
            config.log_junit = Some(log_junit.clone());
        }
        if let Some(limit) = self.coverage_test_limit {
            config.coverage.test_limit = limit;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(colors) = self.colors {
            config.colors = colors;
        }
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Print all PARASUITE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_PROCESSES            Number of worker processes");
    println!("  {ENV_PREFIX}_BINARY               Test binary");
    println!("  {ENV_PREFIX}_CONFIG               Configuration file of the test binary");
    println!("  {ENV_PREFIX}_STOP_ON_FAILURE      Stop dispatching after a failure (true/false)");
    println!("  {ENV_PREFIX}_TMP_DIR              Directory for scratch files");
    println!("  {ENV_PREFIX}_LOG_JUNIT            Merged JUnit report path");
    println!("  {ENV_PREFIX}_COVERAGE_TEST_LIMIT  Tests kept per covered line (0 = all)");
    println!("  {ENV_PREFIX}_LOG_LEVEL            Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_COLORS               Colored output (true/false)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_PROCESSES=8");
    println!("  parasuite run tests/");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Restores environment variables on drop
    struct EnvGuard {
        previous: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, &str)]) -> Self {
            let previous = vars
                .iter()
                .map(|(k, _)| (k.to_string(), env::var(k).ok()))
                .collect();
            for (key, value) in vars {
                env::set_var(key, value);
            }
            Self { previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.previous {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(!config.has_any());

        let mut runner = RunnerConfig::default();
        config.apply_to(&mut runner);
        assert_eq!(runner, RunnerConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = EnvGuard::set(&[
            ("PARASUITE_PROCESSES", "7"),
            ("PARASUITE_BINARY", "bin/phpunit"),
            ("PARASUITE_STOP_ON_FAILURE", "yes"),
            ("PARASUITE_COVERAGE_TEST_LIMIT", "3"),
            ("PARASUITE_COLORS", "off"),
        ]);

        let env_config = EnvConfig::load();
        assert!(env_config.has_any());
        assert_eq!(env_config.processes, Some(7));

        let mut runner = RunnerConfig::default();
        env_config.apply_to(&mut runner);
        assert_eq!(runner.processes, 7);
        assert_eq!(runner.binary, PathBuf::from("bin/phpunit"));
        assert!(runner.stop_on_failure);
        assert_eq!(runner.coverage.test_limit, 3);
        assert!(!runner.colors);
    }
}
