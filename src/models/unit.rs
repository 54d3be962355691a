//! Schedulable test units
//!
//! A `TestUnit` is an opaque piece of work handed to one worker. It knows how
//! many results it expects and how to turn itself into a command line for the
//! external test binary. Its scratch files are created lazily and removed when
//! the unit is absorbed or dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, TempPath};
use tracing::warn;

const RESULT_PREFIX: &str = "PT_";
const COVERAGE_PREFIX: &str = "CV_";

/// What a unit runs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum UnitKind {
    /// Every test in one file
    File,
    /// Selected methods of one file, in order
    Methods { names: Vec<String> },
    /// A suite declared in the test binary's configuration file
    Suite { name: String, configuration: PathBuf },
}

/// One schedulable unit of work
#[derive(Debug)]
pub struct TestUnit {
    path: PathBuf,
    kind: UnitKind,
    expected_count: usize,
    result_file: Option<TempPath>,
    coverage_file: Option<TempPath>,
    last_command: Option<String>,
}

impl TestUnit {
    /// A whole test file, expecting a single result until told otherwise
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), UnitKind::File, 1)
    }

    /// A chain of methods from one file; expects one result per method
    pub fn methods(path: impl Into<PathBuf>, names: Vec<String>) -> Self {
        let expected = names.len().max(1);
        Self::new(path.into(), UnitKind::Methods { names }, expected)
    }

    /// A configured suite. There is no cheap way to know its size up front.
    pub fn suite(name: impl Into<String>, configuration: impl Into<PathBuf>) -> Self {
        Self::new(
            PathBuf::new(),
            UnitKind::Suite {
                name: name.into(),
                configuration: configuration.into(),
            },
            1,
        )
    }

    fn new(path: PathBuf, kind: UnitKind, expected_count: usize) -> Self {
        Self {
            path,
            kind,
            expected_count,
            result_file: None,
            coverage_file: None,
            last_command: None,
        }
    }

    /// Override the expected result count
    pub fn with_expected_count(mut self, count: usize) -> Self {
        self.expected_count = count;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> &UnitKind {
        &self.kind
    }

    pub fn expected_count(&self) -> usize {
        self.expected_count
    }

    /// Where the test binary writes its result document, once realised
    pub fn result_path(&self) -> Option<&Path> {
        self.result_file.as_deref()
    }

    /// Where the test binary writes its coverage snapshot, once realised
    pub fn coverage_path(&self) -> Option<&Path> {
        self.coverage_file.as_deref()
    }

    pub fn last_command(&self) -> Option<&str> {
        self.last_command.as_deref()
    }

    /// Delete the result document. Safe to call more than once.
    pub fn discard_result(&mut self) {
        if let Some(file) = self.result_file.take() {
            let path = file.to_path_buf();
            if let Err(e) = file.close() {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove result file {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Build the command line for this unit, creating its scratch files.
    pub fn command_args(
        &mut self,
        invocation: &Invocation,
        scratch: &ScratchDir,
    ) -> io::Result<Vec<String>> {
        let mut args = vec![invocation.binary.display().to_string()];
        args.extend(invocation.passthrough.iter().cloned());

        for option in &invocation.options {
            args.push(format!("--{}", option.name));
            if let Some(value) = &option.value {
                args.push(value.clone());
            }
        }

        match &self.kind {
            UnitKind::File => {}
            UnitKind::Methods { names } => {
                args.push("--filter".to_string());
                args.push(method_filter(names));
            }
            UnitKind::Suite {
                name,
                configuration,
            } => {
                args.push("--testsuite".to_string());
                args.push(name.clone());
                args.push("--configuration".to_string());
                args.push(configuration.display().to_string());
            }
        }

        if self.result_file.is_none() {
            self.result_file = Some(scratch.create(RESULT_PREFIX)?);
        }
        args.push(invocation.result_flag.clone());
        args.push(display(self.result_file.as_deref()));

        if let Some(flag) = &invocation.coverage_flag {
            if self.coverage_file.is_none() {
                self.coverage_file = Some(scratch.create(COVERAGE_PREFIX)?);
            }
            args.push(flag.clone());
            args.push(display(self.coverage_file.as_deref()));
        }

        if !self.path.as_os_str().is_empty() {
            args.push(self.path.display().to_string());
        }

        self.last_command = Some(shell_words::join(&args));
        Ok(args)
    }
}

impl fmt::Display for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            UnitKind::File => write!(f, "{}", self.path.display()),
            UnitKind::Methods { names } => {
                write!(f, "{} ({})", self.path.display(), names.join(", "))
            }
            UnitKind::Suite { name, .. } => write!(f, "suite {name}"),
        }
    }
}

fn display(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

/// Filter matching any of the methods, including data-provider expansions
fn method_filter(names: &[String]) -> String {
    let alternatives: Vec<String> = names
        .iter()
        .map(|name| format!("::{}", regex::escape(name)))
        .collect();
    format!("/(?:{})(?: with data set .+)?$/", alternatives.join("|"))
}

/// A `--name [value]` option forwarded to the test binary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl FrameworkOption {
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// The parts of a worker command line shared by every unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub binary: PathBuf,
    pub passthrough: Vec<String>,
    pub options: Vec<FrameworkOption>,
    pub result_flag: String,
    pub coverage_flag: Option<String>,
}

impl Invocation {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            passthrough: Vec::new(),
            options: Vec::new(),
            result_flag: "--log-junit".to_string(),
            coverage_flag: None,
        }
    }

    pub fn with_passthrough(mut self, args: Vec<String>) -> Self {
        self.passthrough = args;
        self
    }

    pub fn with_options(mut self, options: Vec<FrameworkOption>) -> Self {
        self.options = options;
        self
    }

    pub fn with_result_flag(mut self, flag: impl Into<String>) -> Self {
        self.result_flag = flag.into();
        self
    }

    pub fn with_coverage_flag(mut self, flag: impl Into<String>) -> Self {
        self.coverage_flag = Some(flag.into());
        self
    }
}

/// Directory holding per-unit scratch files
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    _owned: Option<TempDir>,
}

impl ScratchDir {
    /// Use an existing directory; scratch files are still removed individually
    pub fn at(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        std::fs::create_dir_all(&path)?;
        Ok(Self { path, _owned: None })
    }

    /// A private temporary directory, removed on drop
    pub fn temporary() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("parasuite-").tempdir()?;
        Ok(Self {
            path: dir.path().to_path_buf(),
            _owned: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create(&self, prefix: &str) -> io::Result<TempPath> {
        Ok(tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(&self.path)?
            .into_temp_path())
    }
}
