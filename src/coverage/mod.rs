//! Coverage snapshot merging
//!
//! Every unit run with coverage enabled leaves a JSON snapshot mapping
//! `file -> line -> [test id]`. Snapshots are folded into one cumulative
//! snapshot, capped at `test_limit` contributors per line.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Why an empty snapshot was most likely left behind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoverageHint {
    Crashed,
    NoDriver,
}

impl fmt::Display for CoverageHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverageHint::Crashed => write!(f, "This means a worker process has crashed."),
            CoverageHint::NoDriver => write!(
                f,
                "No coverage driver found! Enable a coverage driver for the test binary."
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoverageError {
    #[error("Coverage file {} is empty. {hint}", .path.display())]
    Empty { path: PathBuf, hint: CoverageHint },

    #[error("Failed to read coverage file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Coverage file {} is not a valid snapshot", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Covered lines of every file, with the tests that executed them
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageSnapshot {
    files: BTreeMap<String, BTreeMap<u32, Vec<String>>>,
}

impl CoverageSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `test` executed `file:line`
    pub fn insert(&mut self, file: impl Into<String>, line: u32, test: impl Into<String>) {
        let tests = self.files.entry(file.into()).or_default().entry(line).or_default();
        let test = test.into();
        if !tests.contains(&test) {
            tests.push(test);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &BTreeMap<u32, Vec<String>>)> {
        self.files.iter().map(|(file, lines)| (file.as_str(), lines))
    }

    /// Tests that executed `file:line`, in first-seen order
    pub fn contributors(&self, file: &str, line: u32) -> &[String] {
        self.files
            .get(file)
            .and_then(|lines| lines.get(&line))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn covered_lines(&self) -> usize {
        self.files.values().map(BTreeMap::len).sum()
    }

    /// Fold `other` in. Contributors already present are not repeated.
    pub fn merge(&mut self, other: CoverageSnapshot) {
        for (file, lines) in other.files {
            let target = self.files.entry(file).or_default();
            for (line, tests) in lines {
                let existing = target.entry(line).or_default();
                for test in tests {
                    if !existing.contains(&test) {
                        existing.push(test);
                    }
                }
            }
        }
    }

    /// Keep at most `test_limit` contributors per line; 0 keeps all
    pub fn limit(&mut self, test_limit: usize) {
        if test_limit == 0 {
            return;
        }
        for lines in self.files.values_mut() {
            for tests in lines.values_mut() {
                tests.truncate(test_limit);
            }
        }
    }
}

/// Cumulative coverage of a run
#[derive(Debug)]
pub struct CoverageAggregator {
    snapshot: Option<CoverageSnapshot>,
    test_limit: usize,
    hint: CoverageHint,
    absorbed: usize,
}

impl CoverageAggregator {
    pub fn new(test_limit: usize) -> Self {
        Self {
            snapshot: None,
            test_limit,
            hint: CoverageHint::Crashed,
            absorbed: 0,
        }
    }

    /// Whether a coverage driver is known to be available
    pub fn with_driver_available(mut self, available: bool) -> Self {
        self.hint = if available {
            CoverageHint::Crashed
        } else {
            CoverageHint::NoDriver
        };
        self
    }

    /// Merge the snapshot at `path`, then delete it
    pub fn absorb_file(&mut self, path: &Path) -> Result<(), CoverageError> {
        let result = self.read_snapshot(path);
        remove_snapshot(path);
        self.absorb(result?);
        Ok(())
    }

    fn read_snapshot(&self, path: &Path) -> Result<CoverageSnapshot, CoverageError> {
        let empty = || CoverageError::Empty {
            path: path.to_path_buf(),
            hint: self.hint,
        };

        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(empty()),
            Err(source) => {
                return Err(CoverageError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Err(empty());
        }

        serde_json::from_str(&content).map_err(|source| CoverageError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Merge an in-memory snapshot
    pub fn absorb(&mut self, snapshot: CoverageSnapshot) {
        match &mut self.snapshot {
            Some(base) => base.merge(snapshot),
            None => self.snapshot = Some(snapshot),
        }
        if let Some(base) = &mut self.snapshot {
            base.limit(self.test_limit);
        }
        self.absorbed += 1;
    }

    /// Number of snapshots merged so far
    pub fn absorbed(&self) -> usize {
        self.absorbed
    }

    pub fn snapshot(&self) -> Option<&CoverageSnapshot> {
        self.snapshot.as_ref()
    }

    /// Write the cumulative snapshot as JSON
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let empty = CoverageSnapshot::default();
        let snapshot = self.snapshot.as_ref().unwrap_or(&empty);
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        serde_json::to_writer_pretty(&mut out, snapshot)?;
        out.flush()
    }

    /// Per-file summary of covered lines
    pub fn text_report(&self) -> String {
        let mut output = String::from("\nCode Coverage Report:\n");

        let Some(snapshot) = self.snapshot.as_ref().filter(|s| !s.is_empty()) else {
            output.push_str("  No lines covered\n");
            return output;
        };

        let file_count = snapshot.files.len();
        output.push_str(&format!(
            "  Summary: {} line(s) covered in {} file(s)\n\n",
            snapshot.covered_lines(),
            file_count
        ));

        let width = snapshot.files.keys().map(String::len).max().unwrap_or(0);
        for (file, lines) in snapshot.files() {
            let tests = lines.values().map(Vec::len).sum::<usize>();
            output.push_str(&format!(
                "  {file:<width$}  {:>5} line(s)  {:>5} hit(s)\n",
                lines.len(),
                tests
            ));
        }
        output
    }
}

fn remove_snapshot(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove coverage file {}: {}", path.display(), e);
        }
    }
}

/// Run the driver probe command once; a clean exit means a driver is loaded
pub async fn probe_driver(argv: &[String]) -> bool {
    let Some((program, args)) = argv.split_first() else {
        return true;
    };

    match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => {
            debug!("Coverage driver probe exited with {}", status);
            status.success()
        }
        Err(e) => {
            debug!("Coverage driver probe failed to start: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn snapshot(entries: &[(&str, u32, &str)]) -> CoverageSnapshot {
        let mut snapshot = CoverageSnapshot::new();
        for (file, line, test) in entries {
            snapshot.insert(*file, *line, *test);
        }
        snapshot
    }

    #[test]
    fn test_merge_first_seen_wins_under_limit() {
        let mut aggregator = CoverageAggregator::new(1);
        aggregator.absorb(snapshot(&[("F", 10, "A")]));
        aggregator.absorb(snapshot(&[("F", 10, "B"), ("F", 11, "B")]));

        let merged = aggregator.snapshot().unwrap();
        assert_eq!(merged.contributors("F", 10), ["A"]);
        assert_eq!(merged.contributors("F", 11), ["B"]);
        assert_eq!(aggregator.absorbed(), 2);
    }

    #[test]
    fn test_merge_without_limit_deduplicates() {
        let mut aggregator = CoverageAggregator::new(0);
        aggregator.absorb(snapshot(&[("F", 1, "A"), ("F", 1, "B")]));
        aggregator.absorb(snapshot(&[("F", 1, "B"), ("F", 1, "C"), ("G", 2, "C")]));

        let merged = aggregator.snapshot().unwrap();
        assert_eq!(merged.contributors("F", 1), ["A", "B", "C"]);
        assert_eq!(merged.covered_lines(), 2);
        assert!(merged.contributors("H", 1).is_empty());
    }

    #[test]
    fn test_absorb_file_parses_and_deletes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("CV_1");
        fs::write(&path, r#"{"/src/A.php": {"3": ["ATest::testOne"], "4": []}}"#).unwrap();

        let mut aggregator = CoverageAggregator::new(0);
        aggregator.absorb_file(&path).unwrap();

        assert!(!path.exists());
        let merged = aggregator.snapshot().unwrap();
        assert_eq!(merged.contributors("/src/A.php", 3), ["ATest::testOne"]);
        assert!(aggregator.text_report().contains("/src/A.php"));
    }

    #[test]
    fn test_empty_file_hints() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("CV_2");
        fs::write(&path, "").unwrap();

        let mut crashed = CoverageAggregator::new(0);
        let error = crashed.absorb_file(&path).unwrap_err();
        assert!(error.to_string().contains("worker process has crashed"));
        assert!(!path.exists());

        let mut no_driver = CoverageAggregator::new(0).with_driver_available(false);
        let error = no_driver.absorb_file(&path).unwrap_err();
        assert!(matches!(
            error,
            CoverageError::Empty {
                hint: CoverageHint::NoDriver,
                ..
            }
        ));
        assert!(error.to_string().contains("No coverage driver found!"));
    }

    #[test]
    fn test_garbage_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("CV_3");
        fs::write(&path, "Fatal error").unwrap();

        let mut aggregator = CoverageAggregator::new(0);
        assert!(matches!(
            aggregator.absorb_file(&path),
            Err(CoverageError::Parse { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_write_json_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out/coverage.json");

        let mut aggregator = CoverageAggregator::new(0);
        aggregator.absorb(snapshot(&[("F", 10, "A")]));
        aggregator.write_json(&path).unwrap();

        let written: CoverageSnapshot =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(&written, aggregator.snapshot().unwrap());
    }

    #[tokio::test]
    async fn test_probe_driver() {
        assert!(probe_driver(&["true".to_string()]).await);
        assert!(!probe_driver(&["false".to_string()]).await);
        assert!(!probe_driver(&["/nonexistent/php".to_string()]).await);
    }

    proptest! {
        #[test]
        fn prop_line_contributors_never_exceed_limit(
            limit in 1usize..5,
            merges in prop::collection::vec(
                prop::collection::vec((0u32..4, 0u8..10), 0..12),
                1..8,
            ),
        ) {
            let mut aggregator = CoverageAggregator::new(limit);
            for entries in merges {
                let mut next = CoverageSnapshot::new();
                for (line, test) in entries {
                    next.insert("F", line, format!("T{test}"));
                }
                aggregator.absorb(next);

                let merged = aggregator.snapshot().unwrap();
                for (_, lines) in merged.files() {
                    for tests in lines.values() {
                        prop_assert!(tests.len() <= limit);
                    }
                }
            }
        }
    }
}
