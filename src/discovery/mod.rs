//! Test unit discovery
//!
//! Turns the configured paths, explicit units and suites into `TestUnit`s.
//! Test files are found by name suffix; their contents are never inspected.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::RunnerConfig;
use crate::models::TestUnit;

/// Every unit the run would dispatch, before ordering
pub fn discover(config: &RunnerConfig) -> Result<Vec<TestUnit>> {
    if !config.suites.is_empty() {
        let configuration = config
            .configuration
            .as_ref()
            .context("suites require a configuration file")?;
        return Ok(config
            .suites
            .iter()
            .map(|name| TestUnit::suite(name.clone(), configuration.clone()))
            .collect());
    }

    let explicit: HashSet<&Path> = config.units.iter().map(|u| u.path.as_path()).collect();

    let mut units: Vec<TestUnit> = find_files(&config.paths, &config.suffix)?
        .into_iter()
        .filter(|path| !explicit.contains(path.as_path()))
        .map(TestUnit::file)
        .collect();

    for listed in &config.units {
        if listed.methods.is_empty() {
            let unit = TestUnit::file(listed.path.clone());
            units.push(match listed.expected {
                Some(count) => unit.with_expected_count(count),
                None => unit,
            });
        } else if config.functional {
            for method in &listed.methods {
                units.push(TestUnit::methods(listed.path.clone(), vec![method.clone()]));
            }
        } else {
            let unit = TestUnit::methods(listed.path.clone(), listed.methods.clone());
            units.push(match listed.expected {
                Some(count) => unit.with_expected_count(count),
                None => unit,
            });
        }
    }

    debug!("Discovered {} unit(s)", units.len());
    Ok(units)
}

/// Files under `roots` whose names end in `suffix`, sorted per root
pub fn find_files(roots: &[PathBuf], suffix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for root in roots {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }
        if !root.exists() {
            anyhow::bail!("Test path {} does not exist", root.display());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(root).follow_links(true) {
            let entry =
                entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            let matches = entry
                .file_name()
                .to_str()
                .map(|name| name.ends_with(suffix))
                .unwrap_or(false);
            if entry.file_type().is_file() && matches {
                found.push(entry.into_path());
            }
        }
        found.sort();
        files.extend(found);
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnitSpec;
    use crate::models::UnitKind;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "<?php").unwrap();
    }

    #[test]
    fn test_find_files_by_suffix() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("tests/Unit/BTest.php"));
        touch(&dir.path().join("tests/Unit/ATest.php"));
        touch(&dir.path().join("tests/Unit/Helper.php"));
        touch(&dir.path().join("tests/Feature/CTest.php"));

        let files = find_files(&[dir.path().join("tests")], "Test.php").unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["tests/Feature/CTest.php", "tests/Unit/ATest.php", "tests/Unit/BTest.php"]
        );

        assert!(find_files(&[dir.path().join("missing")], "Test.php").is_err());
    }

    #[test]
    fn test_explicit_units_replace_discovered_files() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("tests/ATest.php");
        let b = dir.path().join("tests/BTest.php");
        touch(&a);
        touch(&b);

        let config = RunnerConfig {
            paths: vec![dir.path().join("tests")],
            units: vec![UnitSpec {
                path: b.clone(),
                methods: vec!["testOne".to_string(), "testTwo".to_string()],
                expected: Some(5),
            }],
            ..Default::default()
        };

        let units = discover(&config).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].path(), a.as_path());
        assert_eq!(units[0].expected_count(), 1);
        assert_eq!(units[1].expected_count(), 5);
        assert!(matches!(units[1].kind(), UnitKind::Methods { names } if names.len() == 2));
    }

    #[test]
    fn test_functional_mode_splits_methods() {
        let config = RunnerConfig {
            paths: Vec::new(),
            functional: true,
            units: vec![UnitSpec {
                path: PathBuf::from("tests/ATest.php"),
                methods: vec!["testOne".to_string(), "testTwo".to_string()],
                expected: None,
            }],
            ..Default::default()
        };

        let units = discover(&config).unwrap();
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.expected_count() == 1));
    }

    #[test]
    fn test_suite_units() {
        let config = RunnerConfig {
            suites: vec!["unit".to_string(), "integration".to_string()],
            configuration: Some(PathBuf::from("phpunit.xml")),
            ..Default::default()
        };

        let units = discover(&config).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].to_string(), "suite integration");
    }
}
