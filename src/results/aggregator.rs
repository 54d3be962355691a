//! Running aggregation of result documents
//!
//! Absorbs one `ResultDocument` per completed unit, keeps cumulative totals
//! available at any point of the run, and tracks how many results the run is
//! expected to produce so live progress can end at exactly 100%.

use std::collections::HashMap;
use tracing::warn;

use crate::models::{DefectKind, ResultDocument, SuiteNode, Tier, Totals};

/// Cumulative state of every absorbed unit
#[derive(Debug, Default)]
pub struct ResultAggregator {
    documents: Vec<ResultDocument>,
    totals: Totals,
    expected_total: usize,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register results a pending unit is expected to produce
    pub fn add_expected(&mut self, count: usize) {
        self.expected_total += count;
    }

    /// Results the run is currently expected to produce
    pub fn expected_total(&self) -> usize {
        self.expected_total
    }

    /// Reconcile a unit's actual case count with what it was expected to yield.
    ///
    /// Surplus cases raise the expected total. A shortfall either lowers it, or
    /// with `pad_shortfall` is left in place and returned as the number of
    /// skips the reporter should print. Running totals are never touched.
    pub fn correct_overhead(&mut self, actual: usize, expected: usize, pad_shortfall: bool) -> usize {
        if actual >= expected {
            self.expected_total += actual - expected;
            return 0;
        }

        let shortfall = expected - actual;
        if pad_shortfall {
            shortfall
        } else {
            self.expected_total = self.expected_total.saturating_sub(shortfall);
            0
        }
    }

    /// Fold one unit's document into the running totals
    pub fn absorb(&mut self, document: ResultDocument) {
        let declared = document.totals();
        let leaves = document.leaf_totals();

        if declared.tests != leaves.tests
            || declared.failures != leaves.failures
            || declared.errors != leaves.errors
        {
            warn!(
                "Declared totals ({} tests, {} failures, {} errors) disagree with test cases ({} tests, {} failures, {} errors)",
                declared.tests,
                declared.failures,
                declared.errors,
                leaves.tests,
                leaves.failures,
                leaves.errors
            );
        }

        self.totals.add(&declared);
        self.documents.push(document);
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    /// True when no failures and no errors were absorbed
    pub fn is_successful(&self) -> bool {
        self.totals.is_successful()
    }

    pub fn tier(&self) -> Tier {
        self.totals.tier()
    }

    pub fn documents(&self) -> &[ResultDocument] {
        &self.documents
    }

    /// Messages of one defect kind across all absorbed documents, in order
    pub fn messages(&self, kind: DefectKind) -> Vec<String> {
        self.documents
            .iter()
            .flat_map(|doc| doc.cases())
            .flat_map(|case| case.defects_of(kind))
            .map(|defect| defect.message.clone())
            .collect()
    }

    /// One suite per originating file.
    ///
    /// Top-level suites sharing a file are merged, nested suites are folded
    /// into their file's case list. Declared counts are summed.
    pub fn flatten(&self) -> Vec<SuiteNode> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut flattened: Vec<SuiteNode> = Vec::new();

        for suite in self.documents.iter().flat_map(|doc| doc.suites.iter()) {
            let key = if suite.file.is_empty() {
                suite.name.clone()
            } else {
                suite.file.clone()
            };

            let slot = *index.entry(key).or_insert_with(|| {
                flattened.push(SuiteNode {
                    name: suite.name.clone(),
                    file: suite.file.clone(),
                    ..Default::default()
                });
                flattened.len() - 1
            });

            let target = &mut flattened[slot];
            target.tests += suite.tests;
            target.assertions += suite.assertions;
            target.failures += suite.failures;
            target.errors += suite.errors;
            target.warnings += suite.warnings;
            target.skipped += suite.skipped;
            target.time += suite.time;
            for case in suite.all_cases() {
                target.push_case(case.clone());
            }
        }

        flattened
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaseNode, Defect};
    use crate::results::ResultReader;
    use proptest::prelude::*;

    fn document(file: &str, passed: u64, failures: u64, errors: u64) -> ResultDocument {
        let mut cases = Vec::new();
        for i in 0..passed {
            cases.push(CaseNode {
                name: format!("testPass{i}"),
                class: "ATest".to_string(),
                file: file.to_string(),
                assertions: 1,
                ..Default::default()
            });
        }
        for i in 0..failures {
            cases.push(CaseNode {
                name: format!("testFail{i}"),
                class: "ATest".to_string(),
                file: file.to_string(),
                assertions: 1,
                defects: vec![Defect::new(DefectKind::Failure, "", format!("ATest::testFail{i}\nfailed"))],
                ..Default::default()
            });
        }
        for i in 0..errors {
            cases.push(CaseNode {
                name: format!("testError{i}"),
                class: "ATest".to_string(),
                file: file.to_string(),
                defects: vec![Defect::new(DefectKind::Error, "RuntimeException", format!("ATest::testError{i}\nboom"))],
                ..Default::default()
            });
        }

        ResultDocument::new(vec![SuiteNode {
            name: "ATest".to_string(),
            file: file.to_string(),
            tests: passed + failures + errors,
            assertions: passed + failures,
            failures,
            errors,
            ..Default::default()
        }
        .with_cases(cases)])
    }

    #[test]
    fn test_absorb_accumulates_totals() {
        let mut aggregator = ResultAggregator::new();
        aggregator.absorb(document("/a.php", 2, 0, 0));
        assert!(aggregator.is_successful());

        aggregator.absorb(document("/b.php", 1, 1, 1));
        let totals = aggregator.totals();
        assert_eq!(totals.tests, 5);
        assert_eq!(totals.assertions, 4);
        assert_eq!(totals.failures, 1);
        assert_eq!(totals.errors, 1);
        assert!(!aggregator.is_successful());
        assert_eq!(aggregator.tier(), Tier::Error);
    }

    #[test]
    fn test_overhead_correction_with_surplus() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add_expected(5);
        aggregator.add_expected(1);

        assert_eq!(aggregator.correct_overhead(7, 5, false), 0);
        assert_eq!(aggregator.expected_total(), 8);
    }

    #[test]
    fn test_overhead_correction_with_shortfall() {
        let mut aggregator = ResultAggregator::new();
        aggregator.add_expected(4);
        assert_eq!(aggregator.correct_overhead(1, 4, false), 0);
        assert_eq!(aggregator.expected_total(), 1);

        let mut padded = ResultAggregator::new();
        padded.add_expected(4);
        assert_eq!(padded.correct_overhead(1, 4, true), 3);
        assert_eq!(padded.expected_total(), 4);
        assert_eq!(padded.totals(), Totals::default());
    }

    #[test]
    fn test_padded_shortfall_keeps_totals_as_absorbed() {
        let empty = ResultReader::default().parse_str("<testsuites/>").unwrap();
        let per_unit = empty.totals();

        let mut aggregator = ResultAggregator::new();
        aggregator.add_expected(1);
        assert_eq!(aggregator.correct_overhead(empty.feedback().len(), 1, true), 1);
        aggregator.absorb(empty);

        assert_eq!(aggregator.totals().tests, 0);
        assert_eq!(aggregator.totals().tests, per_unit.tests);
        assert_eq!(aggregator.totals().skipped, per_unit.skipped);
        assert_eq!(aggregator.expected_total(), 1);
    }

    #[test]
    fn test_messages_in_absorption_order() {
        let mut aggregator = ResultAggregator::new();
        aggregator.absorb(document("/a.php", 0, 1, 0));
        aggregator.absorb(document("/b.php", 0, 2, 1));

        let failures = aggregator.messages(DefectKind::Failure);
        assert_eq!(failures.len(), 3);
        assert!(failures[0].starts_with("ATest::testFail0"));
        assert_eq!(aggregator.messages(DefectKind::Error).len(), 1);
        assert!(aggregator.messages(DefectKind::Warning).is_empty());
    }

    #[test]
    fn test_flatten_merges_by_file() {
        let mut aggregator = ResultAggregator::new();
        aggregator.absorb(document("/a.php", 1, 0, 0));
        aggregator.absorb(document("/b.php", 1, 0, 0));
        aggregator.absorb(document("/a.php", 0, 1, 0));

        let suites = aggregator.flatten();
        assert_eq!(suites.len(), 2);
        assert_eq!(suites[0].file, "/a.php");
        assert_eq!(suites[0].tests, 2);
        assert_eq!(suites[0].failures, 1);
        assert_eq!(suites[0].cases().count(), 2);
        assert_eq!(suites[0].suites().count(), 0);
        assert_eq!(suites[1].file, "/b.php");
    }

    proptest! {
        #[test]
        fn prop_totals_equal_sum_over_any_partition(
            units in prop::collection::vec((0u64..4, 0u64..3, 0u64..3), 1..20),
            workers in 1usize..6,
        ) {
            let expected_tests: u64 = units.iter().map(|(p, f, e)| p + f + e).sum();
            let expected_failures: u64 = units.iter().map(|(_, f, _)| f).sum();

            // Round-robin partition, absorbed worker by worker
            let mut aggregator = ResultAggregator::new();
            for worker in 0..workers {
                for (i, (p, f, e)) in units.iter().enumerate() {
                    if i % workers == worker {
                        aggregator.absorb(document(&format!("/{i}.php"), *p, *f, *e));
                    }
                }
            }

            prop_assert_eq!(aggregator.totals().tests, expected_tests);
            prop_assert_eq!(aggregator.totals().failures, expected_failures);
            prop_assert_eq!(aggregator.documents().len(), units.len());
        }
    }
}
