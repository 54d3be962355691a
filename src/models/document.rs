//! Parsed result documents
//!
//! One `ResultDocument` is produced per completed test unit. Declared counts on
//! the top-level suites are authoritative; leaf counts are only used to
//! cross-check them and to split risky tests out of the error bucket.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a defect recorded on a test case
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefectKind {
    Failure,
    Error,
    Warning,
    Skipped,
    Risky,
}

impl DefectKind {
    /// Singular noun used in defect listings
    pub fn noun(&self) -> &'static str {
        match self {
            DefectKind::Failure => "failure",
            DefectKind::Error => "error",
            DefectKind::Warning => "warning",
            DefectKind::Skipped => "skipped test",
            DefectKind::Risky => "risky test",
        }
    }
}

/// A single failure, error, warning, skip or risky notice
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defect {
    pub kind: DefectKind,
    /// Exception/assertion type reported by the test binary (may be empty)
    pub type_name: String,
    pub message: String,
}

impl Defect {
    pub fn new(kind: DefectKind, type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

/// A `testcase` node
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseNode {
    pub name: String,
    pub class: String,
    pub file: String,
    pub line: u32,
    pub assertions: u64,
    pub time: f64,
    pub defects: Vec<Defect>,
}

impl CaseNode {
    /// Defects of one kind, in document order
    pub fn defects_of(&self, kind: DefectKind) -> impl Iterator<Item = &Defect> {
        self.defects.iter().filter(move |d| d.kind == kind)
    }

    pub fn count(&self, kind: DefectKind) -> u64 {
        self.defects_of(kind).count() as u64
    }

    /// Progress character for this case
    pub fn feedback(&self) -> FeedbackItem {
        let has = |kind: DefectKind| self.defects.iter().any(|d| d.kind == kind);

        if has(DefectKind::Error) {
            FeedbackItem::Error
        } else if has(DefectKind::Failure) {
            FeedbackItem::Failure
        } else if has(DefectKind::Warning) {
            FeedbackItem::Warning
        } else if has(DefectKind::Risky) {
            FeedbackItem::Risky
        } else if has(DefectKind::Skipped) {
            FeedbackItem::Skipped
        } else {
            FeedbackItem::Pass
        }
    }
}

/// Direct child of a suite
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteChild {
    Suite(SuiteNode),
    Case(CaseNode),
}

/// A `testsuite` node, possibly nested
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteNode {
    pub name: String,
    pub file: String,
    pub tests: u64,
    pub assertions: u64,
    pub failures: u64,
    pub errors: u64,
    pub warnings: u64,
    pub skipped: u64,
    pub time: f64,
    /// Nested suites and cases, in document order
    pub children: Vec<SuiteChild>,
}

impl SuiteNode {
    pub fn with_cases(mut self, cases: impl IntoIterator<Item = CaseNode>) -> Self {
        self.children.extend(cases.into_iter().map(SuiteChild::Case));
        self
    }

    pub fn push_suite(&mut self, suite: SuiteNode) {
        self.children.push(SuiteChild::Suite(suite));
    }

    pub fn push_case(&mut self, case: CaseNode) {
        self.children.push(SuiteChild::Case(case));
    }

    /// Directly nested suites
    pub fn suites(&self) -> impl Iterator<Item = &SuiteNode> {
        self.children.iter().filter_map(|child| match child {
            SuiteChild::Suite(suite) => Some(suite),
            SuiteChild::Case(_) => None,
        })
    }

    /// Direct cases, without those of nested suites
    pub fn cases(&self) -> impl Iterator<Item = &CaseNode> {
        self.children.iter().filter_map(|child| match child {
            SuiteChild::Case(case) => Some(case),
            SuiteChild::Suite(_) => None,
        })
    }

    /// Every case below this suite, in document order
    pub fn all_cases(&self) -> Vec<&CaseNode> {
        let mut cases: Vec<&CaseNode> = Vec::new();
        self.collect_cases(&mut cases);
        cases
    }

    fn collect_cases<'a>(&'a self, into: &mut Vec<&'a CaseNode>) {
        for child in &self.children {
            match child {
                SuiteChild::Suite(suite) => suite.collect_cases(into),
                SuiteChild::Case(case) => into.push(case),
            }
        }
    }
}

/// Running counts of a run or of one document
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub tests: u64,
    pub assertions: u64,
    pub failures: u64,
    pub errors: u64,
    pub warnings: u64,
    pub skipped: u64,
    pub risky: u64,
    pub time: f64,
}

impl Totals {
    pub fn add(&mut self, other: &Totals) {
        self.tests += other.tests;
        self.assertions += other.assertions;
        self.failures += other.failures;
        self.errors += other.errors;
        self.warnings += other.warnings;
        self.skipped += other.skipped;
        self.risky += other.risky;
        self.time += other.time;
    }

    /// True when there are no failures and no errors
    pub fn is_successful(&self) -> bool {
        self.failures == 0 && self.errors == 0
    }

    pub fn tier(&self) -> Tier {
        if self.errors > 0 || self.warnings > 0 {
            Tier::Error
        } else if self.failures > 0 {
            Tier::Failure
        } else {
            Tier::Success
        }
    }
}

/// Severity of a unit or run outcome. Errors outrank failures outrank success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Success,
    Failure,
    Error,
}

impl Tier {
    pub fn exit_code(&self) -> i32 {
        match self {
            Tier::Success => 0,
            Tier::Failure => 1,
            Tier::Error => 2,
        }
    }
}

/// One progress character
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedbackItem {
    Pass,
    Failure,
    Error,
    Warning,
    Risky,
    Skipped,
}

impl FeedbackItem {
    pub fn symbol(&self) -> char {
        match self {
            FeedbackItem::Pass => '.',
            FeedbackItem::Failure => 'F',
            FeedbackItem::Error => 'E',
            FeedbackItem::Warning => 'W',
            FeedbackItem::Risky => 'R',
            FeedbackItem::Skipped => 'S',
        }
    }
}

impl fmt::Display for FeedbackItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Parsed output of one test unit
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub suites: Vec<SuiteNode>,
}

impl ResultDocument {
    pub fn new(suites: Vec<SuiteNode>) -> Self {
        Self { suites }
    }

    /// All cases in document order
    pub fn cases(&self) -> Vec<&CaseNode> {
        self.suites.iter().flat_map(|s| s.all_cases()).collect()
    }

    pub fn case_count(&self) -> usize {
        self.cases().len()
    }

    pub fn feedback(&self) -> Vec<FeedbackItem> {
        self.cases().into_iter().map(CaseNode::feedback).collect()
    }

    /// Totals from the declared top-level suite counts.
    ///
    /// Risky tests are reported by the test binary as errors; they are moved
    /// out of the error count here so that they never raise the exit tier.
    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for suite in &self.suites {
            totals.tests += suite.tests;
            totals.assertions += suite.assertions;
            totals.failures += suite.failures;
            totals.errors += suite.errors;
            totals.warnings += suite.warnings;
            totals.skipped += suite.skipped;
            totals.time += suite.time;
        }

        let risky = self.leaf_totals().risky;
        totals.risky = risky;
        totals.errors = totals.errors.saturating_sub(risky);
        totals
    }

    /// Totals summed over the leaf cases
    pub fn leaf_totals(&self) -> Totals {
        let mut totals = Totals::default();
        for case in self.cases() {
            totals.tests += 1;
            totals.assertions += case.assertions;
            totals.failures += case.count(DefectKind::Failure);
            totals.errors += case.count(DefectKind::Error);
            totals.warnings += case.count(DefectKind::Warning);
            totals.skipped += case.count(DefectKind::Skipped);
            totals.risky += case.count(DefectKind::Risky);
            totals.time += case.time;
        }
        totals
    }

    pub fn tier(&self) -> Tier {
        self.totals().tier()
    }
}
