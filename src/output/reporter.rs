//! Console reporter
//!
//! Prints the run header, one progress character per test case as units
//! complete, and the final defect listings and footer.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{DefectKind, FeedbackItem, Totals};
use crate::results::ResultAggregator;
use crate::utils::timer::format_elapsed;

const COLUMNS: usize = 80;

const RED: &str = "\x1b[31m";
const RED_BACKGROUND: &str = "\x1b[37;41m";
const GREEN_BACKGROUND: &str = "\x1b[30;42m";
const YELLOW: &str = "\x1b[33m";
const YELLOW_BACKGROUND: &str = "\x1b[30;43m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// What the header announces about a run
#[derive(Clone, Debug, Default)]
pub struct RunHeader {
    pub binary: String,
    pub processes: usize,
    pub functional: bool,
    pub configuration: Option<PathBuf>,
    pub seed: Option<u64>,
}

/// Progress and summary printer
pub struct Reporter<W: Write> {
    out: W,
    colorize: bool,
    column: usize,
    done: usize,
    /// Expected results that never arrived, shown as skipped
    padded: u64,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            colorize: true,
            column: 0,
            done: 0,
            padded: 0,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn with_colors(mut self, colorize: bool) -> Self {
        self.colorize = colorize;
        self
    }

    /// Progress characters printed so far
    pub fn done(&self) -> usize {
        self.done
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Print the run header
    pub fn start(&mut self, header: &RunHeader) -> io::Result<()> {
        writeln!(self.out, "ParaSuite {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(self.out)?;

        let plural = if header.processes == 1 { "process" } else { "processes" };
        writeln!(
            self.out,
            "Running {} in {} {}",
            header.binary, header.processes, plural
        )?;
        if header.functional {
            writeln!(self.out, "Functional mode is ON.")?;
        }
        if let Some(configuration) = &header.configuration {
            writeln!(self.out, "Configuration read from {}", configuration.display())?;
        }
        if let Some(seed) = header.seed {
            writeln!(self.out, "Random Seed:   {seed}")?;
        }
        writeln!(self.out)?;
        self.out.flush()
    }

    /// Print one unit's progress characters followed by `padded` skips
    pub fn print_feedback(
        &mut self,
        items: &[FeedbackItem],
        padded: usize,
        expected_total: usize,
    ) -> io::Result<()> {
        for item in items {
            self.print_item(*item, expected_total)?;
        }
        for _ in 0..padded {
            self.print_item(FeedbackItem::Skipped, expected_total)?;
        }
        self.padded += padded as u64;
        self.out.flush()
    }

    fn print_item(&mut self, item: FeedbackItem, total: usize) -> io::Result<()> {
        let symbol = item.symbol().to_string();
        let text = match item {
            FeedbackItem::Error => self.paint(RED, &symbol),
            FeedbackItem::Failure => self.paint(RED_BACKGROUND, &symbol),
            FeedbackItem::Warning | FeedbackItem::Risky => self.paint(YELLOW, &symbol),
            FeedbackItem::Skipped => self.paint(CYAN, &symbol),
            FeedbackItem::Pass => symbol,
        };
        write!(self.out, "{text}")?;

        self.column += 1;
        self.done += 1;

        let width = total.max(self.done).to_string().len();
        // Suffix is " <done> / <total> (<pct>%)"
        let max_column = COLUMNS.saturating_sub(11 + 2 * width).max(1);

        if self.done >= total {
            write!(self.out, "{}", " ".repeat(max_column.saturating_sub(self.column)))?;
            self.print_progress(total, width)?;
        } else if self.column >= max_column {
            self.print_progress(total, width)?;
        }
        Ok(())
    }

    fn print_progress(&mut self, total: usize, width: usize) -> io::Result<()> {
        let percent = if total == 0 {
            100
        } else {
            (self.done * 100 / total).min(100)
        };
        writeln!(
            self.out,
            " {:>width$} / {:>width$} ({:>3}%)",
            self.done, total, percent
        )?;
        self.column = 0;
        Ok(())
    }

    /// Print elapsed time, defect listings and the footer
    pub fn print_results(&mut self, results: &ResultAggregator, elapsed: Duration) -> io::Result<()> {
        if self.column > 0 {
            writeln!(self.out)?;
            self.column = 0;
        }

        writeln!(self.out)?;
        writeln!(self.out, "Time: {}", format_elapsed(elapsed))?;
        writeln!(self.out)?;

        let sections: Vec<(DefectKind, Vec<String>)> = [
            DefectKind::Error,
            DefectKind::Failure,
            DefectKind::Warning,
            DefectKind::Risky,
        ]
        .into_iter()
        .map(|kind| (kind, results.messages(kind)))
        .filter(|(_, messages)| !messages.is_empty())
        .collect();

        for (index, (kind, messages)) in sections.iter().enumerate() {
            if index > 0 {
                writeln!(self.out, "--")?;
                writeln!(self.out)?;
            }
            self.print_defects(*kind, messages)?;
        }

        // Padded skips only change what is shown, never the run totals
        let mut shown = results.totals();
        shown.skipped += self.padded;
        self.print_footer(&shown)?;
        self.out.flush()
    }

    /// Print a preformatted block, such as the coverage summary
    pub fn print_text(&mut self, text: &str) -> io::Result<()> {
        write!(self.out, "{text}")?;
        self.out.flush()
    }

    fn print_defects(&mut self, kind: DefectKind, messages: &[String]) -> io::Result<()> {
        let noun = kind.noun();
        if messages.len() == 1 {
            writeln!(self.out, "There was 1 {noun}:")?;
        } else {
            writeln!(self.out, "There were {} {noun}s:", messages.len())?;
        }
        writeln!(self.out)?;

        for (index, message) in messages.iter().enumerate() {
            writeln!(self.out, "{}) {}", index + 1, message)?;
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn print_footer(&mut self, totals: &Totals) -> io::Result<()> {
        if !totals.is_successful() {
            writeln!(self.out, "{}", self.paint(RED_BACKGROUND, "FAILURES!"))?;
            writeln!(self.out, "{}", self.paint(RED_BACKGROUND, &counts(totals)))?;
        } else if totals.warnings > 0 {
            writeln!(self.out, "{}", self.paint(YELLOW_BACKGROUND, "WARNINGS!"))?;
            writeln!(self.out, "{}", self.paint(YELLOW_BACKGROUND, &counts(totals)))?;
        } else if totals.skipped > 0 || totals.risky > 0 {
            writeln!(
                self.out,
                "{}",
                self.paint(YELLOW_BACKGROUND, "OK, but incomplete, skipped, or risky tests!")
            )?;
            writeln!(self.out, "{}", self.paint(YELLOW_BACKGROUND, &counts(totals)))?;
        } else {
            let line = format!(
                "OK ({} test{}, {} assertion{})",
                totals.tests,
                plural(totals.tests),
                totals.assertions,
                plural(totals.assertions)
            );
            writeln!(self.out, "{}", self.paint(GREEN_BACKGROUND, &line))?;
        }
        Ok(())
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.colorize {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }
}

/// `Tests: N, Assertions: M` followed by every non-zero defect count
fn counts(totals: &Totals) -> String {
    let mut line = format!("Tests: {}, Assertions: {}", totals.tests, totals.assertions);
    for (label, count) in [
        ("Errors", totals.errors),
        ("Failures", totals.failures),
        ("Warnings", totals.warnings),
        ("Skipped", totals.skipped),
        ("Risky", totals.risky),
    ] {
        if count > 0 {
            line.push_str(&format!(", {label}: {count}"));
        }
    }
    line.push('.');
    line
}

fn plural(count: u64) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaseNode, Defect, ResultDocument, SuiteNode};

    fn output(reporter: Reporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    fn document(defects: Vec<Defect>, tests: u64) -> ResultDocument {
        let failures = defects.iter().filter(|d| d.kind == DefectKind::Failure).count() as u64;
        let errors = defects
            .iter()
            .filter(|d| matches!(d.kind, DefectKind::Error | DefectKind::Risky))
            .count() as u64;
        let skipped = defects.iter().filter(|d| d.kind == DefectKind::Skipped).count() as u64;
        let warnings = defects.iter().filter(|d| d.kind == DefectKind::Warning).count() as u64;

        let mut cases: Vec<CaseNode> = defects
            .into_iter()
            .map(|defect| CaseNode {
                name: "testX".to_string(),
                defects: vec![defect],
                ..Default::default()
            })
            .collect();
        while (cases.len() as u64) < tests {
            cases.push(CaseNode {
                name: "testOk".to_string(),
                assertions: 1,
                ..Default::default()
            });
        }

        ResultDocument::new(vec![SuiteNode {
            name: "ATest".to_string(),
            tests,
            assertions: tests,
            failures,
            errors,
            warnings,
            skipped,
            ..Default::default()
        }
        .with_cases(cases)])
    }

    #[test]
    fn test_header() {
        let mut reporter = Reporter::new(Vec::new()).no_color();
        reporter
            .start(&RunHeader {
                binary: "vendor/bin/phpunit".to_string(),
                processes: 3,
                functional: true,
                configuration: Some(PathBuf::from("phpunit.xml")),
                seed: Some(42),
            })
            .unwrap();

        let text = output(reporter);
        assert!(text.contains("Running vendor/bin/phpunit in 3 processes"));
        assert!(text.contains("Functional mode is ON."));
        assert!(text.contains("Configuration read from phpunit.xml"));
        assert!(text.contains("Random Seed:   42"));
    }

    #[test]
    fn test_progress_ends_at_full_percentage() {
        let mut reporter = Reporter::new(Vec::new()).no_color();
        reporter
            .print_feedback(&[FeedbackItem::Pass, FeedbackItem::Failure], 0, 4)
            .unwrap();
        reporter
            .print_feedback(&[FeedbackItem::Error], 1, 4)
            .unwrap();

        assert_eq!(reporter.done(), 4);
        let text = output(reporter);
        assert!(text.starts_with(".FES"));
        assert!(text.trim_end().ends_with("4 / 4 (100%)"));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_progress_wraps_rows() {
        let mut reporter = Reporter::new(Vec::new()).no_color();
        let items = vec![FeedbackItem::Pass; 150];
        reporter.print_feedback(&items, 0, 150).unwrap();

        let text = output(reporter);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), COLUMNS);
        assert!(lines[0].ends_with(" 63 / 150 ( 42%)"));
        assert!(lines[2].ends_with("150 / 150 (100%)"));
        assert!(lines.iter().all(|l| l.len() <= COLUMNS));
    }

    #[test]
    fn test_colored_feedback() {
        let mut reporter = Reporter::new(Vec::new());
        reporter
            .print_feedback(&[FeedbackItem::Error, FeedbackItem::Skipped], 0, 10)
            .unwrap();
        let text = output(reporter);
        assert!(text.starts_with("\x1b[31mE\x1b[0m\x1b[36mS\x1b[0m"));
    }

    #[test]
    fn test_ok_footer() {
        let mut results = ResultAggregator::new();
        results.absorb(document(vec![], 6));

        let mut reporter = Reporter::new(Vec::new()).no_color();
        reporter
            .print_results(&results, Duration::from_millis(61_234))
            .unwrap();

        let text = output(reporter);
        assert!(text.contains("Time: 01:01.234"));
        assert!(text.contains("OK (6 tests, 6 assertions)"));
        assert!(!text.contains("There w"));
    }

    #[test]
    fn test_failure_listing_and_footer() {
        let mut results = ResultAggregator::new();
        results.absorb(document(
            vec![
                Defect::new(DefectKind::Error, "RuntimeException", "ATest::testA\nboom"),
                Defect::new(DefectKind::Failure, "", "ATest::testB\nfailed"),
                Defect::new(DefectKind::Failure, "", "ATest::testC\nfailed"),
            ],
            4,
        ));

        let mut reporter = Reporter::new(Vec::new()).no_color();
        reporter.print_results(&results, Duration::ZERO).unwrap();

        let text = output(reporter);
        assert!(text.contains("There was 1 error:\n\n1) ATest::testA\nboom\n"));
        assert!(text.contains("--\n\nThere were 2 failures:\n\n1) ATest::testB"));
        assert!(text.contains("2) ATest::testC"));
        assert!(text.contains("FAILURES!\nTests: 4, Assertions: 4, Errors: 1, Failures: 2."));
    }

    #[test]
    fn test_warning_and_skipped_footers() {
        let mut warned = ResultAggregator::new();
        warned.absorb(document(vec![Defect::new(DefectKind::Warning, "", "careful")], 2));
        let mut reporter = Reporter::new(Vec::new()).no_color();
        reporter.print_results(&warned, Duration::ZERO).unwrap();
        let text = output(reporter);
        assert!(text.contains("There was 1 warning:"));
        assert!(text.contains("WARNINGS!"));

        let mut skipped = ResultAggregator::new();
        skipped.absorb(document(vec![Defect::new(DefectKind::Skipped, "", "skip")], 2));
        let mut reporter = Reporter::new(Vec::new()).no_color();
        reporter.print_results(&skipped, Duration::ZERO).unwrap();
        let text = output(reporter);
        assert!(text.contains("OK, but incomplete, skipped, or risky tests!"));
        assert!(text.contains("Skipped: 1."));
    }

    #[test]
    fn test_padded_skips_only_reach_the_footer() {
        let mut results = ResultAggregator::new();
        results.absorb(document(vec![], 0));

        let mut reporter = Reporter::new(Vec::new()).no_color();
        reporter.print_feedback(&[], 1, 1).unwrap();
        reporter.print_results(&results, Duration::ZERO).unwrap();

        assert_eq!(results.totals().tests, 0);
        let text = output(reporter);
        assert!(text.starts_with('S'));
        assert!(text.contains("OK, but incomplete, skipped, or risky tests!"));
        assert!(text.contains("Tests: 0, Assertions: 0, Skipped: 1."));
    }

    #[test]
    fn test_risky_listing_does_not_fail_run() {
        let mut results = ResultAggregator::new();
        results.absorb(document(
            vec![Defect::new(DefectKind::Risky, "PHPUnit\\Framework\\RiskyTestError", "ATest::testR\nrisky")],
            1,
        ));

        let mut reporter = Reporter::new(Vec::new()).no_color();
        reporter.print_results(&results, Duration::ZERO).unwrap();
        let text = output(reporter);
        assert!(text.contains("There was 1 risky test:"));
        assert!(text.contains("OK, but incomplete, skipped, or risky tests!"));
        assert!(text.contains("Risky: 1."));
    }
}
