//! Merged JUnit report writer
//!
//! Serializes flattened suites back into a JUnit document. Risky defects are
//! written as `error` elements with their original type, so reading the file
//! back classifies them the same way.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fs;
use std::io;
use std::path::Path;

use crate::models::{CaseNode, DefectKind, SuiteChild, SuiteNode};

/// Render `suites` as a JUnit document
pub fn render(suites: &[SuiteNode]) -> io::Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    write(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write(&mut writer, Event::Start(BytesStart::new("testsuites")))?;

    for suite in suites {
        write_suite(&mut writer, suite)?;
    }

    write(&mut writer, Event::End(BytesEnd::new("testsuites")))?;

    let mut xml = String::from_utf8(writer.into_inner())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    xml.push('\n');
    Ok(xml)
}

/// Write `suites` as a JUnit document to `path`
pub fn write_report(path: &Path, suites: &[SuiteNode]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render(suites)?)
}

fn write_suite(writer: &mut Writer<Vec<u8>>, suite: &SuiteNode) -> io::Result<()> {
    let tests = suite.tests.to_string();
    let assertions = suite.assertions.to_string();
    let errors = suite.errors.to_string();
    let warnings = suite.warnings.to_string();
    let failures = suite.failures.to_string();
    let skipped = suite.skipped.to_string();
    let time = format_time(suite.time);

    let mut start = BytesStart::new("testsuite");
    start.push_attribute(("name", suite.name.as_str()));
    if !suite.file.is_empty() {
        start.push_attribute(("file", suite.file.as_str()));
    }
    start.push_attribute(("tests", tests.as_str()));
    start.push_attribute(("assertions", assertions.as_str()));
    start.push_attribute(("errors", errors.as_str()));
    start.push_attribute(("warnings", warnings.as_str()));
    start.push_attribute(("failures", failures.as_str()));
    start.push_attribute(("skipped", skipped.as_str()));
    start.push_attribute(("time", time.as_str()));
    write(writer, Event::Start(start))?;

    for child in &suite.children {
        match child {
            SuiteChild::Suite(nested) => write_suite(writer, nested)?,
            SuiteChild::Case(case) => write_case(writer, case)?,
        }
    }

    write(writer, Event::End(BytesEnd::new("testsuite")))
}

fn write_case(writer: &mut Writer<Vec<u8>>, case: &CaseNode) -> io::Result<()> {
    let line = case.line.to_string();
    let assertions = case.assertions.to_string();
    let time = format_time(case.time);

    let mut start = BytesStart::new("testcase");
    start.push_attribute(("name", case.name.as_str()));
    start.push_attribute(("class", case.class.as_str()));
    start.push_attribute(("classname", case.class.replace('\\', ".").as_str()));
    start.push_attribute(("file", case.file.as_str()));
    start.push_attribute(("line", line.as_str()));
    start.push_attribute(("assertions", assertions.as_str()));
    start.push_attribute(("time", time.as_str()));

    if case.defects.is_empty() {
        return write(writer, Event::Empty(start));
    }

    write(writer, Event::Start(start))?;
    for defect in &case.defects {
        let tag = match defect.kind {
            DefectKind::Failure => "failure",
            DefectKind::Error | DefectKind::Risky => "error",
            DefectKind::Warning => "warning",
            DefectKind::Skipped => {
                write(writer, Event::Empty(BytesStart::new("skipped")))?;
                continue;
            }
        };

        let mut element = BytesStart::new(tag);
        if !defect.type_name.is_empty() {
            element.push_attribute(("type", defect.type_name.as_str()));
        }
        write(writer, Event::Start(element))?;
        write(writer, Event::Text(BytesText::new(&defect.message)))?;
        write(writer, Event::End(BytesEnd::new(tag)))?;
    }
    write(writer, Event::End(BytesEnd::new("testcase")))
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> io::Result<()> {
    writer
        .write_event(event)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

fn format_time(seconds: f64) -> String {
    format!("{seconds:.6}")
}
