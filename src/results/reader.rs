//! JUnit result document reader
//!
//! Turns the XML document written by the external test binary into a
//! `ResultDocument`. Risky tests arrive as `error` nodes; they are moved into
//! their own bucket based on the declared exception type.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::models::{CaseNode, Defect, DefectKind, ResultDocument, SuiteNode};

/// Exception types the test binary uses to flag risky tests
pub const DEFAULT_RISKY_TYPES: &[&str] = &[
    "PHPUnit\\Framework\\RiskyTestError",
    "PHPUnit\\Framework\\CoveredCodeNotExecutedException",
    "PHPUnit\\Framework\\InvalidCoversTargetException",
    "PHPUnit\\Framework\\MissingCoversAnnotationException",
    "PHPUnit\\Framework\\OutputError",
    "PHPUnit\\Framework\\UnintentionallyCoveredCodeError",
];

/// Why a result document could not be read
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Log file {} is missing", .0.display())]
    Missing(PathBuf),

    #[error("Log file {} is empty", .0.display())]
    Empty(PathBuf),

    #[error("Failed to read log file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Log file {} is not a valid result document: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
}

/// Stateless parser for result documents
#[derive(Clone, Debug)]
pub struct ResultReader {
    risky_types: HashSet<String>,
}

impl Default for ResultReader {
    fn default() -> Self {
        Self::new(DEFAULT_RISKY_TYPES.iter().map(|t| t.to_string()))
    }
}

impl ResultReader {
    pub fn new(risky_types: impl IntoIterator<Item = String>) -> Self {
        Self {
            risky_types: risky_types.into_iter().collect(),
        }
    }

    /// Parse the document at `path`
    pub fn parse(&self, path: &Path) -> Result<ResultDocument, ReadError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ReadError::Missing(path.to_path_buf()))
            }
            Err(source) => {
                return Err(ReadError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let content = String::from_utf8_lossy(&bytes);
        if content.trim().is_empty() {
            return Err(ReadError::Empty(path.to_path_buf()));
        }

        self.parse_str(&content).map_err(|reason| ReadError::Malformed {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse an in-memory document
    pub fn parse_str(&self, xml: &str) -> Result<ResultDocument, String> {
        let mut reader = Reader::from_str(xml);
        reader.check_end_names(true);

        let mut stack: Vec<Frame> = Vec::new();
        let mut suites: Vec<SuiteNode> = Vec::new();
        let mut seen_root = false;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| format!("{e} at byte {}", reader.buffer_position()))?;

            match event {
                Event::Start(e) => {
                    let frame = open(&e)?;
                    seen_root |= frame.is_root();
                    stack.push(frame);
                }
                Event::Empty(e) => {
                    let frame = open(&e)?;
                    seen_root |= frame.is_root();
                    self.close(frame, &mut stack, &mut suites)?;
                }
                Event::End(_) => {
                    let frame = stack.pop().ok_or("unexpected closing tag")?;
                    self.close(frame, &mut stack, &mut suites)?;
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(|e| e.to_string())?;
                    append_text(&mut stack, &text);
                }
                Event::CData(data) => {
                    let data = data.into_inner();
                    append_text(&mut stack, &String::from_utf8_lossy(&data));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err("unexpected end of document".to_string());
        }
        if !seen_root {
            return Err("no testsuites or testsuite element".to_string());
        }

        Ok(ResultDocument::new(suites))
    }

    fn close(
        &self,
        frame: Frame,
        stack: &mut [Frame],
        suites: &mut Vec<SuiteNode>,
    ) -> Result<(), String> {
        match frame {
            Frame::Root | Frame::Ignored => {}
            Frame::Suite(suite) => match stack.last_mut() {
                Some(Frame::Suite(parent)) => parent.push_suite(suite),
                _ => suites.push(suite),
            },
            Frame::Case(pending) => {
                let Some(Frame::Suite(parent)) = stack.last_mut() else {
                    return Err(format!("testcase {} outside of a testsuite", pending.case.name));
                };
                let case = self.finish_case(pending, parent);
                parent.push_case(case);
            }
            Frame::Defect(raw) => {
                if let Some(Frame::Case(pending)) = stack.last_mut() {
                    pending.raw.push(raw);
                }
            }
            Frame::SystemOut(text) => {
                if let Some(Frame::Case(pending)) = stack.last_mut() {
                    pending.system_out.push_str(&text);
                }
            }
        }
        Ok(())
    }

    fn finish_case(&self, pending: PendingCase, parent: &SuiteNode) -> CaseNode {
        let PendingCase {
            mut case,
            raw,
            system_out,
        } = pending;

        // Skipped nodes carry no message body of their own
        let skipped_text = if case.class.is_empty() {
            case.name.clone()
        } else {
            format!("{}::{}\n\n{}:{}", case.class, case.name, case.file, case.line)
        };

        // Data-provider cases sit in a nested suite named `Class::method`
        if case.class.is_empty() {
            case.class = parent
                .name
                .split("::")
                .next()
                .unwrap_or_default()
                .to_string();
        }
        if case.file.is_empty() {
            case.file = parent.file.clone();
        }

        let mut skipped = false;
        for defect in raw {
            let kind = match defect.tag {
                Tag::Failure => DefectKind::Failure,
                Tag::Warning => DefectKind::Warning,
                Tag::Error if self.risky_types.contains(&defect.type_name) => DefectKind::Risky,
                Tag::Error => DefectKind::Error,
                Tag::Skipped => {
                    skipped = true;
                    continue;
                }
            };
            let message = format!("{}{}", defect.text, system_out);
            case.defects
                .push(Defect::new(kind, defect.type_name, message.trim()));
        }

        if skipped {
            case.defects
                .push(Defect::new(DefectKind::Skipped, "", skipped_text));
        }

        case
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tag {
    Failure,
    Error,
    Warning,
    Skipped,
}

#[derive(Debug)]
struct RawDefect {
    tag: Tag,
    type_name: String,
    text: String,
}

#[derive(Debug)]
struct PendingCase {
    case: CaseNode,
    raw: Vec<RawDefect>,
    system_out: String,
}

#[derive(Debug)]
enum Frame {
    Root,
    Suite(SuiteNode),
    Case(PendingCase),
    Defect(RawDefect),
    SystemOut(String),
    Ignored,
}

impl Frame {
    fn is_root(&self) -> bool {
        matches!(self, Frame::Root | Frame::Suite(_))
    }
}

fn open(element: &BytesStart<'_>) -> Result<Frame, String> {
    let tag = match element.name().as_ref() {
        b"testsuites" => return Ok(Frame::Root),
        b"system-out" => return Ok(Frame::SystemOut(String::new())),
        b"testsuite" => {
            let attrs = attributes(element)?;
            return Ok(Frame::Suite(SuiteNode {
                name: text_attr(&attrs, "name"),
                file: text_attr(&attrs, "file"),
                tests: number(&attrs, "tests"),
                assertions: number(&attrs, "assertions"),
                failures: number(&attrs, "failures"),
                errors: number(&attrs, "errors"),
                warnings: number(&attrs, "warnings"),
                skipped: number(&attrs, "skipped"),
                time: number(&attrs, "time"),
                children: Vec::new(),
            }));
        }
        b"testcase" => {
            let attrs = attributes(element)?;
            let class = match attrs.get("class") {
                Some(class) => class.clone(),
                None => text_attr(&attrs, "classname"),
            };
            return Ok(Frame::Case(PendingCase {
                case: CaseNode {
                    name: text_attr(&attrs, "name"),
                    class,
                    file: text_attr(&attrs, "file"),
                    line: number(&attrs, "line"),
                    assertions: number(&attrs, "assertions"),
                    time: number(&attrs, "time"),
                    defects: Vec::new(),
                },
                raw: Vec::new(),
                system_out: String::new(),
            }));
        }
        b"failure" => Tag::Failure,
        b"error" => Tag::Error,
        b"warning" => Tag::Warning,
        b"skipped" => Tag::Skipped,
        _ => return Ok(Frame::Ignored),
    };

    let attrs = attributes(element)?;
    Ok(Frame::Defect(RawDefect {
        tag,
        type_name: text_attr(&attrs, "type"),
        text: String::new(),
    }))
}

fn append_text(stack: &mut [Frame], text: &str) {
    match stack.last_mut() {
        Some(Frame::Defect(raw)) => raw.text.push_str(text),
        Some(Frame::SystemOut(out)) => out.push_str(text),
        _ => {}
    }
}

fn attributes(element: &BytesStart<'_>) -> Result<HashMap<String, String>, String> {
    let mut map = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        map.insert(key, value.into_owned());
    }
    Ok(map)
}

fn text_attr(attrs: &HashMap<String, String>, key: &str) -> String {
    attrs.get(key).cloned().unwrap_or_default()
}

/// Lenient numeric attribute: missing or garbled values count as zero
fn number<T: FromStr + Default>(attrs: &HashMap<String, String>, key: &str) -> T {
    attrs
        .get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_default()
}
