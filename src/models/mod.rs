//! Data models for the parallel runner
//!
//! Test units going in, parsed result documents coming out.

mod document;
mod unit;

pub use document::{
    CaseNode, Defect, DefectKind, FeedbackItem, ResultDocument, SuiteChild, SuiteNode, Tier,
    Totals,
};
pub use unit::{FrameworkOption, Invocation, ScratchDir, TestUnit, UnitKind};
