//! Result documents: reading, aggregation and persistence
//!
//! Per-unit JUnit documents are parsed by `ResultReader`, folded into a
//! `ResultAggregator`, and finally written out as a merged JUnit report and a
//! JSON run record.

mod aggregator;
pub mod junit;
mod reader;
mod storage;

pub use aggregator::ResultAggregator;
pub use reader::{ReadError, ResultReader, DEFAULT_RISKY_TYPES};
pub use storage::{generate_run_id, RunRecord, ResultsStorage, SuiteSummary};
