//! Console output
//!
//! Progress characters while units complete, then the run summary.

mod reporter;

pub use reporter::{Reporter, RunHeader};
