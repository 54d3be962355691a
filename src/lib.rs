//! ParaSuite - run an external test suite across parallel worker processes
//!
//! The orchestrator splits a suite into units (test files, method chains or
//! configured suites), hands them to a pool of long-lived worker processes,
//! reads each unit's JUnit result as it completes and merges everything into
//! one progress stream, one summary, one exit code and optional merged JUnit
//! and coverage reports.
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! | --- | --- |
//! | 0 | every test passed (skips and risky tests allowed) |
//! | 1 | at least one failure |
//! | 2 | at least one error |
//! | 255 | the run itself failed (worker crash, malformed result, ...) |

pub mod cli;
pub mod config;
pub mod coverage;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod models;
pub mod output;
pub mod results;
pub mod utils;

pub use error::{RunnerError, FATAL_EXIT};
