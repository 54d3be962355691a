//! Test execution engine
//!
//! Runs test units across a pool of long-lived worker processes and folds
//! their results into one run.

mod pool;
mod runner;
mod worker;
pub mod wrapper;

pub use pool::{PoolOptions, RunState, WorkerPool};
pub use runner::{order_units, RunOutcome, Runner};
pub use worker::{Worker, WorkerCommand, WorkerEvent, WorkerSignal, WorkerState};
