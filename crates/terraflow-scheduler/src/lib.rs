//! Job scheduling and execution for Terraflow.
//!
//! Orders a batch of jobs by inter-project dependency, drives each job
//! through its lock → plan → policy → apply lifecycle, reports progress
//! to the originating change request and folds the outcomes into the
//! aggregate signals that gate auto-merge.

pub mod aggregate;
pub mod batch;
pub mod reporter;
pub mod runner;
pub mod scheduler;

#[cfg(test)]
mod testutil;

pub use aggregate::aggregate_results;
pub use batch::BatchRunner;
pub use reporter::{CommentPerRun, ReportStrategy, Reporter, SingleComment};
pub use runner::JobRunner;
pub use scheduler::{Schedule, schedule};
