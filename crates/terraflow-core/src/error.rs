//! Error types for Terraflow.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("lock denied: {resource} is held by {holder}")]
    LockDenied { resource: String, holder: String },

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("step failed: {0}")]
    StepFailed(String),

    #[error("plan storage error: {0}")]
    Storage(String),

    #[error("reporting error: {0}")]
    Reporting(String),

    #[error("provisioner error: {0}")]
    Provisioner(String),

    #[error("change request service error: {0}")]
    Vcs(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
