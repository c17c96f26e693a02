//! Error taxonomy for supervision and search
//!
//! Throughput regression is deliberately absent: it is a supervisor
//! transition (`RunState::Reset`), not a failure.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the tuning core
#[derive(Debug, Error)]
pub enum TuneError {
    /// A privileged resource-group operation failed. Fatal for the run.
    #[error("resource group setup failed at {path}: {reason}")]
    Setup { path: PathBuf, reason: String },

    /// The benchmark process could not be started. Fatal for the run.
    #[error("failed to launch benchmark `{program}`: {reason}")]
    ProcessLaunch { program: String, reason: String },

    /// The benchmark rejected the supplied configuration and the
    /// error-correction budget is spent.
    #[error("benchmark rejected configuration after {attempts} correction attempts: {detail}")]
    ConfigParse { attempts: u32, detail: String },

    /// Writing to the shared-memory channel failed. Logged, never fatal.
    #[error("live configuration channel write failed: {0}")]
    LiveChannelWrite(String),

    /// The proposer broke its contract (wrong child count, malformed delta).
    #[error("proposer contract violation: {0}")]
    ProposerContractViolation(String),

    /// The proposer or oracle could not be reached or answered garbage.
    #[error("oracle request failed: {0}")]
    Oracle(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TuneError {
    pub fn setup(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Setup {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn wrong_child_count(expected: usize, got: usize) -> Self {
        Self::ProposerContractViolation(format!(
            "expected exactly {expected} children, got {got}"
        ))
    }

    /// True for errors that must abort the whole top-level run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TuneError::Setup { .. } | TuneError::ProcessLaunch { .. } | TuneError::ConfigParse { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TuneError>;
