//! Typed error hierarchy for the assemble orchestrator.
//!
//! Four enums cover the places where callers branch on the failure kind:
//! - `InputError`: trigger-surface validation of the ticket argument
//! - `TrackerError`: ticket provider failures (not found vs. transient)
//! - `StepError`: agent step runner failures
//! - `AssembleError`: everything that aborts a run before any phase executes

use thiserror::Error;

/// Errors from validating the raw ticket argument.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Usage: assemble <TICKET-ID> (for example ENG-123)")]
    Missing,

    #[error("Invalid ticket identifier '{0}': expected <TEAM>-<NUMBER>, e.g. ENG-123")]
    Malformed(String),
}

/// Errors from the issue tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Ticket {0} not found")]
    NotFound(String),

    #[error("Issue tracker rejected the API key")]
    Unauthorized,

    #[error("Issue tracker request failed: {0}")]
    Transient(String),
}

impl TrackerError {
    /// Whether the failure may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, TrackerError::Transient(_))
    }
}

/// Errors from running a single agent step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Failed to spawn agent process '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent process I/O failed: {0}")]
    Io(#[source] std::io::Error),

    #[error("Failed to write step log at {path}: {source}")]
    LogWrite {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that abort a run before (or instead of) the phase pipeline.
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Could not load ticket context: {0}")]
    Context(#[source] TrackerError),

    #[error("Another assemble run is already in progress ({0})")]
    Busy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AssembleError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            AssembleError::Input(_) => 2,
            AssembleError::Context(_) => 3,
            AssembleError::Busy(_) | AssembleError::Config(_) | AssembleError::Other(_) => 1,
        }
    }
}
