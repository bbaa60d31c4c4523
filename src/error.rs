use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure while substituting session variables into a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("session has no variable `{0}`")]
    Missing(String),

    #[error("variable `{0}` holds a structured value and cannot be rendered as text")]
    NotScalar(String),

    #[error("header `{name}` does not render to a valid header")]
    InvalidHeader { name: String },
}

/// Everything that can make a single step fail.
///
/// Step errors never escape a virtual user: they are recorded against the step
/// name and the failure policy decides what happens to the rest of the chain.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("could not extract {target}: {reason}")]
    Extraction { target: String, reason: String },

    #[error("{target}: expected {expected:?}, found {actual:?}")]
    Assertion {
        target: String,
        expected: String,
        actual: String,
    },

    #[error("request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("request timed out after {timeout:?}")]
    Timeout {
        timeout: Duration,
        #[source]
        source: reqwest::Error,
    },
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Template(_) => ErrorKind::Template,
            Self::Extraction { .. } => ErrorKind::Extraction,
            Self::Assertion { .. } => ErrorKind::Assertion,
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}

/// Errors raised by feeders, either while loading records or while drawing them.
#[derive(Debug, Error)]
pub enum FeederError {
    #[error("feeder `{feeder}` ran out of records after {records} draws")]
    Exhausted { feeder: String, records: usize },

    #[error("feeder `{0}` has no records")]
    Empty(String),

    #[error("could not read feeder file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse feeder records: {0}")]
    Json(#[from] serde_json::Error),

    #[error("feeder record #{index} is not a JSON object")]
    InvalidRecord { index: usize },
}

/// Errors that prevent a run from starting at all.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not build the HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid default header `{name}`")]
    InvalidHeader { name: String },
}

/// Serializable tag for a failure, used as the counting key in aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Template,
    Extraction,
    Assertion,
    Network,
    Timeout,
    Exhausted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Template => "template",
            Self::Extraction => "extraction",
            Self::Assertion => "assertion",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}
