use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the congress library.
///
/// Adverse but valid election input (ties, empty ballots, abstentions) is
/// never an error; it is reported through [`crate::models::VerdictStatus`].
#[derive(Debug, Error)]
pub enum CongressError {
    /// The voter registry is unusable (missing directory, no eligible voters,
    /// a voter that could not be constructed). Fatal, no election is attempted.
    #[error("voter registry configuration error: {0}")]
    Configuration(String),

    /// A single voter's inference call failed or returned an invalid
    /// prediction. Recovered by the election runner.
    #[error("voter {voter} failed: {reason}")]
    VoterFailure { voter: String, reason: String },

    /// A batch CSV is missing expected columns or contains values that cannot
    /// be interpreted.
    #[error("malformed batch input {}: {reason}", .path.display())]
    MalformedBatchInput { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl CongressError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedBatchInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }

    /// True for errors that describe bad batch structure rather than I/O trouble.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, Self::MalformedBatchInput { .. })
    }
}

pub type Result<T> = std::result::Result<T, CongressError>;

/// A single value that failed validation, before it is tied to a file or a
/// voter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidValue {
    #[error("'{0}' is not a class label")]
    ClassLabel(String),

    #[error("'{0}' is not a confidence value")]
    Confidence(String),

    #[error("{which} confidence {value} is outside [0, 1]")]
    ConfidenceOutOfRange { which: &'static str, value: f64 },

    #[error("secondary confidence {secondary} exceeds primary confidence {primary}")]
    SecondaryExceedsPrimary { primary: f64, secondary: f64 },
}
