//! Error taxonomy for the aggregation pipeline
//!
//! Only `Fatal` halts a run. `MalformedInput` and `SourceUnavailable` are
//! absorbed by the orchestrator and recorded as counts. Probe failures never
//! surface as errors at all; they are `Verdict` values.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The whole collection was empty or unparsable
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A scraper or remote source could not deliver a collection
    #[error("source '{source_name}' unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// Storage failure while staging or publishing
    #[error("storage failure at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other systemic failure that must abort the run
    #[error("pipeline fatal: {0}")]
    Fatal(String),
}

impl PipelineError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn source_unavailable(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must move the run to `Failed`
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Fatal(_))
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
