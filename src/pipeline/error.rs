//! Errors raised by the long-running pipeline tasks
//!
//! Every variant is treated as retryable by the supervisor; exhaustion is
//! what turns one of these into a `FatalError`.

use super::types::ParseError;
use crate::store::StoreError;

#[derive(Debug)]
pub enum PipelineError {
    Io(std::io::Error),
    /// A log line could not be parsed (line numbers are 1-based, header included)
    Parse {
        line_number: u64,
        source: ParseError,
    },
    /// A queued payload could not be decoded back into a record
    Decode(serde_json::Error),
    Store(StoreError),
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Store(err)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Decode(err)
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Io(e) => write!(f, "IO error: {}", e),
            PipelineError::Parse { line_number, source } => {
                write!(f, "Parse error on line {}: {}", line_number, source)
            }
            PipelineError::Decode(e) => write!(f, "Queue payload decode error: {}", e),
            PipelineError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Io(e) => Some(e),
            PipelineError::Parse { source, .. } => Some(source),
            PipelineError::Decode(e) => Some(e),
            PipelineError::Store(e) => Some(e),
        }
    }
}
