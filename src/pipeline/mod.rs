//! Worker pipeline: the nine-stage state machine turning a raw upload into
//! a persisted candidate record.
//!
//! Stage order: router → parser → document classifier (gated) → identity
//! check → cross-check analysis → validation → coverage (gated) → gap fill
//! (gated) → privacy → embedding → persist. The runner owns transitions,
//! webhook phases, redelivery resume, and the usage commit.

pub mod analyze;
pub mod classify;
pub mod coverage;
pub mod parser;
pub mod privacy;
pub mod router;
pub mod runner;
pub mod validate;

pub use runner::{Worker, WorkerDeps, spawn_sweeper, spawn_workers};

use thiserror::Error;

use crate::llm::LlmError;
use crate::model::ErrorCode;
use crate::storage::StorageError;
use crate::store::StoreError;

/// A stage failure carrying the machine-readable code the job surfaces.
///
/// Transient failures (LLM timeouts that survived the bounded retry, open
/// circuits, persist conflicts) are nacked back to the queue for another
/// delivery; everything else is terminal and the job fails with the code.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct StageError {
    pub code: ErrorCode,
    pub message: String,
    transient: bool,
}

impl StageError {
    pub fn fatal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            transient: true,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

impl From<parser::ParseError> for StageError {
    fn from(e: parser::ParseError) -> Self {
        let code = match &e {
            parser::ParseError::ParseFailed(_) => ErrorCode::ParseFailed,
            parser::ParseError::TextTooShort(_) => ErrorCode::TextTooShort,
        };
        Self::fatal(code, e.to_string())
    }
}

impl From<privacy::PrivacyError> for StageError {
    fn from(e: privacy::PrivacyError) -> Self {
        Self::fatal(ErrorCode::CryptoFailure, e.to_string())
    }
}

impl From<LlmError> for StageError {
    fn from(e: LlmError) -> Self {
        match &e {
            LlmError::CircuitOpen(_) => Self::transient(ErrorCode::CircuitOpen, e.to_string()),
            // bounded retry already happened inside the manager; what
            // escapes as transient is worth one more delivery
            _ if e.is_transient() => Self::transient(ErrorCode::AnalysisFailed, e.to_string()),
            _ => Self::fatal(ErrorCode::AnalysisFailed, e.to_string()),
        }
    }
}

impl From<StoreError> for StageError {
    fn from(e: StoreError) -> Self {
        Self::transient(ErrorCode::PersistFailed, e.to_string())
    }
}

impl From<StorageError> for StageError {
    fn from(e: StorageError) -> Self {
        match &e {
            StorageError::NotFound(_) => Self::fatal(ErrorCode::InternalError, e.to_string()),
            _ => Self::transient(ErrorCode::InternalError, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_mapping() {
        let err: StageError = LlmError::CircuitOpen("primary".into()).into();
        assert_eq!(err.code, ErrorCode::CircuitOpen);
        assert!(err.is_transient());

        let err: StageError = LlmError::Timeout.into();
        assert_eq!(err.code, ErrorCode::AnalysisFailed);
        assert!(err.is_transient());

        // schema violations are terminal: retrying the same document will
        // not make the model's answer parse
        let err: StageError = LlmError::SchemaViolation("bad".into()).into();
        assert_eq!(err.code, ErrorCode::AnalysisFailed);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_error_mapping() {
        let err: StageError = parser::ParseError::TextTooShort(12).into();
        assert_eq!(err.code, ErrorCode::TextTooShort);
        assert!(!err.is_transient());
    }
}
