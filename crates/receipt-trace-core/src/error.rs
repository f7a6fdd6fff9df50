//! Error taxonomy for the receipt pipeline.
//!
//! Each pipeline stage has its own error enum so callers can tell an OCR
//! outage from a model schema problem without string matching. Stage
//! failures that abort a run are flattened into a [`StageFailure`] and
//! persisted alongside the receipt for later inspection.

use serde::Serialize;
use thiserror::Error;

/// Failures of the OCR stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OcrError {
    /// The engine is not installed, not reachable, or failed to initialize.
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),
    /// The input bytes are not a readable image.
    #[error("image could not be decoded: {0}")]
    Decode(String),
}

impl OcrError {
    pub fn kind(&self) -> &'static str {
        match self {
            OcrError::Unavailable(_) => "ocr_unavailable",
            OcrError::Decode(_) => "ocr_decode_error",
        }
    }
}

/// Failures of the extraction model stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// Connection failure, timeout, or a non-success HTTP status.
    #[error("extraction service unavailable: {0}")]
    ServiceUnavailable(String),
    /// The service or the model produced text that is not valid JSON.
    #[error("could not parse model output: {0}")]
    Parse(String),
    /// Valid JSON that does not match the field-kind mapping schema.
    #[error("model output violates response schema: {0}")]
    SchemaViolation(String),
}

impl ExtractionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::ServiceUnavailable(_) => "service_unavailable",
            ExtractionError::Parse(_) => "parse_error",
            ExtractionError::SchemaViolation(_) => "schema_violation",
        }
    }

    /// Only transport-level failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractionError::ServiceUnavailable(_))
    }
}

/// Failures of the persistence stage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The source-hash uniqueness invariant was violated, e.g. by a race
    /// the backend could not resolve.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Pipeline stage a [`StageFailure`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ocr,
    Extraction,
}

/// A stage error in the shape stored under `meta_json.error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: String,
    pub message: String,
}

impl From<&OcrError> for StageFailure {
    fn from(err: &OcrError) -> Self {
        Self {
            stage: Stage::Ocr,
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<&ExtractionError> for StageFailure {
    fn from(err: &ExtractionError) -> Self {
        Self {
            stage: Stage::Extraction,
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_from_extraction_error() {
        let err = ExtractionError::SchemaViolation("top level is a string".into());
        let failure = StageFailure::from(&err);
        assert_eq!(failure.stage, Stage::Extraction);
        assert_eq!(failure.kind, "schema_violation");
        assert!(failure.message.contains("top level is a string"));
    }

    #[test]
    fn test_only_service_unavailable_is_transient() {
        assert!(ExtractionError::ServiceUnavailable("timeout".into()).is_transient());
        assert!(!ExtractionError::Parse("eof".into()).is_transient());
        assert!(!ExtractionError::SchemaViolation("x".into()).is_transient());
    }

    #[test]
    fn test_stage_failure_serializes_snake_case() {
        let failure = StageFailure::from(&OcrError::Unavailable("no binary".into()));
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["stage"], "ocr");
        assert_eq!(json["kind"], "ocr_unavailable");
    }
}
