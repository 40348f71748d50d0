//! Error types for the prediction engine

use crate::models::VersionId;
use thiserror::Error;

/// Errors surfaced by training, the model registry and inference.
///
/// Encoding anomalies (unknown category, missing location or text) never
/// show up here; the encoder absorbs them into reserved buckets.
#[derive(Error, Debug)]
pub enum PredictorError {
    #[error(
        "insufficient training data: {labeled} labeled reports across {classes} priority classes \
         (need at least {required} across 2 classes)"
    )]
    InsufficientData {
        labeled: usize,
        classes: usize,
        required: usize,
    },

    #[error("training failed: {0}")]
    TrainingFailed(String),

    #[error("no active model: prediction unavailable, fall back to manual triage")]
    NoActiveModel,

    #[error("feature schema mismatch: model expects {expected}, vector was built with {found}")]
    SchemaMismatch { expected: String, found: String },

    #[error("unknown model version {0}")]
    UnknownVersion(VersionId),

    #[error("history provider failed: {0}")]
    History(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PredictorError {
    /// Errors after which the caller should fall back to manual triage
    /// rather than treat the request as failed.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            PredictorError::NoActiveModel | PredictorError::SchemaMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PredictorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_classification() {
        assert!(PredictorError::NoActiveModel.is_fallback());
        assert!(PredictorError::SchemaMismatch {
            expected: "a".into(),
            found: "b".into()
        }
        .is_fallback());
        assert!(!PredictorError::TrainingFailed("nan".into()).is_fallback());
    }

    #[test]
    fn test_messages() {
        let err = PredictorError::InsufficientData {
            labeled: 3,
            classes: 2,
            required: 20,
        };
        assert!(err.to_string().contains("3 labeled reports"));
        assert_eq!(
            PredictorError::UnknownVersion(VersionId(4)).to_string(),
            "unknown model version v4"
        );
    }
}
