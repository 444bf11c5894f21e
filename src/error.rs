// 🚨 Pipeline errors
// Every variant is terminal for the current run. Missing indicator values are
// not errors: they travel through the pipeline as `None`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("source '{source_name}' unavailable at {path}: {reason}")]
    SourceUnavailable {
        source_name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("source '{source_name}' has no '{column}' column (available: {available:?})")]
    SchemaMismatch {
        source_name: String,
        column: String,
        available: Vec<String>,
    },

    #[error("source '{source_name}' line {line}: column '{column}' has unusable value '{value}'")]
    MalformedCell {
        source_name: String,
        line: usize,
        column: String,
        value: String,
    },

    #[error("country '{country}' maps to more than one continent: {continents:?}")]
    JoinKeyCollision {
        country: String,
        continents: Vec<String>,
    },

    #[error("no rows left after {stage}")]
    EmptyResult { stage: String },

    #[error("boundary dataset unavailable from {location}: {reason}")]
    BoundarySourceUnavailable { location: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub(crate) fn source_unavailable(
        source_name: &str,
        path: impl Into<PathBuf>,
        reason: impl ToString,
    ) -> Self {
        PipelineError::SourceUnavailable {
            source_name: source_name.to_string(),
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn boundary_unavailable(location: &str, reason: impl ToString) -> Self {
        PipelineError::BoundarySourceUnavailable {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-readable code, used by the API layer.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::SourceUnavailable { .. } => "source_unavailable",
            PipelineError::SchemaMismatch { .. } => "schema_mismatch",
            PipelineError::MalformedCell { .. } => "malformed_cell",
            PipelineError::JoinKeyCollision { .. } => "join_key_collision",
            PipelineError::EmptyResult { .. } => "empty_result",
            PipelineError::BoundarySourceUnavailable { .. } => "boundary_source_unavailable",
            PipelineError::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_source() {
        let err = PipelineError::SchemaMismatch {
            source_name: "birth_rate".to_string(),
            column: "country".to_string(),
            available: vec!["Nation".to_string(), "Year".to_string()],
        };

        let msg = err.to_string();
        assert!(msg.contains("birth_rate"));
        assert!(msg.contains("Nation"));
        assert_eq!(err.code(), "schema_mismatch");
    }

    #[test]
    fn test_empty_result_code() {
        let err = PipelineError::EmptyResult {
            stage: "known-country restriction".to_string(),
        };
        assert_eq!(err.code(), "empty_result");
        assert_eq!(err.to_string(), "no rows left after known-country restriction");
    }
}
