//! Engine error taxonomy
//!
//! Mirrors the failure classes the pipeline distinguishes:
//! malformed input (dropped + counted), transient upstream conditions,
//! internal invariant violations, configuration errors, and storage faults.
//! Stage boundaries return `Result`; nothing unwinds across them.

use thiserror::Error;

/// Category tag for malformed-input drops, used by the per-category counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputErrorKind {
    /// Unparseable message body
    Unparseable,
    /// NaN, infinite, or negative quantity
    BadQuantity,
    /// Price not aligned to the tick grid
    OffGridPrice,
    /// Event time regressed or is otherwise unusable
    BadTimestamp,
}

impl InputErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputErrorKind::Unparseable => "unparseable",
            InputErrorKind::BadQuantity => "bad_quantity",
            InputErrorKind::OffGridPrice => "off_grid_price",
            InputErrorKind::BadTimestamp => "bad_timestamp",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Class 1: malformed input, dropped without mutating state
    #[error("malformed input ({}): {detail}", kind.as_str())]
    MalformedInput {
        kind: InputErrorKind,
        detail: String,
    },

    /// Class 2: transient external condition, adapter-level recovery
    #[error("transient upstream condition: {0}")]
    Transient(String),

    /// Class 3: internal invariant violation, offending event discarded
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Class 4: configuration error, refused at startup or on live update
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Persistence layer fault
    #[error("storage error: {0}")]
    Storage(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether this error may resolve on its own (adapter retries)
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient(_) | EngineError::Storage(_))
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::MalformedInput { .. } => "malformed_input",
            EngineError::Transient(_) => "transient",
            EngineError::InvariantViolation(_) => "invariant_violation",
            EngineError::Configuration(_) => "configuration",
            EngineError::Storage(_) => "storage",
            EngineError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_tags() {
        let err = EngineError::MalformedInput {
            kind: InputErrorKind::OffGridPrice,
            detail: "65.001".to_string(),
        };
        assert_eq!(err.error_type(), "malformed_input");
        assert!(!err.is_retryable());
        assert!(EngineError::Transient("disconnect".into()).is_retryable());
    }
}
