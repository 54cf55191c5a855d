//! Error types for cost evaluation.

use thiserror::Error;

/// Errors produced by the cost engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CostError {
    /// An input was negative, NaN, or infinite.
    #[error("invalid cost input {field}: {value} (must be a non-negative finite number)")]
    InvalidInput {
        /// Name of the offending input.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
}

impl CostError {
    /// Name of the input that was rejected.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::InvalidInput { field, .. } => field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_display() {
        let err = CostError::InvalidInput {
            field: "price_per_hour",
            value: -1.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("price_per_hour"));
        assert!(msg.contains("-1"));
    }

    #[test]
    fn test_field_accessor() {
        let err = CostError::InvalidInput {
            field: "duration_hours",
            value: f64::NAN,
        };
        assert_eq!(err.field(), "duration_hours");
    }
}
