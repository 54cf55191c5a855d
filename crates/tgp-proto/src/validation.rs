//! Field validation shared by job and node specs.

use crate::error::ProtoError;

/// Longest accepted node or job identifier.
pub const MAX_ID_LEN: usize = 128;

/// Upper bound on requested or declared CPU, in millicores (4096 cores).
pub const MAX_CPU_MILLIS: u64 = 4096 * 1000;

/// Upper bound on requested or declared memory, in MiB (64 TiB).
pub const MAX_MEMORY_MIB: u64 = 64 * 1024 * 1024;

/// Upper bound on requested or declared GPUs.
pub const MAX_GPU_COUNT: u32 = 256;

/// A single failed field check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// What was wrong with it.
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for ProtoError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e.to_string())
    }
}

/// Collects every failed check so callers can report them together.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    /// Create an empty result.
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Record the error of a check, if it failed.
    pub fn check<T>(&mut self, result: Result<T, ValidationError>) {
        if let Err(e) = result {
            self.errors.push(e);
        }
    }

    /// Record an error.
    pub fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError::new(field, message));
    }

    /// Whether every check passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// All recorded errors.
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Convert into a protocol error listing every failure.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Validation`] if any check failed.
    pub fn into_result(self) -> Result<(), ProtoError> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let joined = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(ProtoError::Validation(joined))
    }
}

/// Validate a node or job identifier.
///
/// Identifiers are compared lexicographically for tie-breaking, so they are
/// restricted to a predictable ASCII alphabet.
///
/// # Errors
///
/// Returns an error if the identifier is empty, too long, or contains
/// characters other than ASCII alphanumerics, `-`, `_`, `.` and `:`.
pub fn validate_identifier(field: &str, id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::new(field, "cannot be empty"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::new(
            field,
            format!("cannot exceed {MAX_ID_LEN} characters"),
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(ValidationError::new(
            field,
            "may only contain alphanumerics, '-', '_', '.' and ':'",
        ));
    }
    Ok(())
}

/// Validate a container image reference.
///
/// # Errors
///
/// Returns an error if the reference is empty, contains whitespace, or has a
/// dangling separator.
pub fn validate_image(image: &str) -> Result<(), ValidationError> {
    if image.is_empty() {
        return Err(ValidationError::new("image", "cannot be empty"));
    }
    if image.contains(char::is_whitespace) {
        return Err(ValidationError::new("image", "cannot contain whitespace"));
    }
    if image.starts_with([':', '@', '/']) || image.ends_with([':', '@', '/']) {
        return Err(ValidationError::new("image", "has a dangling separator"));
    }
    Ok(())
}

/// Validate a quantity that feeds the cost formula.
///
/// # Errors
///
/// Returns an error if the value is negative, NaN, or infinite.
pub fn validate_amount(field: &'static str, value: f64) -> Result<(), ValidationError> {
    tgp_cost::validate_input(field, value)
        .map(|_| ())
        .map_err(|e| ValidationError::new(field, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("node-a" ; "dashed")]
    #[test_case("vps_01.eu-west:2" ; "mixed separators")]
    #[test_case("A" ; "single char")]
    fn test_valid_identifiers(id: &str) {
        assert!(validate_identifier("node_id", id).is_ok());
    }

    #[test_case("" ; "empty")]
    #[test_case("has space" ; "whitespace")]
    #[test_case("slash/ed" ; "slash")]
    #[test_case("ünïcode" ; "non ascii")]
    fn test_invalid_identifiers(id: &str) {
        let err = validate_identifier("node_id", id).unwrap_err();
        assert_eq!(err.field, "node_id");
    }

    #[test]
    fn test_identifier_too_long() {
        let id = "x".repeat(MAX_ID_LEN + 1);
        assert!(validate_identifier("job_id", &id).is_err());
        assert!(validate_identifier("job_id", &id[..MAX_ID_LEN]).is_ok());
    }

    #[test_case("alpine:latest", true ; "tagged")]
    #[test_case("ghcr.io/org/app@sha256:abc", true ; "digest")]
    #[test_case("", false ; "empty")]
    #[test_case("alpine latest", false ; "space")]
    #[test_case("alpine:", false ; "dangling colon")]
    #[test_case("/alpine", false ; "leading slash")]
    fn test_validate_image(image: &str, ok: bool) {
        assert_eq!(validate_image(image).is_ok(), ok);
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount("budget_usd", 0.0).is_ok());
        assert!(validate_amount("budget_usd", -0.5).is_err());
        assert!(validate_amount("budget_usd", f64::NAN).is_err());
    }

    #[test]
    fn test_result_collects_all_errors() {
        let mut result = ValidationResult::new();
        result.check(validate_identifier("job_id", ""));
        result.check(validate_image(""));
        result.check(validate_amount("budget_usd", 1.0));

        assert!(!result.is_valid());
        assert_eq!(result.errors().len(), 2);

        let err = result.into_result().unwrap_err().to_string();
        assert!(err.contains("job_id"));
        assert!(err.contains("image"));
    }

    #[test]
    fn test_empty_result_is_ok() {
        assert!(ValidationResult::new().into_result().is_ok());
    }
}
