use http::StatusCode;
use thiserror::Error;

/// Error taxonomy shared by every component. The HTTP layer maps kinds to
/// status codes; the booter maps them to process exit codes.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("referenced by an active deployment: {0}")]
    Referenced(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("runtime operation failed: {0}")]
    Runtime(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

impl RegistryError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        RegistryError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::Validation { .. } => StatusCode::BAD_REQUEST,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::AlreadyExists(_) | RegistryError::Referenced(_) => StatusCode::CONFLICT,
            RegistryError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RegistryError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RegistryError::Runtime(_) | RegistryError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Process exit code for CLI-facing failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            RegistryError::Validation { .. } => 3,
            RegistryError::NotFound(_) => 4,
            _ => 1,
        }
    }

    /// Message safe to return to a client. Internal errors are logged in
    /// full but never leak details.
    pub fn public_message(&self) -> String {
        match self {
            RegistryError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::validation("body", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let cases: Vec<(RegistryError, StatusCode)> = vec![
            (
                RegistryError::validation("version", "not semver"),
                StatusCode::BAD_REQUEST,
            ),
            (
                RegistryError::NotFound("io.example/x".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                RegistryError::AlreadyExists("io.example/x@1.0.0".into()),
                StatusCode::CONFLICT,
            ),
            (
                RegistryError::Referenced("io.example/x@1.0.0".into()),
                StatusCode::CONFLICT,
            ),
            (
                RegistryError::Unauthorized("missing bearer".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                RegistryError::Upstream("npm 503".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                RegistryError::Runtime("compose up failed".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, want) in cases {
            assert_eq!(err.status_code(), want, "wrong status for {err}");
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RegistryError::validation("f", "r").exit_code(), 3);
        assert_eq!(RegistryError::NotFound("x".into()).exit_code(), 4);
        assert_eq!(RegistryError::Runtime("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_internal_errors_do_not_leak() {
        let err = RegistryError::Internal("pool exhausted at pg:5432".into());
        assert_eq!(err.public_message(), "internal error");
    }
}
