use axum::http::StatusCode;

/// The shared error taxonomy for every core component.
///
/// Each dialect codec renders the same value into its own envelope shape
/// (JSON `{"__type": ..., "message": ...}`, REST-XML `<Error>...</Error>`,
/// or the CloudFormation `<ErrorResponse>` wrapper) — there is exactly one
/// error type for the whole core, not one per wire format.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The HTTP status every dialect codec should use for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::AlreadyExists(_) => StatusCode::CONFLICT,
            CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The AWS-style `__type` / `<Code>` identifier for this error.
    pub fn aws_code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "ResourceNotFoundException",
            CoreError::AlreadyExists(_) => "ResourceConflictException",
            CoreError::InvalidArgument(_) => "InvalidParameterValueException",
            CoreError::Conflict(_) => "ResourceConflictException",
            CoreError::Internal(_) => "InternalServerError",
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}
