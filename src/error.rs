use std::io;

/// Error type shared by handlers, middleware and the dispatcher.
///
/// `Http` is the variant produced by [`Context::throw`](crate::context::Context::throw)
/// and carries the status the response should use; every other variant maps
/// to a fixed status via [`ServerError::status_code`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found")]
    NotFound,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Internal error: {0}")]
    InternalError(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Panic: {0}")]
    PanicError(String),
    #[error("Too many requests")]
    TooManyRequests,
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        request_id: Option<String>,
    },
    #[error("Setup error: {0}")]
    SetupError(String),
}

impl ServerError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::BadRequest(_) => 400,
            ServerError::Unauthorized(_) => 401,
            ServerError::Forbidden(_) => 403,
            ServerError::NotFound => 404,
            ServerError::Conflict(_) => 409,
            ServerError::ParseError(_) => 422,
            ServerError::ValidationError(_) => 422,
            ServerError::TooManyRequests => 429,
            ServerError::Http { status, .. } => *status,
            // Filesystem failures surface with the closest HTTP meaning.
            ServerError::IoError(err) => match err.kind() {
                io::ErrorKind::NotFound => 404,
                io::ErrorKind::PermissionDenied => 403,
                _ => 500,
            },
            ServerError::InternalError(_)
            | ServerError::PanicError(_)
            | ServerError::SetupError(_) => 500,
        }
    }

    /// Status-carrying error for aborting a handler early, without raising.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        ServerError::Http {
            status,
            message: message.into(),
            request_id: None,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
