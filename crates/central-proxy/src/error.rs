//! Error types for the central gateway
//!
//! Every component returns one of these variants up to the handler, which is
//! the only place that turns them into HTTP responses. Infrastructure failures
//! stay distinguishable from permission denials so callers know which errors
//! are worth retrying (503, some 500s) and which are not (401, 403).

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for gateway operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Authentication failed (missing, malformed or rejected token)
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Authorization denied by cluster RBAC
    #[error("authorization failed: {0}")]
    Forbidden(String),

    /// Request could not be interpreted
    #[error("bad request: {0}")]
    BadRequest(String),

    /// HTTP method not supported by the gateway
    #[error("not implemented: {0}")]
    Unimplemented(String),

    /// Central or the token service is not reachable yet; retryable
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Failed to reach central or to exchange credentials with it
    #[error("proxy error: {0}")]
    Proxy(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error, including RBAC evaluation errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status surfaced to the caller for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Proxy(_) | Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = format!("{}\n", self);

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response.headers_mut().insert(
            header::X_CONTENT_TYPE_OPTIONS,
            header::HeaderValue::from_static("nosniff"),
        );
        response
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Proxy(e.to_string())
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Unavailable => Error::ServiceUnavailable(format!(
                "central token service unreachable: {}",
                status.message()
            )),
            code => Error::Proxy(format!(
                "requesting scoped token from central: {:?}: {}",
                code,
                status.message()
            )),
        }
    }
}
