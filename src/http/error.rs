//! Error envelope and status mapping for the request API.

use crate::error::{ConflictError, Error, MediaError, UpstreamError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

/// Wire envelope: `{error, message, code?}`.
#[derive(Serialize)]
pub struct ErrorEnvelope {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Media(MediaError::FileTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Media(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(ConflictError::NotConnected) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Upstream(UpstreamError::SendFailed(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Upstream and internal failures keep their detail in the log, not
        // the response.
        let message = match &self.0 {
            Error::Store(e) => {
                error!(error = %e, "store failure");
                "internal error".to_string()
            }
            Error::Internal(e) => {
                error!(error = %e, "internal failure");
                "internal error".to_string()
            }
            Error::Upstream(e) => {
                warn!(error = %e, "upstream failure");
                self.0.to_string()
            }
            other => other.to_string(),
        };
        envelope(status, self.0.code(), message)
    }
}

/// Build an envelope response directly; used for transport-level rejections
/// (auth, rate limit) that never reach the gateway.
pub fn envelope(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    let body = ErrorEnvelope {
        error,
        message: message.into(),
        code: None,
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn status_mapping() {
        let cases: Vec<(Error, StatusCode)> = vec![
            (
                ValidationError::InvalidIdentifier.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::Conflict(ConflictError::DuplicateName("a".into())),
                StatusCode::CONFLICT,
            ),
            (
                Error::Conflict(ConflictError::NotConnected),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::NotFound(crate::error::Resource::Session),
                StatusCode::NOT_FOUND,
            ),
            (
                Error::Media(MediaError::FileTooLarge {
                    category: "image",
                    size: 1,
                    limit: 0,
                }),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (Error::Media(MediaError::Conflict), StatusCode::BAD_REQUEST),
            (
                Error::Upstream(UpstreamError::DownloadFailed { status: 500 }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                Error::Upstream(UpstreamError::SendFailed("x".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (Error::RateLimited, StatusCode::TOO_MANY_REQUESTS),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).status(), expected);
        }
    }
}
