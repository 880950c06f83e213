//! HTTP error mapping.
//!
//! Every failure leaves the API as `{ "error": <code>, "message": <text> }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use latchkey_core::LatchkeyError;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    inner: LatchkeyError,
    status: Option<StatusCode>,
}

impl ApiError {
    /// Force a status for this error, overriding the default mapping.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or_else(|| default_status(&self.inner))
    }

    pub fn inner(&self) -> &LatchkeyError {
        &self.inner
    }
}

impl From<LatchkeyError> for ApiError {
    fn from(inner: LatchkeyError) -> Self {
        Self { inner, status: None }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

fn default_status(err: &LatchkeyError) -> StatusCode {
    match err {
        LatchkeyError::InvalidInput(_)
        | LatchkeyError::InvalidDevice(_)
        | LatchkeyError::NoPendingCeremony
        | LatchkeyError::NoPasskeys
        | LatchkeyError::UnknownCredential
        | LatchkeyError::CeremonyRejected
        | LatchkeyError::MalformedControlMessage(_) => StatusCode::BAD_REQUEST,
        LatchkeyError::UnknownDevice(_) => StatusCode::NOT_FOUND,
        LatchkeyError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
        LatchkeyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.inner {
            LatchkeyError::Internal(e) => {
                error!(error = ?e, "Internal error while handling request");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: self.inner.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
