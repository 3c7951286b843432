use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::identity::VerifyError;
use crate::prelude::*;

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("Unauthorized: No token provided or malformed header."))]
    MissingToken,

    #[snafu(display("Unauthorized: ID token expired."))]
    ExpiredToken,

    #[snafu(display("Unauthorized: Invalid ID token."))]
    InvalidToken { source: VerifyError },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingToken | ApiError::ExpiredToken | ApiError::InvalidToken { .. } => {
                StatusCode::UNAUTHORIZED
            }
        }
    }
}

impl From<VerifyError> for ApiError {
    fn from(source: VerifyError) -> Self {
        if source.is_expired() {
            ApiError::ExpiredToken
        } else {
            ApiError::InvalidToken { source }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let content = ErrorResponse {
            error: self.to_string(),
        };

        (self.status(), Json(content)).into_response()
    }
}
