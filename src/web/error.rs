use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::CoreError;

/// JSON body of every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl CoreError {
    #[must_use]
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidArgument(_) | Self::PlatformRejected(_) => StatusCode::BAD_REQUEST,
            Self::ReplyUnavailable => StatusCode::CONFLICT,
            Self::BusUnavailable(_) | Self::PlatformUnavailable(_) | Self::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::SlowConsumer => StatusCode::TOO_MANY_REQUESTS,
            Self::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        if status.is_server_error() {
            error!(kind = self.kind(), "Request failed: {self:#}");
        } else {
            warn!(kind = self.kind(), "Request rejected: {self}");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(CoreError::Forbidden("x".into()).http_status(), StatusCode::FORBIDDEN);
        assert_eq!(CoreError::NotFound("x".into()).http_status(), StatusCode::NOT_FOUND);
        assert_eq!(CoreError::InvalidArgument("x".into()).http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(CoreError::ReplyUnavailable.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            CoreError::store(anyhow::anyhow!("locked")).http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(CoreError::SlowConsumer.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(CoreError::Fatal("x".into()).http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
