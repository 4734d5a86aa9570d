use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Error surface of the API. Everything auth-sensitive is mapped into one of
/// these variants at the service boundary; internals never leak to clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("identifier already in use")]
    DuplicateIdentifier,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid or expired code")]
    OtpInvalidOrExpired,
    #[error("unauthorized")]
    Unauthorized,
    #[error("account not verified")]
    NotVerified,
    #[error("too many requests")]
    Throttled { retry_after: u64 },
    #[error("not found")]
    NotFound,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::DuplicateIdentifier => "DUPLICATE_IDENTIFIER",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::OtpInvalidOrExpired => "OTP_INVALID_OR_EXPIRED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotVerified => "NOT_VERIFIED",
            Self::Throttled { .. } => "THROTTLED",
            Self::NotFound => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::OtpInvalidOrExpired => StatusCode::BAD_REQUEST,
            Self::DuplicateIdentifier => StatusCode::CONFLICT,
            Self::InvalidCredentials | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotVerified => StatusCode::FORBIDDEN,
            Self::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // 4xx are expected client outcomes and already traced by the HTTP
        // span; only internal errors need the cause chain in the log.
        if let Self::Internal(ref e) = self {
            tracing::error!(error = %e, "internal error");
        }
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        let mut response = (status, Json(body)).into_response();
        if let Self::Throttled { retry_after } = self {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            _ => Self::Internal(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn response_json(response: Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[tokio::test]
    async fn maps_status_and_code() {
        let (status, json) = response_json(ApiError::DuplicateIdentifier.into_response()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["code"], "DUPLICATE_IDENTIFIER");

        let (status, json) = response_json(ApiError::InvalidCredentials.into_response()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "invalid credentials");

        let (status, json) = response_json(ApiError::OtpInvalidOrExpired.into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "OTP_INVALID_OR_EXPIRED");

        let (status, _) = response_json(ApiError::Unauthorized.into_response()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn throttled_sets_retry_after() {
        let response = ApiError::Throttled { retry_after: 17 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "17");
    }

    #[tokio::test]
    async fn internal_hides_the_cause() {
        let (status, json) =
            response_json(ApiError::Internal(anyhow::anyhow!("pool exhausted")).into_response())
                .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "internal error");
        assert!(!json.to_string().contains("pool"));
    }

    #[test]
    fn row_not_found_is_not_internal() {
        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, ApiError::NotFound));
    }
}
