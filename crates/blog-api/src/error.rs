use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use blog_search::SearchError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Database closures return `anyhow::Result`; an `ApiError` raised inside
/// one comes back out unchanged, anything else is logged and hidden.
impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<ApiError>() {
            Ok(api) => api,
            Err(e) => {
                error!("Internal error: {:#}", e);
                ApiError::Internal
            }
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        error!("Search backend error: {}", e);
        ApiError::BadGateway("search backend failed".into())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_survives_anyhow_roundtrip() {
        let wrapped: anyhow::Error = ApiError::Conflict("username taken".into()).into();
        let back = ApiError::from(wrapped);
        assert!(matches!(back, ApiError::Conflict(ref m) if m == "username taken"));
        assert_eq!(back.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_foreign_errors_become_internal() {
        let back = ApiError::from(anyhow::anyhow!("disk on fire"));
        assert!(matches!(back, ApiError::Internal));
        assert_eq!(back.to_string(), "internal error");
    }
}
