use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The roster had no eligible driver. A normal matching outcome.
    #[error("no driver available for booking {booking_id}")]
    NoDriverAvailable { booking_id: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AppError::NotFound(err.to_string()),
            StoreError::Unavailable(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::NoDriverAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::AppError;
    use crate::store::StoreError;

    #[test]
    fn store_not_found_maps_to_not_found() {
        let err: AppError = StoreError::NotFound {
            entity: "booking",
            id: 7,
        }
        .into();

        assert!(matches!(err, AppError::NotFound(ref msg) if msg == "booking 7 not found"));
    }

    #[test]
    fn no_driver_is_distinct_from_not_found() {
        let no_driver = AppError::NoDriverAvailable { booking_id: 3 }.into_response();
        let missing = AppError::NotFound("booking 3 not found".to_string()).into_response();

        assert_eq!(no_driver.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
