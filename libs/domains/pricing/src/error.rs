use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for pricing operations
pub type PricingResult<T> = Result<T, PricingError>;

/// Errors that can occur in the pricing domain
#[derive(Debug, Error)]
pub enum PricingError {
    /// No price record for the requested region or instance type
    #[error("Price not found: {0}")]
    NotFound(String),

    /// The seed snapshot could not be decoded
    #[error("Invalid seed snapshot: {0}")]
    Seed(#[source] serde_json::Error),

    /// Catalog could not be encoded
    #[error("Failed to encode catalog: {0}")]
    Encode(#[source] serde_json::Error),

    /// Remote price server call failed
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Remote price server answered with an unexpected status
    #[error("Upstream returned status {0}")]
    UpstreamStatus(u16),
}

impl IntoResponse for PricingError {
    fn into_response(self) -> Response {
        match &self {
            // Not-found carries no payload: "not fetched yet" and "does not exist" look the same
            PricingError::NotFound(_) => StatusCode::NOT_FOUND.into_response(),
            PricingError::Upstream(_) | PricingError::UpstreamStatus(_) => {
                error_body(StatusCode::BAD_GATEWAY, self.to_string())
            }
            PricingError::Seed(_) | PricingError::Encode(_) => {
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        }
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    let body = Json(json!({
        "error": message,
        "code": status.as_u16()
    }));
    (status, body).into_response()
}
