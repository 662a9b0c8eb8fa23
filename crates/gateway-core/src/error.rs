use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_provider_core::error::GatewayError;

/// Wraps a `GatewayError` plus the routing context it doesn't carry
/// itself, so the error body can report `requested_*`/`used_*` per
/// spec §7 even when resolution failed before a provider was chosen.
#[derive(Debug)]
pub struct ApiError {
    pub source: GatewayError,
    pub requested_provider: Option<String>,
    pub used_provider: Option<String>,
    pub requested_model: Option<String>,
    pub used_model: Option<String>,
}

impl ApiError {
    pub fn new(source: GatewayError) -> Self {
        Self {
            source,
            requested_provider: None,
            used_provider: None,
            requested_model: None,
            used_model: None,
        }
    }

    pub fn with_models(mut self, requested_model: Option<String>, used_model: Option<String>) -> Self {
        self.requested_model = requested_model;
        self.used_model = used_model;
        self
    }

    pub fn with_providers(mut self, requested_provider: Option<String>, used_provider: Option<String>) -> Self {
        self.requested_provider = requested_provider;
        self.used_provider = used_provider;
        self
    }
}

impl From<GatewayError> for ApiError {
    fn from(source: GatewayError) -> Self {
        Self::new(source)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.source.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = self.source.to_error_body(
            self.requested_provider,
            self.used_provider,
            self.requested_model,
            self.used_model,
        );
        (status, Json(body)).into_response()
    }
}
