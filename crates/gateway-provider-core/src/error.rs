use gateway_protocol::{ErrorBody, ErrorDetail};

/// Every failure kind a request can terminate in before or during
/// dispatch. Variants carry only what's needed to fill the error body —
/// the HTTP status and `type`/`code` strings are derived, not stored.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("request body is not a valid chat completion request: {0}")]
    InvalidRequestBody(String),
    #[error("missing Authorization header")]
    AuthMissing,
    #[error("malformed Authorization header")]
    AuthMalformed,
    #[error("invalid or disabled API key")]
    AuthInvalid,
    #[error("model `{0}` is not supported")]
    UnsupportedModel(String),
    #[error("model `{0}` must be qualified as `provider/model`")]
    ModelProviderPrefixRequired(String),
    #[error("provider `{0}` is not supported")]
    ProviderUnsupported(String),
    #[error("no custom provider named `{0}` is configured for this organization")]
    CustomProviderNotFound(String),
    #[error("model `{0}` has been deactivated")]
    ModelDeactivated(String),
    #[error("model `{0}` does not support response_format=json_object")]
    JsonOutputUnsupported(String),
    #[error("model `{0}` does not support reasoning_effort")]
    ReasoningUnsupported(String),
    #[error("provider `{provider}` does not support streaming for model `{model}`")]
    StreamingUnsupported { model: String, provider: String },
    #[error("max_tokens exceeds the provider mapping's max_output of {max_output}")]
    MaxTokensExceedsMaxOutput { max_output: u32 },
    #[error("no stored provider key for provider `{0}`")]
    NoProviderKey(String),
    #[error("no environment credential configured for provider `{0}`")]
    NoProviderEnv(String),
    #[error("custom providers are not permitted in credits mode")]
    CustomInCreditsMode,
    #[error("organization has insufficient credits")]
    InsufficientCredits,
    #[error("no available provider for model `{0}`")]
    NoAvailableProvider(String),
    #[error("upstream returned an error response")]
    UpstreamHttpError {
        status: u16,
        response_text: Option<String>,
    },
    #[error("upstream transport failure: {0}")]
    UpstreamTransportError(String),
    #[error("client canceled the request")]
    ClientCanceled,
    #[error("project not found for this api key")]
    ProjectNotFound,
}

impl GatewayError {
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::AuthMissing | GatewayError::AuthMalformed | GatewayError::AuthInvalid => {
                401
            }
            GatewayError::ModelDeactivated(_) => 410,
            GatewayError::InsufficientCredits => 402,
            GatewayError::UpstreamHttpError { .. }
            | GatewayError::UpstreamTransportError(_)
            | GatewayError::ProjectNotFound => 500,
            _ => 400,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequestBody(_) => "invalid_request_body",
            GatewayError::AuthMissing => "auth_missing",
            GatewayError::AuthMalformed => "auth_malformed",
            GatewayError::AuthInvalid => "auth_invalid",
            GatewayError::UnsupportedModel(_) => "unsupported_model",
            GatewayError::ModelProviderPrefixRequired(_) => "model_provider_prefix_required",
            GatewayError::ProviderUnsupported(_) => "provider_unsupported",
            GatewayError::CustomProviderNotFound(_) => "custom_provider_not_found",
            GatewayError::ModelDeactivated(_) => "model_deactivated",
            GatewayError::JsonOutputUnsupported(_) => "json_output_unsupported",
            GatewayError::ReasoningUnsupported(_) => "reasoning_unsupported",
            GatewayError::StreamingUnsupported { .. } => "streaming_unsupported",
            GatewayError::MaxTokensExceedsMaxOutput { .. } => "max_tokens_exceeds_max_output",
            GatewayError::NoProviderKey(_) => "no_provider_key",
            GatewayError::NoProviderEnv(_) => "no_provider_env",
            GatewayError::CustomInCreditsMode => "custom_in_credits_mode",
            GatewayError::InsufficientCredits => "insufficient_credits",
            GatewayError::NoAvailableProvider(_) => "no_available_provider",
            GatewayError::UpstreamHttpError { status, .. } if *status >= 500 => "upstream_error",
            GatewayError::UpstreamHttpError { .. } => "gateway_error",
            GatewayError::UpstreamTransportError(_) => "upstream_error",
            GatewayError::ClientCanceled => "request_canceled",
            GatewayError::ProjectNotFound => "project_not_found",
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::UpstreamHttpError { status, .. } if *status >= 500 => "upstream_error",
            GatewayError::UpstreamHttpError { .. } => "gateway_error",
            GatewayError::UpstreamTransportError(_) => "upstream_error",
            _ => "invalid_request_error",
        }
    }

    /// Renders the spec's fixed error JSON shape. `requested`/`used`
    /// provider and model are filled in by the caller, which has the
    /// routing context this error type does not carry.
    pub fn to_error_body(
        &self,
        requested_provider: Option<String>,
        used_provider: Option<String>,
        requested_model: Option<String>,
        used_model: Option<String>,
    ) -> ErrorBody {
        let response_text = match self {
            GatewayError::UpstreamHttpError { response_text, .. } => response_text.clone(),
            _ => None,
        };
        ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: self.error_type().to_string(),
                param: None,
                code: self.code().to_string(),
                requested_provider,
                used_provider,
                requested_model,
                used_model,
                response_text,
            },
        }
    }
}
