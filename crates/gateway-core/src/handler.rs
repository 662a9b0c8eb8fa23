use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use gateway_cache::generate_key;
use gateway_catalog::{AuthScheme, Provider, ResponseFamily};
use gateway_common::{BillingMode, Money};
use gateway_protocol::chat::request::CreateChatCompletionRequestBody;
use gateway_protocol::chat::stream::{
    ChatCompletionChunkObjectType, ChatCompletionStreamChoice, CreateChatCompletionStreamResponse,
};
use gateway_protocol::chat::types::{ChatCompletionFinishReason, ChatCompletionResponseRole, ChatCompletionStreamResponseDelta};
use gateway_provider_core::credential::{resolve_credential, ProcessEnv, ProviderKeyStore};
use gateway_provider_core::domain::{Organization, Project};
use gateway_provider_core::error::GatewayError;
use gateway_provider_core::router::{apply_gates, resolve_route, AvailableProviders, GateInputs, RouteSelection};
use gateway_provider_impl::{finalize_response_usage, parse_unary, translate_request, StreamCollector, TranslatedRequest};
use gateway_pricing::{calculate_cost, TokenUsage};
use gateway_storage::PendingLog;
use serde_json::{json, Value as JsonValue};
use time::OffsetDateTime;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::state::GatewayState;
use crate::upstream::UpstreamBody;

const STREAM_BUFFER_CAP_BYTES: u64 = 10 * 1024 * 1024;
const REQUEST_ID_LEN: usize = 40;
const REQUEST_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn generate_request_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..REQUEST_ID_LEN)
        .map(|_| REQUEST_ID_CHARSET[rng.random_range(0..REQUEST_ID_CHARSET.len())] as char)
        .collect()
}

/// Collects `x-llmgateway-*` request headers into the suffix → value map
/// the log row's `customHeaders` carries.
fn extract_custom_headers(headers: &HeaderMap) -> JsonValue {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        let lower = name.as_str().to_ascii_lowercase();
        if let Some(suffix) = lower.strip_prefix("x-llmgateway-")
            && let Ok(value) = value.to_str()
        {
            map.insert(suffix.to_string(), json!(value));
        }
    }
    JsonValue::Object(map)
}

/// Everything accumulated about the in-flight request needed to write
/// its log row, regardless of which step it terminates at. Built up
/// incrementally once authentication has resolved an org/project/key —
/// before that point there's no valid foreign key to log against, so
/// auth failures and malformed bodies surface a response but no row.
struct LogContext {
    request_id: String,
    org_id: gateway_common::OrgId,
    project_id: gateway_common::ProjectId,
    api_key_id: gateway_common::ApiKeyId,
    requested_model: String,
    requested_provider: Option<String>,
    billing_mode: BillingMode,
    custom_headers: JsonValue,
    start: Instant,
}

impl LogContext {
    fn base_log(&self) -> PendingLog {
        PendingLog {
            request_id: self.request_id.clone(),
            org_id: self.org_id,
            project_id: self.project_id,
            api_key_id: self.api_key_id,
            requested_model: self.requested_model.clone(),
            requested_provider: self.requested_provider.clone(),
            used_model: self.requested_model.clone(),
            used_provider: String::new(),
            finish_reason: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            reasoning_tokens: 0,
            cached_tokens: 0,
            total_cost: Money::ZERO,
            billable_cost: Money::ZERO,
            duration_ms: self.start.elapsed().as_millis() as u64,
            response_size_bytes: 0,
            streamed: false,
            canceled: false,
            cached: false,
            has_error: false,
            error_message: None,
            messages: None,
            content: None,
            tool_calls: None,
            custom_headers: self.custom_headers.clone(),
            generation_params: json!({}),
        }
    }

    fn error_log(&self, error: &GatewayError) -> PendingLog {
        let mut log = self.base_log();
        log.has_error = true;
        log.error_message = Some(error.to_string());
        log.finish_reason = Some(match error {
            GatewayError::ClientCanceled => "canceled".to_string(),
            _ => "gateway_error".to_string(),
        });
        log
    }

    fn billable_cost(&self, total_cost: Money, cached: bool) -> Money {
        if cached || self.billing_mode == BillingMode::ApiKeys {
            Money::ZERO
        } else {
            total_cost
        }
    }
}

pub async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(generate_request_id);
    let custom_headers = extract_custom_headers(&headers);
    let start = Instant::now();

    let request: CreateChatCompletionRequestBody = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return ApiError::new(GatewayError::InvalidRequestBody(err.to_string())).into_response();
        }
    };

    let (api_key, _token) = match authenticate(state.datastore.as_ref(), &headers).await {
        Ok(pair) => pair,
        Err(err) => return ApiError::new(err).into_response(),
    };

    let Some(project) = state.datastore.load_project(api_key.project_id).await else {
        return ApiError::new(GatewayError::ProjectNotFound).into_response();
    };
    let Some(org) = state.datastore.load_organization(project.org_id).await else {
        return ApiError::new(GatewayError::ProjectNotFound).into_response();
    };

    let ctx = LogContext {
        request_id: request_id.clone(),
        org_id: org.id,
        project_id: project.id,
        api_key_id: api_key.id,
        requested_model: request.model.clone(),
        requested_provider: request.model.split_once('/').map(|(prefix, _)| prefix.to_string()),
        billing_mode: project.billing_mode,
        custom_headers,
        start,
    };

    match route_and_dispatch(&state, &ctx, &org, &project, request).await {
        Ok(response) => response,
        Err((error, log)) => {
            state.log_queue.enqueue(log).await;
            let mut api_error = ApiError::new(error);
            api_error.requested_provider = ctx.requested_provider.clone();
            api_error.requested_model = Some(ctx.requested_model.clone());
            api_error.into_response()
        }
    }
}

type DispatchResult = Result<Response, (GatewayError, PendingLog)>;

async fn route_and_dispatch(
    state: &GatewayState,
    ctx: &LogContext,
    org: &Organization,
    project: &Project,
    request: CreateChatCompletionRequestBody,
) -> DispatchResult {
    let now = OffsetDateTime::now_utc();

    let stored_key_providers = state.datastore.stored_key_providers(org.id).await;
    let env_configured_providers = state
        .catalog
        .providers()
        .filter(|provider| {
            std::env::var(&provider.env_var)
                .ok()
                .filter(|value| !value.is_empty())
                .is_some()
        })
        .map(|provider| provider.id.clone())
        .collect();
    let available = AvailableProviders {
        stored_key_providers,
        env_configured_providers,
    };

    let custom_exists = match request.model.split_once('/') {
        Some((prefix, _)) => state.datastore.custom_provider_exists(org.id, prefix).await,
        None => false,
    };

    let selection = resolve_route(
        &state.catalog,
        &request.model,
        project.billing_mode,
        &available,
        |_| custom_exists,
    )
    .map_err(|error| (error.clone(), ctx.error_log(&error)))?;

    // `model == "custom"` names an internal meta-route with no catalog
    // entry or stored definition of its own; there is nothing to dispatch
    // to until an org explicitly names one of its custom providers via
    // a `provider/model` prefix instead.
    if selection.provider_id == "llmgateway" {
        let error = GatewayError::CustomProviderNotFound("custom".to_string());
        return Err((error.clone(), ctx.error_log(&error)));
    }

    let gate_inputs = GateInputs {
        wants_json_output: request
            .response_format
            .as_ref()
            .is_some_and(|format| matches!(format.r#type, gateway_protocol::chat::types::ResponseFormatType::JsonObject)),
        wants_reasoning: request.reasoning_effort.is_some(),
        wants_streaming: request.stream,
        max_tokens: request.max_tokens.and_then(|value| u32::try_from(value).ok()),
    };
    apply_gates(&state.catalog, &selection, gate_inputs, now)
        .map_err(|error| (error.clone(), ctx.error_log(&error)))?;

    let provider = resolve_dispatch_provider(state, &selection)
        .map_err(|error| (error.clone(), ctx.error_log(&error)))?;

    let credential = resolve_credential(
        org,
        project,
        &provider,
        selection.custom_provider_name.as_deref(),
        state.datastore.as_ref() as &dyn ProviderKeyStore,
        &ProcessEnv,
    )
    .await
    .map_err(|error| (error.clone(), ctx.error_log(&error)))?;

    let (url, mut dispatch_headers) = build_endpoint(&selection, &provider, &credential)
        .map_err(|error| (error.clone(), ctx.error_log(&error)))?;
    dispatch_headers.push(("content-type".to_string(), "application/json".to_string()));

    let cache_key = (!request.stream && project.cache_ttl_seconds > 0).then(|| generate_key(&request));
    if let Some(key) = cache_key
        && let Some(cached) = state.cache.get(key).await
    {
        let mut log = ctx.base_log();
        log.used_model = selection.provider_model_name.clone();
        log.used_provider = selection.provider_id.clone();
        log.cached = true;
        log.finish_reason = cached.choices.first().map(|choice| finish_reason_str(choice.finish_reason).to_string());
        state.log_queue.enqueue(log).await;
        return Ok(Json(cached).into_response());
    }

    let messages = request.messages.clone();
    let translated = translate_request(provider.response_family, request.clone(), &selection.provider_model_name);
    let wire_body = match translated {
        TranslatedRequest::OpenaiCompatible(body) => {
            Bytes::from(serde_json::to_vec(&body).expect("translated request serializes"))
        }
        TranslatedRequest::Native(value) => Bytes::from(serde_json::to_vec(&value).expect("translated request serializes")),
    };

    let upstream = state
        .upstream
        .dispatch(&url, dispatch_headers, wire_body, request.stream)
        .await
        .map_err(|err| {
            let error = GatewayError::UpstreamTransportError(err.message);
            (error.clone(), ctx.error_log(&error))
        })?;

    if request.stream {
        dispatch_streaming(state, ctx, &selection, provider.response_family, &messages, upstream).await
    } else {
        dispatch_unary(state, ctx, &selection, provider.response_family, gate_inputs, &messages, cache_key, upstream).await
    }
}

fn resolve_dispatch_provider(state: &GatewayState, selection: &RouteSelection) -> Result<Provider, GatewayError> {
    if selection.provider_id == "custom" {
        return Ok(Provider {
            id: "custom".to_string(),
            endpoint_template: String::new(),
            auth_scheme: AuthScheme::Bearer,
            supports_cancellation: false,
            response_family: ResponseFamily::Openai,
            env_var: String::new(),
        });
    }
    state
        .catalog
        .find_provider(&selection.provider_id)
        .cloned()
        .ok_or_else(|| GatewayError::ProviderUnsupported(selection.provider_id.clone()))
}

fn build_endpoint(
    selection: &RouteSelection,
    provider: &Provider,
    credential: &gateway_provider_core::credential::ResolvedCredential,
) -> Result<(String, Vec<(String, String)>), GatewayError> {
    if selection.provider_id == "custom" {
        let base_url = credential
            .base_url
            .clone()
            .ok_or_else(|| GatewayError::NoProviderKey("custom".to_string()))?;
        return Ok((base_url, vec![("authorization".to_string(), format!("Bearer {}", credential.token))]));
    }

    let mut url = provider.endpoint_template.replace("{model}", &selection.provider_model_name);
    let mut headers = Vec::new();
    match &provider.auth_scheme {
        AuthScheme::Bearer => headers.push(("authorization".to_string(), format!("Bearer {}", credential.token))),
        AuthScheme::Header { name } => headers.push((name.clone(), credential.token.clone())),
        AuthScheme::QueryParam { name } => {
            let separator = if url.contains('?') { '&' } else { '?' };
            url = format!("{url}{separator}{name}={}", credential.token);
        }
    }
    Ok((url, headers))
}

fn finish_reason_str(reason: ChatCompletionFinishReason) -> &'static str {
    match reason {
        ChatCompletionFinishReason::Stop => "stop",
        ChatCompletionFinishReason::Length => "length",
        ChatCompletionFinishReason::ToolCalls => "tool_calls",
        ChatCompletionFinishReason::ContentFilter => "content_filter",
        ChatCompletionFinishReason::Canceled => "canceled",
        ChatCompletionFinishReason::UpstreamError => "upstream_error",
        ChatCompletionFinishReason::GatewayError => "gateway_error",
    }
}

async fn dispatch_unary(
    state: &GatewayState,
    ctx: &LogContext,
    selection: &RouteSelection,
    family: ResponseFamily,
    gate_inputs: GateInputs,
    messages: &[gateway_protocol::chat::types::ChatCompletionRequestMessage],
    cache_key: Option<gateway_cache::CacheKey>,
    upstream: crate::upstream::UpstreamResponse,
) -> DispatchResult {
    let UpstreamBody::Bytes(bytes) = upstream.body else {
        unreachable!("non-streaming dispatch always returns a buffered body")
    };

    if !(200..300).contains(&upstream.status) {
        let error = GatewayError::UpstreamHttpError {
            status: upstream.status,
            response_text: Some(String::from_utf8_lossy(&bytes).into_owned()),
        };
        return Err((error.clone(), ctx.error_log(&error)));
    }

    let created = OffsetDateTime::now_utc().unix_timestamp();
    let mut response = parse_unary(
        family,
        &bytes,
        gate_inputs.wants_json_output,
        &ctx.request_id,
        &selection.provider_model_name,
        created,
    )
    .map_err(|error| (error.clone(), ctx.error_log(&error)))?;

    let model_id = selection.canonical_model_id.as_deref().unwrap_or(&selection.provider_model_name);
    let estimated = finalize_response_usage(&mut response, model_id, messages);
    let usage = response.usage.unwrap_or_default();

    let token_usage = TokenUsage {
        prompt_tokens: usage.prompt_tokens.max(0) as u32,
        completion_tokens: usage.completion_tokens.max(0) as u32,
        cached_tokens: usage
            .prompt_tokens_details
            .and_then(|details| details.cached_tokens)
            .unwrap_or(0)
            .max(0) as u32,
        estimated,
    };
    let price = selection
        .canonical_model_id
        .as_deref()
        .and_then(|id| state.catalog.price_for(id, &selection.provider_id, token_usage.prompt_tokens))
        .unwrap_or_default();
    let cost = calculate_cost(&price, token_usage);

    if let Some(key) = cache_key {
        state
            .cache
            .set(key, response.clone(), std::time::Duration::from_secs(state.global.load().cache_default_ttl_seconds))
            .await;
    }

    let mut log = ctx.base_log();
    log.used_model = selection.provider_model_name.clone();
    log.used_provider = selection.provider_id.clone();
    log.finish_reason = response.choices.first().map(|choice| finish_reason_str(choice.finish_reason).to_string());
    log.prompt_tokens = token_usage.prompt_tokens;
    log.completion_tokens = token_usage.completion_tokens;
    log.reasoning_tokens = usage.reasoning_tokens.unwrap_or(0).max(0) as u32;
    log.cached_tokens = token_usage.cached_tokens;
    log.total_cost = cost.total_cost;
    log.billable_cost = ctx.billable_cost(cost.total_cost, false);
    log.response_size_bytes = bytes.len() as u64;
    log.duration_ms = ctx.start.elapsed().as_millis() as u64;

    state.log_queue.enqueue(log).await;
    Ok(Json(response).into_response())
}

fn sse_frame(event: Option<&str>, data: &str) -> String {
    match event {
        Some(event) => format!("event: {event}\ndata: {data}\n\n"),
        None => format!("data: {data}\n\n"),
    }
}

async fn dispatch_streaming(
    state: &GatewayState,
    ctx: &LogContext,
    selection: &RouteSelection,
    family: ResponseFamily,
    messages: &[gateway_protocol::chat::types::ChatCompletionRequestMessage],
    upstream: crate::upstream::UpstreamResponse,
) -> DispatchResult {
    let created = OffsetDateTime::now_utc().unix_timestamp();

    let UpstreamBody::Stream(mut receiver) = upstream.body else {
        unreachable!("streaming dispatch always returns a channel body")
    };

    if !(200..300).contains(&upstream.status) {
        let mut error_text = String::new();
        while let Some(chunk) = receiver.recv().await {
            if let Ok(bytes) = chunk {
                error_text.push_str(&String::from_utf8_lossy(&bytes));
            }
        }
        let error = GatewayError::UpstreamHttpError {
            status: upstream.status,
            response_text: (!error_text.is_empty()).then_some(error_text),
        };
        let body = error.to_error_body(None, Some(selection.provider_id.clone()), None, None);
        let mut buffer = String::new();
        buffer.push_str(&sse_frame(Some("error"), &serde_json::to_string(&body).expect("error body serializes")));
        buffer.push_str(&sse_frame(Some("done"), "[DONE]"));
        let mut log = ctx.error_log(&error);
        log.streamed = true;
        log.used_model = selection.provider_model_name.clone();
        log.used_provider = selection.provider_id.clone();
        state.log_queue.enqueue(log).await;
        return Ok(sse_response(buffer));
    }

    let mut collector = StreamCollector::new(family, false, &ctx.request_id, &selection.provider_model_name, created);
    let mut total_bytes = 0u64;
    let mut overflowed = false;
    while let Some(chunk) = receiver.recv().await {
        match chunk {
            Ok(bytes) => {
                total_bytes += bytes.len() as u64;
                if total_bytes > STREAM_BUFFER_CAP_BYTES {
                    if !overflowed {
                        overflowed = true;
                        tracing::warn!(
                            request_id = %ctx.request_id,
                            total_bytes,
                            "streaming accumulation buffer exceeded 10 MiB, dropping remainder"
                        );
                    }
                    continue;
                }
                if let Err(error) = collector.push(&bytes) {
                    let mut log = ctx.error_log(&error);
                    log.streamed = true;
                    log.used_model = selection.provider_model_name.clone();
                    log.used_provider = selection.provider_id.clone();
                    return Err((error, log));
                }
            }
            Err(err) => {
                let error = GatewayError::UpstreamTransportError(err.message);
                return Err((error.clone(), ctx.error_log(&error)));
            }
        }
    }

    let (mut response, _reported) = collector
        .finish()
        .map_err(|error| (error.clone(), ctx.error_log(&error)))?;
    let model_id = selection.canonical_model_id.as_deref().unwrap_or(&selection.provider_model_name);
    let estimated = finalize_response_usage(&mut response, model_id, messages);
    let usage = response.usage.unwrap_or_default();

    let token_usage = TokenUsage {
        prompt_tokens: usage.prompt_tokens.max(0) as u32,
        completion_tokens: usage.completion_tokens.max(0) as u32,
        cached_tokens: usage
            .prompt_tokens_details
            .and_then(|details| details.cached_tokens)
            .unwrap_or(0)
            .max(0) as u32,
        estimated,
    };
    let price = selection
        .canonical_model_id
        .as_deref()
        .and_then(|id| state.catalog.price_for(id, &selection.provider_id, token_usage.prompt_tokens))
        .unwrap_or_default();
    let cost = calculate_cost(&price, token_usage);

    let choice = response.choices.first();
    let content = choice.and_then(|choice| choice.message.content.clone());
    let finish_reason = choice.map(|choice| choice.finish_reason).unwrap_or(ChatCompletionFinishReason::Stop);

    let delta_chunk = CreateChatCompletionStreamResponse {
        id: response.id.clone(),
        object: ChatCompletionChunkObjectType::ChatCompletionChunk,
        created,
        model: response.model.clone(),
        choices: vec![ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamResponseDelta {
                role: Some(ChatCompletionResponseRole::Assistant),
                content,
                reasoning_content: None,
                tool_calls: None,
            },
            finish_reason: None,
        }],
        usage: None,
    };
    let final_chunk = CreateChatCompletionStreamResponse {
        id: response.id.clone(),
        object: ChatCompletionChunkObjectType::ChatCompletionChunk,
        created,
        model: response.model.clone(),
        choices: vec![ChatCompletionStreamChoice {
            index: 0,
            delta: ChatCompletionStreamResponseDelta {
                role: None,
                content: None,
                reasoning_content: None,
                tool_calls: None,
            },
            finish_reason: Some(finish_reason),
        }],
        usage: Some(usage),
    };

    let mut buffer = String::new();
    buffer.push_str(&sse_frame(None, &serde_json::to_string(&delta_chunk).expect("chunk serializes")));
    buffer.push_str(&sse_frame(None, &serde_json::to_string(&final_chunk).expect("chunk serializes")));
    buffer.push_str(&sse_frame(Some("done"), "[DONE]"));

    let mut log = ctx.base_log();
    log.used_model = selection.provider_model_name.clone();
    log.used_provider = selection.provider_id.clone();
    log.finish_reason = Some(finish_reason_str(finish_reason).to_string());
    log.prompt_tokens = token_usage.prompt_tokens;
    log.completion_tokens = token_usage.completion_tokens;
    log.reasoning_tokens = usage.reasoning_tokens.unwrap_or(0).max(0) as u32;
    log.cached_tokens = token_usage.cached_tokens;
    log.total_cost = cost.total_cost;
    log.billable_cost = ctx.billable_cost(cost.total_cost, false);
    log.streamed = true;
    log.response_size_bytes = total_bytes;
    log.duration_ms = ctx.start.elapsed().as_millis() as u64;

    state.log_queue.enqueue(log).await;
    Ok(sse_response(buffer))
}

fn sse_response(body: String) -> Response {
    Response::builder()
        .status(200)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(Body::from(body))
        .expect("sse response is well-formed")
        .into_response()
}
