pub mod accumulate;
pub mod anthropic;
pub mod google;
pub mod mistral;
pub mod openai_family;
pub mod usage;

use bytes::Bytes;
use gateway_catalog::ResponseFamily;
use gateway_protocol::chat::request::CreateChatCompletionRequestBody;
use gateway_protocol::chat::response::CreateChatCompletionResponse;
use gateway_protocol::chat::types::ChatCompletionRequestMessage;
use gateway_provider_core::GatewayError;
use serde_json::Value as JsonValue;

pub use usage::{finalize_usage, ReportedUsage};

/// What goes over the wire to the upstream provider: either our own
/// OpenAI-compatible body (openai-family, mistral) or a provider-native
/// JSON body built by the anthropic/google translators.
pub enum TranslatedRequest {
    OpenaiCompatible(CreateChatCompletionRequestBody),
    Native(JsonValue),
}

/// Translates an ingress request into the shape the given response
/// family's upstream API expects.
pub fn translate_request(
    family: ResponseFamily,
    body: CreateChatCompletionRequestBody,
    provider_model_name: &str,
) -> TranslatedRequest {
    match family {
        ResponseFamily::Openai => {
            TranslatedRequest::OpenaiCompatible(openai_family::translate_request(body, provider_model_name))
        }
        ResponseFamily::Mistral => {
            TranslatedRequest::OpenaiCompatible(mistral::translate_request(body, provider_model_name))
        }
        ResponseFamily::Anthropic => TranslatedRequest::Native(anthropic::translate_request(body, provider_model_name)),
        ResponseFamily::Google => TranslatedRequest::Native(google::translate_request(body, provider_model_name)),
    }
}

/// Parses a non-streaming upstream response body into our normalized
/// shape. `wants_json_output` only matters for mistral's fence-unwrap
/// step; `request_id`/`provider_model_name`/`created` backfill fields
/// Gemini's response body doesn't carry itself.
pub fn parse_unary(
    family: ResponseFamily,
    body: &[u8],
    wants_json_output: bool,
    request_id: &str,
    provider_model_name: &str,
    created: i64,
) -> Result<CreateChatCompletionResponse, GatewayError> {
    match family {
        ResponseFamily::Openai => openai_family::parse_unary(body),
        ResponseFamily::Mistral => mistral::parse_unary(body, wants_json_output),
        ResponseFamily::Anthropic => anthropic::parse_unary(body, created),
        ResponseFamily::Google => google::parse_unary(body, request_id, provider_model_name, created),
    }
}

/// Per-family streaming collector. Every family ultimately yields a
/// normalized unary-equivalent `CreateChatCompletionResponse` once the
/// upstream stream ends, after which usage gets finalized the same way
/// a non-streaming response would.
pub enum StreamCollector {
    OpenaiFamily(openai_family::StreamCollector),
    Mistral(openai_family::StreamCollector, bool),
    Anthropic(anthropic::AnthropicStreamCollector),
    Google {
        decoder: google::StreamDecoder,
        accumulator: google::GoogleStreamAccumulator,
        request_id: String,
        provider_model_name: String,
        created: i64,
    },
}

impl StreamCollector {
    pub fn new(
        family: ResponseFamily,
        wants_json_output: bool,
        request_id: &str,
        provider_model_name: &str,
        created: i64,
    ) -> Self {
        match family {
            ResponseFamily::Openai => StreamCollector::OpenaiFamily(openai_family::StreamCollector::new()),
            ResponseFamily::Mistral => {
                StreamCollector::Mistral(openai_family::StreamCollector::new(), wants_json_output)
            }
            ResponseFamily::Anthropic => StreamCollector::Anthropic(anthropic::AnthropicStreamCollector::new(created)),
            ResponseFamily::Google => StreamCollector::Google {
                decoder: google::StreamDecoder::new(),
                accumulator: google::GoogleStreamAccumulator::new(),
                request_id: request_id.to_string(),
                provider_model_name: provider_model_name.to_string(),
                created,
            },
        }
    }

    /// Feeds one chunk of raw upstream bytes.
    pub fn push(&mut self, chunk: &Bytes) -> Result<(), GatewayError> {
        match self {
            StreamCollector::OpenaiFamily(collector) => {
                collector.push(chunk)?;
            }
            StreamCollector::Mistral(collector, _) => {
                collector.push(chunk)?;
            }
            StreamCollector::Anthropic(collector) => {
                let mut parser = gateway_protocol::sse::SseParser::new();
                for event in parser.push_bytes(chunk) {
                    if event.data.trim() == "[DONE]" {
                        continue;
                    }
                    collector.push_event(&event.data)?;
                }
            }
            StreamCollector::Google { decoder, accumulator, .. } => {
                for payload in decoder.push(chunk)? {
                    if let Some(response) = google::parse_stream_payload(&payload) {
                        accumulator.push(&response);
                    }
                }
            }
        }
        Ok(())
    }

    /// Finalizes the collected stream into a normalized response and the
    /// usage as reported by upstream, before token imputation.
    pub fn finish(mut self) -> Result<(CreateChatCompletionResponse, ReportedUsage), GatewayError> {
        match &mut self {
            StreamCollector::OpenaiFamily(collector) => {
                let (_, response) = collector.finish()?;
                let reported = reported_usage_from(&response);
                Ok((response, reported))
            }
            StreamCollector::Mistral(collector, wants_json_output) => {
                let (_, response) = mistral::finish_stream(collector, *wants_json_output)?;
                let reported = reported_usage_from(&response);
                Ok((response, reported))
            }
            StreamCollector::Anthropic(collector) => {
                let response = collector.finalize();
                let reported = reported_usage_from(&response);
                Ok((response, reported))
            }
            StreamCollector::Google { decoder, accumulator, request_id, provider_model_name, created } => {
                for payload in decoder.finish() {
                    if let Some(response) = google::parse_stream_payload(&payload) {
                        accumulator.push(&response);
                    }
                }
                let reported = ReportedUsage {
                    prompt_tokens: Some(accumulator.prompt_tokens()),
                    completion_tokens: if accumulator.completion_tokens() > 0 {
                        Some(accumulator.completion_tokens())
                    } else {
                        None
                    },
                    cached_tokens: None,
                    reasoning_tokens: None,
                };
                let usage = gateway_protocol::chat::types::CompletionUsage {
                    prompt_tokens: reported.prompt_tokens.unwrap_or(0),
                    completion_tokens: reported.completion_tokens.unwrap_or(0),
                    total_tokens: reported.prompt_tokens.unwrap_or(0) + reported.completion_tokens.unwrap_or(0),
                    reasoning_tokens: None,
                    prompt_tokens_details: None,
                };
                let response = accumulator.finalize(request_id, provider_model_name, *created, usage);
                Ok((response, reported))
            }
        }
    }
}

fn reported_usage_from(response: &CreateChatCompletionResponse) -> ReportedUsage {
    match &response.usage {
        Some(usage) => ReportedUsage {
            prompt_tokens: Some(usage.prompt_tokens),
            completion_tokens: Some(usage.completion_tokens),
            cached_tokens: usage.prompt_tokens_details.and_then(|details| details.cached_tokens),
            reasoning_tokens: usage.reasoning_tokens,
        },
        None => ReportedUsage::default(),
    }
}

/// Normalizes a parsed response's usage in place, imputing any missing
/// counts via the tokenizer adapter, and reports whether imputation
/// happened (spec invariant 4).
pub fn finalize_response_usage(
    response: &mut CreateChatCompletionResponse,
    model_id: &str,
    messages: &[ChatCompletionRequestMessage],
) -> bool {
    let reported = reported_usage_from(response);
    let completion_text = response.choices.first().and_then(|choice| choice.message.content.as_deref()).unwrap_or("");
    let (usage, estimated) = finalize_usage(reported, model_id, messages, completion_text);
    response.usage = Some(usage);
    estimated
}
