use bytes::Bytes;
use gateway_protocol::chat::request::CreateChatCompletionRequestBody;
use gateway_protocol::chat::response::{ChatCompletionChoice, ChatCompletionObjectType, CreateChatCompletionResponse};
use gateway_protocol::chat::types::{
    ChatCompletionContent, ChatCompletionFinishReason, ChatCompletionResponseMessage,
    ChatCompletionResponseRole, ChatCompletionRole, CompletionUsage,
};
use gateway_protocol::sse::SseParser;
use gateway_provider_core::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Upstream responses larger than this before a complete JSON object has
/// been assembled are treated as a transport error rather than buffered
/// without bound.
const MAX_BUFFERED_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "systemInstruction")]
    system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Clone, Default, Serialize)]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "topP")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxOutputTokens")]
    max_output_tokens: Option<i64>,
}

/// Gemini has no `system` role; system/developer messages fold into
/// `systemInstruction`, and `assistant` maps to Gemini's `model` role.
pub fn translate_request(body: CreateChatCompletionRequestBody, _provider_model_name: &str) -> JsonValue {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for message in body.messages {
        let text = message.content.as_ref().map(ChatCompletionContent::as_text).unwrap_or_default();
        match message.role {
            ChatCompletionRole::System | ChatCompletionRole::Developer => system_parts.push(text),
            ChatCompletionRole::User | ChatCompletionRole::Tool => {
                contents.push(GeminiContent { role: Some("user"), parts: vec![GeminiPart { text }] });
            }
            ChatCompletionRole::Assistant => {
                contents.push(GeminiContent { role: Some("model"), parts: vec![GeminiPart { text }] });
            }
        }
    }

    let request = GeminiRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent { role: None, parts: vec![GeminiPart { text: system_parts.join("\n\n") }] })
        },
        generation_config: GeminiGenerationConfig {
            temperature: body.temperature,
            top_p: body.top_p,
            max_output_tokens: body.max_tokens,
        },
    };

    serde_json::to_value(request).unwrap_or(JsonValue::Null)
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GenerateContentResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<GeminiFinishReason>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum GeminiFinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Other,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct GeminiUsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<i64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<i64>,
}

fn map_finish_reason(reason: GeminiFinishReason) -> ChatCompletionFinishReason {
    match reason {
        GeminiFinishReason::Stop => ChatCompletionFinishReason::Stop,
        GeminiFinishReason::MaxTokens => ChatCompletionFinishReason::Length,
        GeminiFinishReason::Safety | GeminiFinishReason::Recitation => ChatCompletionFinishReason::ContentFilter,
        GeminiFinishReason::Other => ChatCompletionFinishReason::Stop,
    }
}

fn collect_text(candidate: &GeminiCandidate) -> String {
    candidate
        .content
        .as_ref()
        .map(|content| content.parts.iter().map(|part| part.text.as_str()).collect::<String>())
        .unwrap_or_default()
}

pub fn parse_unary(body: &[u8], id: &str, model: &str, created: i64) -> Result<CreateChatCompletionResponse, GatewayError> {
    let response: GenerateContentResponse = serde_json::from_slice(body)
        .map_err(|err| GatewayError::UpstreamTransportError(format!("invalid gemini response body: {err}")))?;

    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| GatewayError::UpstreamTransportError("gemini response has no candidates".to_string()))?;

    let text = collect_text(candidate);
    let finish_reason = candidate.finish_reason.map(map_finish_reason).unwrap_or(ChatCompletionFinishReason::Stop);

    let prompt_tokens = response.usage_metadata.and_then(|usage| usage.prompt_token_count).unwrap_or(0);
    let completion_tokens = response.usage_metadata.and_then(|usage| usage.candidates_token_count).unwrap_or(0);

    Ok(CreateChatCompletionResponse {
        id: id.to_string(),
        object: ChatCompletionObjectType::ChatCompletion,
        created,
        model: model.to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatCompletionResponseMessage {
                role: ChatCompletionResponseRole::Assistant,
                content: if text.is_empty() { None } else { Some(text) },
                reasoning_content: None,
                tool_calls: None,
            },
            finish_reason,
        }],
        usage: Some(CompletionUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            reasoning_tokens: None,
            prompt_tokens_details: None,
        }),
    })
}

/// Parses one decoded JSON payload from the tolerant stream scanner.
/// Gemini's streaming candidates carry the same shape as the unary
/// response, just one partial chunk of text at a time.
pub fn parse_stream_payload(data: &str) -> Option<GenerateContentResponse> {
    serde_json::from_str(data).ok()
}

pub struct GoogleStreamAccumulator {
    content: String,
    finish_reason: Option<ChatCompletionFinishReason>,
    prompt_tokens: i64,
    completion_tokens: i64,
}

impl Default for GoogleStreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleStreamAccumulator {
    pub fn new() -> Self {
        Self { content: String::new(), finish_reason: None, prompt_tokens: 0, completion_tokens: 0 }
    }

    pub fn push(&mut self, response: &GenerateContentResponse) {
        if let Some(candidate) = response.candidates.first() {
            self.content.push_str(&collect_text(candidate));
            if let Some(reason) = candidate.finish_reason {
                self.finish_reason = Some(map_finish_reason(reason));
            }
        }
        if let Some(usage) = response.usage_metadata {
            if let Some(prompt_tokens) = usage.prompt_token_count {
                self.prompt_tokens = prompt_tokens;
            }
            if let Some(candidates_tokens) = usage.candidates_token_count {
                self.completion_tokens = candidates_tokens;
            }
        }
    }

    /// Google reliably reports prompt tokens but frequently omits a final
    /// completion-token count on the last streamed chunk; callers should
    /// run this through `finalize_usage` with the accumulated text when
    /// `completion_tokens()` comes back zero.
    pub fn completion_tokens(&self) -> i64 {
        self.completion_tokens
    }

    pub fn prompt_tokens(&self) -> i64 {
        self.prompt_tokens
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn finalize(
        &self,
        id: &str,
        model: &str,
        created: i64,
        usage: CompletionUsage,
    ) -> CreateChatCompletionResponse {
        CreateChatCompletionResponse {
            id: id.to_string(),
            object: ChatCompletionObjectType::ChatCompletion,
            created,
            model: model.to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionResponseMessage {
                    role: ChatCompletionResponseRole::Assistant,
                    content: if self.content.is_empty() { None } else { Some(self.content.clone()) },
                    reasoning_content: None,
                    tool_calls: None,
                },
                finish_reason: self.finish_reason.unwrap_or(ChatCompletionFinishReason::Stop),
            }],
            usage: Some(usage),
        }
    }
}

/// Google's streaming endpoint answers with SSE, NDJSON, or a single
/// top-level JSON array depending on transport and client library
/// version; this scanner tolerates all three without knowing which one
/// it's looking at up front.
#[derive(Debug)]
enum StreamDecoderMode {
    Unknown,
    Sse(SseParser),
    Ndjson(String),
    JsonArray(JsonArrayDecoder),
}

#[derive(Debug)]
pub struct StreamDecoder {
    mode: StreamDecoderMode,
    pending: String,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self { mode: StreamDecoderMode::Unknown, pending: String::new() }
    }

    pub fn push(&mut self, chunk: &Bytes) -> Result<Vec<String>, GatewayError> {
        let text = match std::str::from_utf8(chunk) {
            Ok(value) => value,
            Err(_) => return Ok(Vec::new()),
        };

        match &mut self.mode {
            StreamDecoderMode::Unknown => {
                self.pending.push_str(text);
                check_buffer_cap(self.pending.len())?;
                let combined = self.pending.as_str();
                let first_non_ws = combined.chars().find(|c| !c.is_whitespace());
                if combined.contains("data:") || combined.contains("event:") || matches!(first_non_ws, Some('d' | 'e' | ':')) {
                    let mut parser = SseParser::new();
                    let events = parser.push_str(combined);
                    self.mode = StreamDecoderMode::Sse(parser);
                    self.pending.clear();
                    return Ok(events.into_iter().filter(|event| !event.data.is_empty()).map(|event| event.data).collect());
                }
                if matches!(first_non_ws, Some('[')) {
                    let mut parser = JsonArrayDecoder::new();
                    let events = parser.push_str(combined)?;
                    self.mode = StreamDecoderMode::JsonArray(parser);
                    self.pending.clear();
                    return Ok(events);
                }
                if matches!(first_non_ws, Some('{')) {
                    let buffer = std::mem::take(&mut self.pending);
                    let mut buffer = buffer;
                    let events = drain_ndjson(&mut buffer);
                    self.mode = StreamDecoderMode::Ndjson(buffer);
                    return Ok(events);
                }
                Ok(Vec::new())
            }
            StreamDecoderMode::Sse(parser) => {
                Ok(parser.push_str(text).into_iter().filter(|event| !event.data.is_empty()).map(|event| event.data).collect())
            }
            StreamDecoderMode::Ndjson(buffer) => {
                buffer.push_str(text);
                check_buffer_cap(buffer.len())?;
                Ok(drain_ndjson(buffer))
            }
            StreamDecoderMode::JsonArray(parser) => parser.push_str(text),
        }
    }

    pub fn finish(&mut self) -> Vec<String> {
        match &mut self.mode {
            StreamDecoderMode::Unknown => {
                let pending = self.pending.trim();
                if pending.is_empty() { Vec::new() } else { vec![pending.to_string()] }
            }
            StreamDecoderMode::Sse(parser) => {
                parser.finish().into_iter().filter(|event| !event.data.is_empty()).map(|event| event.data).collect()
            }
            StreamDecoderMode::Ndjson(buffer) => {
                let mut events = drain_ndjson(buffer);
                let remainder = buffer.trim();
                if !remainder.is_empty() {
                    events.push(remainder.to_string());
                }
                buffer.clear();
                events
            }
            StreamDecoderMode::JsonArray(parser) => parser.finish(),
        }
    }
}

fn check_buffer_cap(len: usize) -> Result<(), GatewayError> {
    if len > MAX_BUFFERED_BYTES {
        Err(GatewayError::UpstreamTransportError("gemini stream payload exceeded buffer cap".to_string()))
    } else {
        Ok(())
    }
}

#[derive(Debug)]
struct JsonArrayDecoder {
    current: String,
    depth: usize,
    in_string: bool,
    escape: bool,
    seen_array: bool,
}

impl JsonArrayDecoder {
    fn new() -> Self {
        Self { current: String::new(), depth: 0, in_string: false, escape: false, seen_array: false }
    }

    fn push_str(&mut self, text: &str) -> Result<Vec<String>, GatewayError> {
        let mut out = Vec::new();
        for ch in text.chars() {
            if !self.seen_array {
                if ch.is_whitespace() {
                    continue;
                }
                if ch == '[' {
                    self.seen_array = true;
                }
                continue;
            }

            if self.depth == 0 {
                if ch.is_whitespace() || ch == ',' {
                    continue;
                }
                if ch == '{' {
                    self.depth = 1;
                    self.current.push(ch);
                }
                continue;
            }

            self.current.push(ch);
            check_buffer_cap(self.current.len())?;
            if self.in_string {
                if self.escape {
                    self.escape = false;
                } else if ch == '\\' {
                    self.escape = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
                continue;
            }

            match ch {
                '"' => self.in_string = true,
                '{' => self.depth += 1,
                '}' => {
                    self.depth -= 1;
                    if self.depth == 0 && !self.current.is_empty() {
                        out.push(std::mem::take(&mut self.current));
                    }
                }
                _ => {}
            }
        }
        Ok(out)
    }

    fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        if self.depth == 0 && !self.current.trim().is_empty() {
            out.push(std::mem::take(&mut self.current));
        }
        out
    }
}

fn drain_ndjson(buffer: &mut String) -> Vec<String> {
    let mut out = Vec::new();
    loop {
        let Some(pos) = buffer.find('\n') else {
            break;
        };
        let mut line = buffer[..pos].to_string();
        buffer.drain(..=pos);
        if line.ends_with('\r') {
            line.pop();
        }
        let line = line.trim();
        if !line.is_empty() {
            out.push(line.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_maps_assistant_role_to_model() {
        use gateway_protocol::chat::types::ChatCompletionRequestMessage;
        let body = CreateChatCompletionRequestBody {
            model: "gemini-1.5-pro".to_string(),
            messages: vec![ChatCompletionRequestMessage {
                role: ChatCompletionRole::Assistant,
                content: Some(ChatCompletionContent::Text("hi".to_string())),
                name: None,
                tool_call_id: None,
                tool_calls: None,
            }],
            stream: false,
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            response_format: None,
            tools: None,
            tool_choice: None,
            reasoning_effort: None,
        };
        let translated = translate_request(body, "gemini-1.5-pro");
        assert_eq!(translated["contents"][0]["role"], "model");
    }

    #[test]
    fn json_array_decoder_splits_objects_across_pushes() {
        let mut decoder = JsonArrayDecoder::new();
        let mut events = decoder.push_str("[{\"a\":1},").unwrap();
        events.extend(decoder.push_str("{\"a\":2}]").unwrap());
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "{\"a\":2}".to_string()]);
    }

    #[test]
    fn stream_decoder_detects_ndjson_mode() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(&Bytes::from_static(b"{\"candidates\":[]}\n")).unwrap();
        assert_eq!(events, vec!["{\"candidates\":[]}".to_string()]);
    }

    #[test]
    fn parse_unary_extracts_text_and_usage() {
        let body = br#"{
            "candidates": [{"content":{"parts":[{"text":"hello"}]},"finishReason":"STOP"}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 0}
        }"#;
        let response = parse_unary(body, "req-1", "gemini-1.5-pro", 1).unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("hello"));
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 4);
        assert_eq!(usage.completion_tokens, 0);
    }
}
