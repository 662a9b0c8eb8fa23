use gateway_protocol::chat::request::CreateChatCompletionRequestBody;
use gateway_protocol::chat::types::{ChatCompletionRequestMessage, ChatCompletionResponseFormat};
use serde::Serialize;

/// The subset of a chat-completion request that determines cache
/// identity. Field order is fixed (it feeds a canonical serialization),
/// and fields absent from the request are omitted rather than
/// serialized as `null`.
#[derive(Serialize)]
struct CacheKeyInputs<'a> {
    model: &'a str,
    messages: &'a [ChatCompletionRequestMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a ChatCompletionResponseFormat>,
}

/// A stable, opaque handle for a cached response. Equality is value
/// equality over the blake3 digest, not the request itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn as_hex(&self) -> String {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

/// Hashes the cache-relevant fields of a request into a stable key.
/// Requests that differ only in fields outside this set (e.g.
/// `stream`, `tools`) collide on purpose — the cache only ever serves
/// non-streaming lookups, and tool definitions don't change the
/// semantic content of a unary response for a fixed prompt.
pub fn generate_key(request: &CreateChatCompletionRequestBody) -> CacheKey {
    let inputs = CacheKeyInputs {
        model: &request.model,
        messages: &request.messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
        frequency_penalty: request.frequency_penalty,
        presence_penalty: request.presence_penalty,
        response_format: request.response_format.as_ref(),
    };
    let canonical =
        serde_json::to_vec(&inputs).expect("cache key inputs always serialize");
    CacheKey(*blake3::hash(&canonical).as_bytes())
}
