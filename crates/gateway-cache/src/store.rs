use std::collections::HashMap;
use std::time::Duration;

use gateway_protocol::chat::response::CreateChatCompletionResponse;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::key::CacheKey;

struct Entry {
    response: CreateChatCompletionResponse,
    expires_at: Instant,
}

/// Fingerprint-keyed store of prior non-streaming responses. Consulted
/// only on the non-streaming path; streaming requests never read or
/// populate it.
pub struct ResponseCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: CacheKey) -> Option<CreateChatCompletionResponse> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let entry = entries.get(&key)?;
        if entry.expires_at <= now {
            return None;
        }
        Some(entry.response.clone())
    }

    pub async fn set(&self, key: CacheKey, response: CreateChatCompletionResponse, ttl: Duration) {
        let entry = Entry {
            response,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Drops expired entries. Not required for correctness (`get` treats
    /// them as absent) but keeps memory from growing unbounded across a
    /// long-lived process.
    pub async fn evict_expired(&self) {
        let now = Instant::now();
        self.entries
            .write()
            .await
            .retain(|_, entry| entry.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_protocol::chat::response::{ChatCompletionObjectType, ChatCompletionChoice};
    use gateway_protocol::chat::types::{
        ChatCompletionResponseMessage, ChatCompletionResponseRole, CompletionUsage,
    };

    fn sample_response() -> CreateChatCompletionResponse {
        CreateChatCompletionResponse {
            id: "chatcmpl-1".to_string(),
            object: ChatCompletionObjectType::ChatCompletion,
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionResponseMessage {
                    role: ChatCompletionResponseRole::Assistant,
                    content: Some("hi".to_string()),
                    reasoning_content: None,
                    tool_calls: None,
                },
                finish_reason: gateway_protocol::chat::types::ChatCompletionFinishReason::Stop,
            }],
            usage: Some(CompletionUsage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
                reasoning_tokens: None,
                prompt_tokens_details: None,
            }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn set_then_get_returns_the_same_response() {
        let cache = ResponseCache::new();
        let key = crate::key::generate_key(&request_stub());
        cache
            .set(key, sample_response(), Duration::from_secs(60))
            .await;
        let hit = cache.get(key).await;
        assert_eq!(hit.map(|r| r.id), Some("chatcmpl-1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_their_ttl() {
        let cache = ResponseCache::new();
        let key = crate::key::generate_key(&request_stub());
        cache
            .set(key, sample_response(), Duration::from_secs(1))
            .await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(key).await.is_none());
    }

    fn request_stub() -> gateway_protocol::chat::request::CreateChatCompletionRequestBody {
        gateway_protocol::chat::request::CreateChatCompletionRequestBody {
            model: "gpt-4o".to_string(),
            messages: vec![],
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
        }
    }
}
