use bytes::Bytes;
use gateway_protocol::chat::request::CreateChatCompletionRequestBody;
use gateway_protocol::chat::response::CreateChatCompletionResponse;
use gateway_protocol::chat::stream::CreateChatCompletionStreamResponse;
use gateway_protocol::chat::types::ChatCompletionFinishReason;
use gateway_protocol::sse::SseParser;
use gateway_provider_core::GatewayError;

use crate::accumulate::StreamAccumulator;

/// OpenAI-compatible providers accept our wire format close to verbatim;
/// the only change is swapping in the provider-native model name.
pub fn translate_request(
    mut body: CreateChatCompletionRequestBody,
    provider_model_name: &str,
) -> CreateChatCompletionRequestBody {
    body.model = provider_model_name.to_string();
    body
}

pub fn parse_unary(body: &[u8]) -> Result<CreateChatCompletionResponse, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|err| GatewayError::UpstreamTransportError(format!("invalid openai-family response body: {err}")))
}

/// Consumes an OpenAI-family SSE byte stream end to end and returns the
/// accumulated unary-equivalent response, ready for normalization/caching.
pub struct StreamCollector {
    parser: SseParser,
    accumulator: StreamAccumulator,
}

impl Default for StreamCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamCollector {
    pub fn new() -> Self {
        Self {
            parser: SseParser::new(),
            accumulator: StreamAccumulator::new(),
        }
    }

    /// Feeds one chunk of upstream SSE bytes, returning any fully parsed
    /// chunk responses observed so far (callers forward these downstream
    /// verbatim before the normalized unary response is available).
    pub fn push(&mut self, chunk: &Bytes) -> Result<Vec<CreateChatCompletionStreamResponse>, GatewayError> {
        let events = self.parser.push_bytes(chunk);
        self.consume_events(events)
    }

    pub fn finish(&mut self) -> Result<(Vec<CreateChatCompletionStreamResponse>, CreateChatCompletionResponse), GatewayError> {
        let events = self.parser.finish();
        let trailing = self.consume_events(events)?;
        let usage = self.accumulator.usage().copied().unwrap_or_default();
        let response = self.accumulator.finalize(ChatCompletionFinishReason::Stop, usage);
        Ok((trailing, response))
    }

    fn consume_events(
        &mut self,
        events: Vec<gateway_protocol::sse::SseEvent>,
    ) -> Result<Vec<CreateChatCompletionStreamResponse>, GatewayError> {
        let mut chunks = Vec::with_capacity(events.len());
        for event in events {
            if event.data.trim() == "[DONE]" {
                continue;
            }
            let chunk: CreateChatCompletionStreamResponse = serde_json::from_str(&event.data).map_err(|err| {
                GatewayError::UpstreamTransportError(format!("invalid openai-family stream chunk: {err}"))
            })?;
            self.accumulator.push(&chunk);
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_swaps_model_name_only() {
        let body = CreateChatCompletionRequestBody {
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
        };
        let translated = translate_request(body, "gpt-4o-2024-08-06");
        assert_eq!(translated.model, "gpt-4o-2024-08-06");
    }

    #[test]
    fn stream_collector_accumulates_sse_chunks() {
        let mut collector = StreamCollector::new();
        let chunk1 = br#"data: {"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4o","choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"},"finish_reason":null}]}

"#;
        let chunk2 = br#"data: {"id":"c1","object":"chat.completion.chunk","created":1,"model":"gpt-4o","choices":[{"index":0,"delta":{"content":" there"},"finish_reason":"stop"}]}

data: [DONE]

"#;
        collector.push(&Bytes::from_static(chunk1)).unwrap();
        collector.push(&Bytes::from_static(chunk2)).unwrap();
        let (_, response) = collector.finish().unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hi there"));
        assert_eq!(
            response.choices[0].message.role,
            gateway_protocol::chat::types::ChatCompletionResponseRole::Assistant
        );
    }
}
