use std::collections::BTreeMap;

use gateway_protocol::chat::response::{ChatCompletionChoice, ChatCompletionObjectType, CreateChatCompletionResponse};
use gateway_protocol::chat::stream::CreateChatCompletionStreamResponse;
use gateway_protocol::chat::types::{
    ChatCompletionFinishReason, ChatCompletionMessageToolCall, ChatCompletionMessageToolCallFunction,
    ChatCompletionResponseMessage, ChatCompletionResponseRole, ChatCompletionToolCallType,
    CompletionUsage,
};

#[derive(Debug, Clone, Default)]
struct ToolCallState {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Accumulates OpenAI-shaped `chat.completion.chunk` deltas into a final
/// unary-equivalent response. Used directly by the `openai-family` and
/// `mistral` translators, whose upstream stream chunks are already in
/// this shape; other families build their own `CreateChatCompletionStreamResponse`
/// chunks before feeding them through the same accumulator.
#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    id: String,
    model: String,
    created: i64,
    content: String,
    reasoning_content: String,
    role: ChatCompletionResponseRole,
    tool_calls: BTreeMap<i64, ToolCallState>,
    finish_reason: Option<ChatCompletionFinishReason>,
    usage: Option<CompletionUsage>,
}

impl Default for StreamAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self {
            id: "chatcmpl".to_string(),
            model: String::new(),
            created: 0,
            content: String::new(),
            reasoning_content: String::new(),
            role: ChatCompletionResponseRole::Assistant,
            tool_calls: BTreeMap::new(),
            finish_reason: None,
            usage: None,
        }
    }

    pub fn push(&mut self, chunk: &CreateChatCompletionStreamResponse) {
        self.id = chunk.id.clone();
        self.model = chunk.model.clone();
        self.created = chunk.created;
        if chunk.usage.is_some() {
            self.usage = chunk.usage.clone();
        }

        for choice in &chunk.choices {
            if choice.index != 0 {
                continue;
            }
            let delta = &choice.delta;
            if let Some(content) = &delta.content {
                self.content.push_str(content);
            }
            if let Some(reasoning) = &delta.reasoning_content {
                self.reasoning_content.push_str(reasoning);
            }
            if let Some(tool_calls) = &delta.tool_calls {
                for tool_call in tool_calls {
                    let entry = self.tool_calls.entry(tool_call.index).or_default();
                    if let Some(id) = &tool_call.id {
                        entry.id = Some(id.clone());
                    }
                    if let Some(function) = &tool_call.function {
                        if let Some(name) = &function.name {
                            entry.name = Some(name.clone());
                        }
                        if let Some(arguments) = &function.arguments {
                            entry.arguments.push_str(arguments);
                        }
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }
    }

    pub fn usage(&self) -> Option<&CompletionUsage> {
        self.usage.as_ref()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Builds the final response. `fallback_finish_reason` covers a
    /// stream that ends without an explicit `finish_reason` (e.g. the
    /// connection drops after the last content delta).
    pub fn finalize(
        &self,
        fallback_finish_reason: ChatCompletionFinishReason,
        usage: CompletionUsage,
    ) -> CreateChatCompletionResponse {
        let tool_calls = if self.tool_calls.is_empty() {
            None
        } else {
            Some(
                self.tool_calls
                    .values()
                    .map(|state| ChatCompletionMessageToolCall {
                        id: state.id.clone().unwrap_or_default(),
                        r#type: ChatCompletionToolCallType::Function,
                        function: ChatCompletionMessageToolCallFunction {
                            name: state.name.clone().unwrap_or_default(),
                            arguments: state.arguments.clone(),
                        },
                    })
                    .collect(),
            )
        };

        CreateChatCompletionResponse {
            id: self.id.clone(),
            object: ChatCompletionObjectType::ChatCompletion,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionResponseMessage {
                    role: self.role,
                    content: if self.content.is_empty() {
                        None
                    } else {
                        Some(self.content.clone())
                    },
                    reasoning_content: if self.reasoning_content.is_empty() {
                        None
                    } else {
                        Some(self.reasoning_content.clone())
                    },
                    tool_calls,
                },
                finish_reason: self.finish_reason.unwrap_or(fallback_finish_reason),
            }],
            usage: Some(usage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_protocol::chat::stream::ChatCompletionStreamChoice;
    use gateway_protocol::chat::types::ChatCompletionStreamResponseDelta;

    fn chunk(content: Option<&str>, finish: Option<ChatCompletionFinishReason>) -> CreateChatCompletionStreamResponse {
        CreateChatCompletionStreamResponse {
            id: "chatcmpl-1".to_string(),
            object: gateway_protocol::chat::stream::ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: 1,
            model: "gpt-4o".to_string(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta: ChatCompletionStreamResponseDelta {
                    role: None,
                    content: content.map(str::to_string),
                    reasoning_content: None,
                    tool_calls: None,
                },
                finish_reason: finish,
            }],
            usage: None,
        }
    }

    #[test]
    fn accumulates_content_deltas_in_order() {
        let mut acc = StreamAccumulator::new();
        acc.push(&chunk(Some("Hel"), None));
        acc.push(&chunk(Some("lo"), Some(ChatCompletionFinishReason::Stop)));
        assert_eq!(acc.content(), "Hello");

        let usage = CompletionUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
            reasoning_tokens: None,
            prompt_tokens_details: None,
        };
        let response = acc.finalize(ChatCompletionFinishReason::Length, usage);
        assert_eq!(response.choices[0].finish_reason, ChatCompletionFinishReason::Stop);
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hello"));
    }
}
