use std::collections::BTreeMap;

use gateway_protocol::chat::request::CreateChatCompletionRequestBody;
use gateway_protocol::chat::response::{ChatCompletionChoice, ChatCompletionObjectType, CreateChatCompletionResponse};
use gateway_protocol::chat::stream::{ChatCompletionChunkObjectType, ChatCompletionStreamChoice, CreateChatCompletionStreamResponse};
use gateway_protocol::chat::types::{
    ChatCompletionContent, ChatCompletionFinishReason, ChatCompletionMessageToolCall,
    ChatCompletionMessageToolCallChunk, ChatCompletionMessageToolCallChunkFunction,
    ChatCompletionMessageToolCallFunction, ChatCompletionResponseMessage, ChatCompletionResponseRole,
    ChatCompletionRole, ChatCompletionStreamResponseDelta, ChatCompletionToolCallType, CompletionUsage,
};
use gateway_provider_core::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

const DEFAULT_MAX_TOKENS: i64 = 4096;

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: i64,
    messages: Vec<AnthropicRequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequestMessage {
    role: AnthropicRole,
    content: Vec<AnthropicRequestBlock>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum AnthropicRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicRequestBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: JsonValue },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicTool {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    input_schema: JsonValue,
}

/// `system` messages are pulled out of the message list into Anthropic's
/// top-level `system` field; everything else maps role-for-role.
pub fn translate_request(
    body: CreateChatCompletionRequestBody,
    provider_model_name: &str,
) -> JsonValue {
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for message in body.messages {
        match message.role {
            ChatCompletionRole::System | ChatCompletionRole::Developer => {
                if let Some(content) = &message.content {
                    system_parts.push(content.as_text());
                }
            }
            ChatCompletionRole::User => {
                messages.push(AnthropicRequestMessage {
                    role: AnthropicRole::User,
                    content: vec![AnthropicRequestBlock::Text {
                        text: message.content.as_ref().map(ChatCompletionContent::as_text).unwrap_or_default(),
                    }],
                });
            }
            ChatCompletionRole::Assistant => {
                let mut blocks = Vec::new();
                if let Some(content) = &message.content {
                    let text = content.as_text();
                    if !text.is_empty() {
                        blocks.push(AnthropicRequestBlock::Text { text });
                    }
                }
                if let Some(tool_calls) = &message.tool_calls {
                    for call in tool_calls {
                        let input = serde_json::from_str(&call.function.arguments).unwrap_or(JsonValue::Null);
                        blocks.push(AnthropicRequestBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.function.name.clone(),
                            input,
                        });
                    }
                }
                messages.push(AnthropicRequestMessage {
                    role: AnthropicRole::Assistant,
                    content: blocks,
                });
            }
            ChatCompletionRole::Tool => {
                let tool_call_id = message.tool_call_id.clone().unwrap_or_default();
                let content = message.content.as_ref().map(ChatCompletionContent::as_text).unwrap_or_default();
                messages.push(AnthropicRequestMessage {
                    role: AnthropicRole::User,
                    content: vec![AnthropicRequestBlock::ToolResult {
                        tool_use_id: tool_call_id,
                        content,
                    }],
                });
            }
        }
    }

    let tools = body.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| AnthropicTool {
                name: tool.function.name,
                description: tool.function.description,
                input_schema: tool.function.parameters.unwrap_or(JsonValue::Object(Default::default())),
            })
            .collect()
    });

    let request = AnthropicRequest {
        model: provider_model_name.to_string(),
        max_tokens: body.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        },
        temperature: body.temperature,
        top_p: body.top_p,
        tools,
        stream: body.stream,
    };

    serde_json::to_value(request).unwrap_or(JsonValue::Null)
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicMessage {
    id: String,
    model: String,
    content: Vec<AnthropicResponseBlock>,
    stop_reason: Option<AnthropicStopReason>,
    usage: AnthropicUsage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: JsonValue },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AnthropicStopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    PauseTurn,
    Refusal,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
    cache_read_input_tokens: Option<i64>,
}

fn map_finish_reason(reason: AnthropicStopReason) -> ChatCompletionFinishReason {
    match reason {
        AnthropicStopReason::MaxTokens => ChatCompletionFinishReason::Length,
        AnthropicStopReason::ToolUse => ChatCompletionFinishReason::ToolCalls,
        AnthropicStopReason::Refusal => ChatCompletionFinishReason::ContentFilter,
        AnthropicStopReason::StopSequence | AnthropicStopReason::EndTurn | AnthropicStopReason::PauseTurn => {
            ChatCompletionFinishReason::Stop
        }
    }
}

pub fn parse_unary(body: &[u8], created: i64) -> Result<CreateChatCompletionResponse, GatewayError> {
    let message: AnthropicMessage = serde_json::from_slice(body)
        .map_err(|err| GatewayError::UpstreamTransportError(format!("invalid anthropic response body: {err}")))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in message.content {
        match block {
            AnthropicResponseBlock::Text { text: part } => text.push_str(&part),
            AnthropicResponseBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatCompletionMessageToolCall {
                    id,
                    r#type: ChatCompletionToolCallType::Function,
                    function: ChatCompletionMessageToolCallFunction {
                        name,
                        arguments: input.to_string(),
                    },
                });
            }
            AnthropicResponseBlock::Other => {}
        }
    }

    let input_tokens = message.usage.input_tokens.unwrap_or(0);
    let output_tokens = message.usage.output_tokens.unwrap_or(0);

    Ok(CreateChatCompletionResponse {
        id: message.id,
        object: ChatCompletionObjectType::ChatCompletion,
        created,
        model: message.model,
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatCompletionResponseMessage {
                role: ChatCompletionResponseRole::Assistant,
                content: if text.is_empty() { None } else { Some(text) },
                reasoning_content: None,
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            },
            finish_reason: message.stop_reason.map(map_finish_reason).unwrap_or(ChatCompletionFinishReason::Stop),
        }],
        usage: Some(CompletionUsage {
            prompt_tokens: input_tokens,
            completion_tokens: output_tokens,
            total_tokens: input_tokens + output_tokens,
            reasoning_tokens: None,
            prompt_tokens_details: message.usage.cache_read_input_tokens.map(|cached_tokens| {
                gateway_protocol::chat::types::PromptTokensDetails {
                    cached_tokens: Some(cached_tokens),
                }
            }),
        }),
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart { message: AnthropicStreamMessageStart },
    ContentBlockStart { index: u32, content_block: AnthropicStreamBlockStart },
    ContentBlockDelta { index: u32, delta: AnthropicStreamDelta },
    ContentBlockStop { index: u32 },
    MessageDelta { delta: AnthropicMessageDelta, usage: AnthropicStreamUsage },
    MessageStop,
    Ping,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicStreamMessageStart {
    id: String,
    model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamBlockStart {
    Text { text: String },
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicMessageDelta {
    stop_reason: Option<AnthropicStopReason>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct AnthropicStreamUsage {
    output_tokens: Option<i64>,
}

#[derive(Debug, Clone)]
struct ToolCallInfo {
    id: String,
    name: String,
}

/// Maps Anthropic's content-block event stream onto our OpenAI-shaped
/// stream chunks, then accumulates those chunks into the unary-equivalent
/// response the same way the openai-family collector does.
pub struct AnthropicStreamCollector {
    id: String,
    model: String,
    created: i64,
    tool_calls: BTreeMap<u32, ToolCallInfo>,
    content: String,
    accumulated_tool_calls: BTreeMap<u32, (Option<String>, Option<String>, String)>,
    finish_reason: Option<ChatCompletionFinishReason>,
    input_tokens: i64,
    output_tokens: i64,
}

impl AnthropicStreamCollector {
    pub fn new(created: i64) -> Self {
        Self {
            id: "unknown".to_string(),
            model: "unknown".to_string(),
            created,
            tool_calls: BTreeMap::new(),
            content: String::new(),
            accumulated_tool_calls: BTreeMap::new(),
            finish_reason: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Parses one `data:` payload (already stripped of SSE framing) and
    /// returns the corresponding OpenAI-shaped chunk, if any. `event: ping`
    /// and unrecognized events yield nothing.
    pub fn push_event(&mut self, data: &str) -> Result<Option<CreateChatCompletionStreamResponse>, GatewayError> {
        let event: AnthropicStreamEvent = serde_json::from_str(data)
            .map_err(|err| GatewayError::UpstreamTransportError(format!("invalid anthropic stream event: {err}")))?;

        let chunk = match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.id = message.id;
                self.model = message.model;
                Some(self.delta_chunk(ChatCompletionStreamResponseDelta {
                    role: Some(ChatCompletionResponseRole::Assistant),
                    content: None,
                    reasoning_content: None,
                    tool_calls: None,
                }))
            }
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => match content_block {
                AnthropicStreamBlockStart::Text { text } => {
                    if text.is_empty() {
                        None
                    } else {
                        self.content.push_str(&text);
                        Some(self.text_chunk(text))
                    }
                }
                AnthropicStreamBlockStart::ToolUse { id, name } => {
                    self.tool_calls.insert(index, ToolCallInfo { id: id.clone(), name: name.clone() });
                    self.accumulated_tool_calls.insert(index, (Some(id.clone()), Some(name.clone()), String::new()));
                    Some(self.tool_call_chunk(index, Some(id), Some(name), None))
                }
                AnthropicStreamBlockStart::Other => None,
            },
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicStreamDelta::TextDelta { text } => {
                    if text.is_empty() {
                        None
                    } else {
                        self.content.push_str(&text);
                        Some(self.text_chunk(text))
                    }
                }
                AnthropicStreamDelta::InputJsonDelta { partial_json } => {
                    if partial_json.is_empty() {
                        None
                    } else {
                        let entry = self.accumulated_tool_calls.entry(index).or_insert((None, None, String::new()));
                        entry.2.push_str(&partial_json);
                        Some(self.tool_call_chunk(index, None, None, Some(partial_json)))
                    }
                }
                AnthropicStreamDelta::Other => None,
            },
            AnthropicStreamEvent::ContentBlockStop { .. } => None,
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(output_tokens) = usage.output_tokens {
                    self.output_tokens = output_tokens;
                }
                let finish_reason = delta.stop_reason.map(map_finish_reason);
                if finish_reason.is_some() {
                    self.finish_reason = finish_reason;
                }
                finish_reason.map(|reason| self.finish_chunk(reason))
            }
            AnthropicStreamEvent::MessageStop | AnthropicStreamEvent::Ping | AnthropicStreamEvent::Other => None,
        };

        Ok(chunk)
    }

    pub fn note_input_tokens(&mut self, input_tokens: i64) {
        self.input_tokens = input_tokens;
    }

    pub fn finalize(&self) -> CreateChatCompletionResponse {
        let tool_calls: Vec<_> = self
            .accumulated_tool_calls
            .iter()
            .map(|(index, (id, name, arguments))| {
                let info = self.tool_calls.get(index);
                ChatCompletionMessageToolCall {
                    id: id.clone().or_else(|| info.map(|i| i.id.clone())).unwrap_or_default(),
                    r#type: ChatCompletionToolCallType::Function,
                    function: ChatCompletionMessageToolCallFunction {
                        name: name.clone().or_else(|| info.map(|i| i.name.clone())).unwrap_or_default(),
                        arguments: arguments.clone(),
                    },
                }
            })
            .collect();

        CreateChatCompletionResponse {
            id: self.id.clone(),
            object: ChatCompletionObjectType::ChatCompletion,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionResponseMessage {
                    role: ChatCompletionResponseRole::Assistant,
                    content: if self.content.is_empty() { None } else { Some(self.content.clone()) },
                    reasoning_content: None,
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                },
                finish_reason: self.finish_reason.unwrap_or(ChatCompletionFinishReason::Stop),
            }],
            usage: Some(CompletionUsage {
                prompt_tokens: self.input_tokens,
                completion_tokens: self.output_tokens,
                total_tokens: self.input_tokens + self.output_tokens,
                reasoning_tokens: None,
                prompt_tokens_details: None,
            }),
        }
    }

    fn delta_chunk(&self, delta: ChatCompletionStreamResponseDelta) -> CreateChatCompletionStreamResponse {
        CreateChatCompletionStreamResponse {
            id: self.id.clone(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionStreamChoice { index: 0, delta, finish_reason: None }],
            usage: None,
        }
    }

    fn text_chunk(&self, text: String) -> CreateChatCompletionStreamResponse {
        self.delta_chunk(ChatCompletionStreamResponseDelta {
            role: None,
            content: Some(text),
            reasoning_content: None,
            tool_calls: None,
        })
    }

    fn tool_call_chunk(
        &self,
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> CreateChatCompletionStreamResponse {
        self.delta_chunk(ChatCompletionStreamResponseDelta {
            role: None,
            content: None,
            reasoning_content: None,
            tool_calls: Some(vec![ChatCompletionMessageToolCallChunk {
                index: index as i64,
                id,
                r#type: Some(ChatCompletionToolCallType::Function),
                function: Some(ChatCompletionMessageToolCallChunkFunction { name, arguments }),
            }]),
        })
    }

    fn finish_chunk(&self, reason: ChatCompletionFinishReason) -> CreateChatCompletionStreamResponse {
        CreateChatCompletionStreamResponse {
            id: self.id.clone(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta: ChatCompletionStreamResponseDelta {
                    role: None,
                    content: None,
                    reasoning_content: None,
                    tool_calls: None,
                },
                finish_reason: Some(reason),
            }],
            usage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_protocol::chat::types::{ChatCompletionRequestMessage, ChatCompletionRole};

    #[test]
    fn translate_pulls_system_message_out_of_message_list() {
        let body = CreateChatCompletionRequestBody {
            model: "claude-3-5-sonnet".to_string(),
            messages: vec![
                ChatCompletionRequestMessage {
                    role: ChatCompletionRole::System,
                    content: Some(ChatCompletionContent::Text("be terse".to_string())),
                    name: None,
                    tool_call_id: None,
                    tool_calls: None,
                },
                ChatCompletionRequestMessage {
                    role: ChatCompletionRole::User,
                    content: Some(ChatCompletionContent::Text("hi".to_string())),
                    name: None,
                    tool_call_id: None,
                    tool_calls: None,
                },
            ],
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

        let translated = translate_request(body, "claude-3-5-sonnet-20241022");
        assert_eq!(translated["system"], "be terse");
        assert_eq!(translated["messages"].as_array().unwrap().len(), 1);
        assert_eq!(translated["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn parse_unary_maps_tool_use_block_to_tool_call() {
        let body = br#"{
            "id": "msg_1",
            "model": "claude-3-5-sonnet-20241022",
            "content": [{"type":"tool_use","id":"call_1","name":"lookup","input":{"q":"rust"}}],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;
        let response = parse_unary(body, 1).unwrap();
        let tool_calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(tool_calls[0].function.name, "lookup");
        assert_eq!(response.choices[0].finish_reason, ChatCompletionFinishReason::ToolCalls);
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn stream_collector_accumulates_text_deltas() {
        let mut collector = AnthropicStreamCollector::new(1);
        collector
            .push_event(r#"{"type":"message_start","message":{"id":"msg_1","model":"claude-3-5-sonnet-20241022"}}"#)
            .unwrap();
        collector
            .push_event(r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#)
            .unwrap();
        collector
            .push_event(r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#)
            .unwrap();
        collector
            .push_event(r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#)
            .unwrap();
        let response = collector.finalize();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("Hi"));
        assert_eq!(response.choices[0].finish_reason, ChatCompletionFinishReason::Stop);
    }
}
