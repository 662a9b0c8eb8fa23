use std::sync::OnceLock;

use gateway_protocol::chat::types::ChatCompletionRequestMessage;
use tiktoken_rs::{o200k_base, CoreBPE};

/// Per-message chat framing overhead for the `gpt-4`-family chat format:
/// `<|start|>{role}\n{content}<|end|>\n`, plus a constant 3-token priming
/// reply tag appended once per request.
const TOKENS_PER_MESSAGE: usize = 3;
const TOKENS_PER_NAME: usize = 1;
const TOKENS_PER_REPLY_PRIMER: usize = 3;

fn shared_bpe() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| o200k_base().ok()).as_ref()
}

/// Falls back to a crude length-based estimate when the primary tokenizer
/// cannot encode the input at all (e.g. an unknown model family and a
/// corrupted fallback table).
fn fallback_count(text: &str) -> usize {
    (text.chars().count().div_ceil(4)).max(1)
}

/// Estimates the token count of a plain string.
pub fn count_text(model_id: &str, text: &str) -> usize {
    if text.is_empty() {
        return 1;
    }
    if let Ok(bpe) = tiktoken_rs::get_bpe_from_model(model_id) {
        return bpe.encode_ordinary(text).len().max(1);
    }
    match shared_bpe() {
        Some(bpe) => bpe.encode_ordinary(text).len().max(1),
        None => {
            tracing::warn!(model_id, "tokenizer unavailable, using length estimate");
            fallback_count(text)
        }
    }
}

/// Estimates the token count of a full chat message list, including the
/// per-message and per-name framing overhead and the assistant reply
/// primer, following the same accounting OpenAI's cookbook uses for
/// `gpt-4`-family chat models.
pub fn count_chat(model_id: &str, messages: &[ChatCompletionRequestMessage]) -> usize {
    let mut total = TOKENS_PER_REPLY_PRIMER;
    for message in messages {
        total += TOKENS_PER_MESSAGE;
        total += count_text(model_id, role_str(message));
        if let Some(content) = &message.content {
            total += count_text(model_id, &content.as_text());
        }
        if let Some(name) = &message.name {
            total += count_text(model_id, name);
            total += TOKENS_PER_NAME;
        }
        if let Some(tool_calls) = &message.tool_calls {
            for tool_call in tool_calls {
                total += count_text(model_id, &tool_call.function.name);
                total += count_text(model_id, &tool_call.function.arguments);
            }
        }
    }
    total.max(1)
}

fn role_str(message: &ChatCompletionRequestMessage) -> &'static str {
    use gateway_protocol::chat::types::ChatCompletionRole;
    match message.role {
        ChatCompletionRole::System => "system",
        ChatCompletionRole::User => "user",
        ChatCompletionRole::Assistant => "assistant",
        ChatCompletionRole::Tool => "tool",
        ChatCompletionRole::Developer => "developer",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_protocol::chat::types::{ChatCompletionContent, ChatCompletionRole};

    fn user_message(text: &str) -> ChatCompletionRequestMessage {
        ChatCompletionRequestMessage {
            role: ChatCompletionRole::User,
            content: Some(ChatCompletionContent::Text(text.to_string())),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    #[test]
    fn count_text_is_never_zero_for_nonempty_input() {
        assert!(count_text("gpt-4o", "hello world") > 0);
    }

    #[test]
    fn fallback_count_applies_ceil_div_four_with_floor_of_one() {
        assert_eq!(fallback_count(""), 1);
        assert_eq!(fallback_count("ab"), 1);
        assert_eq!(fallback_count("abcde"), 2);
        assert_eq!(fallback_count(&"x".repeat(400)), 100);
    }

    #[test]
    fn count_chat_grows_with_message_count() {
        let one = count_chat("gpt-4o", &[user_message("hi")]);
        let two = count_chat("gpt-4o", &[user_message("hi"), user_message("there")]);
        assert!(two > one);
    }
}
