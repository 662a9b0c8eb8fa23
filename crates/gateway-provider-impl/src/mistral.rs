use gateway_protocol::chat::request::CreateChatCompletionRequestBody;
use gateway_protocol::chat::response::CreateChatCompletionResponse;
use gateway_provider_core::GatewayError;

use crate::openai_family;

pub use openai_family::StreamCollector;

/// Mistral speaks the openai-family wire format; the only addition is
/// unwrapping a markdown JSON fence some Mistral models still emit when
/// asked for `response_format: json_object`.
pub fn translate_request(
    body: CreateChatCompletionRequestBody,
    provider_model_name: &str,
) -> CreateChatCompletionRequestBody {
    openai_family::translate_request(body, provider_model_name)
}

pub fn parse_unary(
    body: &[u8],
    wants_json_output: bool,
) -> Result<CreateChatCompletionResponse, GatewayError> {
    let mut response = openai_family::parse_unary(body)?;
    if wants_json_output {
        unwrap_json_fence(&mut response);
    }
    Ok(response)
}

pub fn finish_stream(
    collector: &mut StreamCollector,
    wants_json_output: bool,
) -> Result<(Vec<gateway_protocol::chat::stream::CreateChatCompletionStreamResponse>, CreateChatCompletionResponse), GatewayError> {
    let (trailing, mut response) = collector.finish()?;
    if wants_json_output {
        unwrap_json_fence(&mut response);
    }
    Ok((trailing, response))
}

fn unwrap_json_fence(response: &mut CreateChatCompletionResponse) {
    let Some(choice) = response.choices.first_mut() else {
        return;
    };
    let Some(content) = choice.message.content.as_mut() else {
        return;
    };
    if let Some(unwrapped) = strip_fence(content) {
        *content = unwrapped;
    }
}

fn strip_fence(content: &str) -> Option<String> {
    let trimmed = content.trim();
    let without_lang = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))?;
    let inner = without_lang.strip_suffix("```")?;
    Some(inner.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_code_fence() {
        let stripped = strip_fence("```json\n{\"a\":1}\n```").unwrap();
        assert_eq!(stripped, "{\"a\":1}");
    }

    #[test]
    fn leaves_unfenced_content_untouched() {
        assert!(strip_fence("{\"a\":1}").is_none());
    }
}
