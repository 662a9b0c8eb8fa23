use gateway_protocol::chat::types::{ChatCompletionRequestMessage, CompletionUsage};

/// Token counts as reported by (or partially missing from) the upstream
/// provider, before imputation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportedUsage {
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub cached_tokens: Option<i64>,
    pub reasoning_tokens: Option<i64>,
}

/// Fills in whatever token counts the provider didn't report, using the
/// tokenizer adapter, and flags the result as estimated if it had to.
/// Per invariant 4: logged values equal upstream values when upstream
/// reports them; otherwise `estimated=true`.
pub fn finalize_usage(
    reported: ReportedUsage,
    model_id: &str,
    messages: &[ChatCompletionRequestMessage],
    completion_text: &str,
) -> (CompletionUsage, bool) {
    let mut estimated = false;

    let prompt_tokens = reported.prompt_tokens.unwrap_or_else(|| {
        estimated = true;
        gateway_tokenizer::count_chat(model_id, messages) as i64
    });

    let completion_tokens = reported.completion_tokens.unwrap_or_else(|| {
        estimated = true;
        gateway_tokenizer::count_text(model_id, completion_text) as i64
    });

    let usage = CompletionUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
        reasoning_tokens: reported.reasoning_tokens,
        prompt_tokens_details: reported.cached_tokens.map(|cached_tokens| {
            gateway_protocol::chat::types::PromptTokensDetails {
                cached_tokens: Some(cached_tokens),
            }
        }),
    };

    (usage, estimated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_reported_counts_verbatim_when_both_present() {
        let (usage, estimated) = finalize_usage(
            ReportedUsage {
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
                cached_tokens: None,
                reasoning_tokens: None,
            },
            "gpt-4o",
            &[],
            "hello",
        );
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
        assert!(!estimated);
    }

    #[test]
    fn imputes_missing_counts_and_marks_estimated() {
        let (usage, estimated) = finalize_usage(
            ReportedUsage::default(),
            "gpt-4o",
            &[],
            "count to three: one two three",
        );
        assert!(usage.completion_tokens > 0);
        assert!(estimated);
    }
}
