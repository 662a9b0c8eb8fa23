use gateway_common::RetentionLevel;

use crate::log_queue::PendingLog;

/// Applies the org's retention policy before a log row is persisted.
/// `RetentionLevel::None` strips `messages` and `content`; the rest of
/// the row (costs, token counts, ids) is kept regardless, since billing
/// and accounting must survive retention scrubbing.
pub fn strip_for_retention(level: RetentionLevel, mut log: PendingLog) -> PendingLog {
    if level == RetentionLevel::None {
        log.messages = None;
        log.content = None;
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_queue::PendingLog;
    use gateway_common::{ApiKeyId, Money, OrgId, ProjectId};
    use serde_json::json;

    fn sample() -> PendingLog {
        PendingLog {
            request_id: "req-1".to_string(),
            org_id: OrgId::from(1),
            project_id: ProjectId::from(1),
            api_key_id: ApiKeyId::from(1),
            requested_model: "gpt-4o".to_string(),
            requested_provider: None,
            used_model: "gpt-4o".to_string(),
            used_provider: "openai".to_string(),
            finish_reason: Some("stop".to_string()),
            prompt_tokens: 10,
            completion_tokens: 5,
            reasoning_tokens: 0,
            cached_tokens: 0,
            total_cost: Money::ZERO,
            billable_cost: Money::ZERO,
            duration_ms: 100,
            response_size_bytes: 50,
            streamed: false,
            canceled: false,
            cached: false,
            has_error: false,
            error_message: None,
            messages: Some(json!([{"role": "user", "content": "hi"}])),
            content: Some("hello".to_string()),
            tool_calls: None,
            custom_headers: json!({}),
            generation_params: json!({}),
        }
    }

    #[test]
    fn strips_messages_and_content_when_retention_is_none() {
        let stripped = strip_for_retention(RetentionLevel::None, sample());
        assert!(stripped.messages.is_none());
        assert!(stripped.content.is_none());
    }

    #[test]
    fn keeps_messages_and_content_when_retention_is_full() {
        let kept = strip_for_retention(RetentionLevel::Full, sample());
        assert!(kept.messages.is_some());
        assert!(kept.content.is_some());
    }
}
