use std::collections::VecDeque;

use async_trait::async_trait;
use gateway_common::{ApiKeyId, Money, OrgId, ProjectId};
use serde_json::Value as Json;
use tokio::sync::Mutex;

/// A serialized Log row awaiting persistence. `billable_cost` is the
/// amount the worker debits from the org (zero for cached responses and
/// for api-keys-mode projects); `total_cost` is the full computed cost
/// recorded on the row regardless of billing mode.
#[derive(Debug, Clone)]
pub struct PendingLog {
    pub request_id: String,
    pub org_id: OrgId,
    pub project_id: ProjectId,
    pub api_key_id: ApiKeyId,
    pub requested_model: String,
    pub requested_provider: Option<String>,
    pub used_model: String,
    pub used_provider: String,
    pub finish_reason: Option<String>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub reasoning_tokens: u32,
    pub cached_tokens: u32,
    pub total_cost: Money,
    pub billable_cost: Money,
    pub duration_ms: u64,
    pub response_size_bytes: u64,
    pub streamed: bool,
    pub canceled: bool,
    pub cached: bool,
    pub has_error: bool,
    pub error_message: Option<String>,
    pub messages: Option<Json>,
    pub content: Option<String>,
    pub tool_calls: Option<Json>,
    pub custom_headers: Json,
    pub generation_params: Json,
}

/// Durable main/processing queue feeding the log worker. `gateway-core`
/// depends on this trait, not on a concrete queue, so the worker's
/// claim/persist/acknowledge loop is testable without a database.
#[async_trait]
pub trait LogQueue: Send + Sync {
    async fn enqueue(&self, log: PendingLog);

    /// Atomically moves up to `n` messages from main to processing and
    /// returns them.
    async fn claim_batch(&self, n: usize) -> Vec<PendingLog>;

    /// Removes the named requests from processing once persisted.
    async fn acknowledge(&self, request_ids: &[String]);

    /// Moves everything still in processing back to main. Called at
    /// worker startup (crash recovery) and after a persistence error.
    async fn recover_processing(&self) -> usize;

    async fn main_len(&self) -> usize;
    async fn processing_len(&self) -> usize;
}

#[derive(Default)]
pub struct InMemoryLogQueue {
    main: Mutex<VecDeque<PendingLog>>,
    processing: Mutex<VecDeque<PendingLog>>,
}

impl InMemoryLogQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogQueue for InMemoryLogQueue {
    async fn enqueue(&self, log: PendingLog) {
        self.main.lock().await.push_back(log);
    }

    async fn claim_batch(&self, n: usize) -> Vec<PendingLog> {
        let mut main = self.main.lock().await;
        let mut processing = self.processing.lock().await;
        let mut batch = Vec::with_capacity(n.min(main.len()));
        for _ in 0..n {
            let Some(log) = main.pop_front() else {
                break;
            };
            batch.push(log.clone());
            processing.push_back(log);
        }
        batch
    }

    async fn acknowledge(&self, request_ids: &[String]) {
        let mut processing = self.processing.lock().await;
        processing.retain(|log| !request_ids.contains(&log.request_id));
    }

    async fn recover_processing(&self) -> usize {
        let mut main = self.main.lock().await;
        let mut processing = self.processing.lock().await;
        let recovered = processing.len();
        main.extend(processing.drain(..));
        recovered
    }

    async fn main_len(&self) -> usize {
        self.main.lock().await.len()
    }

    async fn processing_len(&self) -> usize {
        self.processing.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_common::{ApiKeyId, Money, OrgId, ProjectId};
    use serde_json::json;

    fn log(request_id: &str) -> PendingLog {
        PendingLog {
            request_id: request_id.to_string(),
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
            duration_ms: 10,
            response_size_bytes: 20,
            streamed: false,
            canceled: false,
            cached: false,
            has_error: false,
            error_message: None,
            messages: None,
            content: None,
            tool_calls: None,
            custom_headers: json!({}),
            generation_params: json!({}),
        }
    }

    #[tokio::test]
    async fn claim_moves_up_to_n_messages_into_processing() {
        let queue = InMemoryLogQueue::new();
        for i in 0..15 {
            queue.enqueue(log(&format!("req-{i}"))).await;
        }

        let batch = queue.claim_batch(10).await;
        assert_eq!(batch.len(), 10);
        assert_eq!(queue.main_len().await, 5);
        assert_eq!(queue.processing_len().await, 10);
    }

    #[tokio::test]
    async fn acknowledge_removes_only_the_named_messages() {
        let queue = InMemoryLogQueue::new();
        queue.enqueue(log("req-1")).await;
        queue.enqueue(log("req-2")).await;
        queue.claim_batch(10).await;

        queue.acknowledge(&["req-1".to_string()]).await;
        assert_eq!(queue.processing_len().await, 1);
    }

    #[tokio::test]
    async fn recover_processing_moves_everything_back_to_main() {
        let queue = InMemoryLogQueue::new();
        queue.enqueue(log("req-1")).await;
        queue.enqueue(log("req-2")).await;
        queue.claim_batch(10).await;

        let recovered = queue.recover_processing().await;
        assert_eq!(recovered, 2);
        assert_eq!(queue.main_len().await, 2);
        assert_eq!(queue.processing_len().await, 0);
    }
}
