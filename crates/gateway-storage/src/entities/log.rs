use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// One row per completed, failed, or canceled request. Written once by
/// the log worker and never updated afterwards.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub request_id: String,
    pub org_id: i64,
    pub project_id: i64,
    pub api_key_id: i64,
    pub requested_model: String,
    pub requested_provider: Option<String>,
    pub used_model: String,
    pub used_provider: String,
    pub finish_reason: Option<String>,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub reasoning_tokens: i32,
    pub cached_tokens: i32,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub cached_input_cost: Decimal,
    pub request_cost: Decimal,
    pub total_cost: Decimal,
    pub estimated_cost: bool,
    pub duration_ms: i64,
    pub response_size_bytes: i64,
    pub streamed: bool,
    pub canceled: bool,
    pub cached: bool,
    pub has_error: bool,
    pub error_message: Option<String>,
    /// `None` when the org's retention level stripped message bodies.
    pub messages: Option<Json>,
    pub content: Option<String>,
    pub tool_calls: Option<Json>,
    pub custom_headers: Json,
    pub generation_params: Json,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
