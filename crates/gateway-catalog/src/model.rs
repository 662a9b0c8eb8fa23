use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Flat per-token/per-unit prices. Fields are `None` when a provider
/// mapping does not bill for that dimension (e.g. a text-only model has
/// no `image_price`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Prices {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_price: Option<Decimal>,
}

/// One row of a tiered price table, selected by prompt token count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceTier {
    pub min_context_size: u32,
    pub max_context_size: u32,
    pub input_price: Decimal,
    pub output_price: Decimal,
}

impl PriceTier {
    pub fn contains(&self, context_size: u32) -> bool {
        context_size >= self.min_context_size && context_size <= self.max_context_size
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMapping {
    pub provider_id: String,
    pub provider_model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prices: Option<Prices>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiered_prices: Option<Vec<PriceTier>>,
    pub context_size: u32,
    pub max_output: u32,
    pub streaming: bool,
    pub vision: bool,
    pub reasoning: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub json_output: bool,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub deprecated_at: Option<OffsetDateTime>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub deactivated_at: Option<OffsetDateTime>,
    pub mappings: Vec<ProviderMapping>,
}

impl Model {
    pub fn mapping_for(&self, provider_id: &str) -> Option<&ProviderMapping> {
        self.mappings
            .iter()
            .find(|mapping| mapping.provider_id == provider_id)
    }

    pub fn is_deprecated(&self, now: OffsetDateTime) -> bool {
        self.deprecated_at.is_some_and(|at| now >= at)
    }

    pub fn is_deactivated(&self, now: OffsetDateTime) -> bool {
        self.deactivated_at.is_some_and(|at| now >= at)
    }

    pub fn reasoning_supported(&self) -> bool {
        self.mappings.iter().any(|mapping| mapping.reasoning)
    }
}
