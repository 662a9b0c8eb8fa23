pub mod config;
pub mod ids;
pub mod money;

pub use config::{GlobalConfig, GlobalConfigError, GlobalConfigPatch, NodeEnv};
pub use ids::{ApiKeyId, OrgId, ProjectId, ProviderKeyId};
pub use money::Money;

/// Per-project billing policy: which credential path is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BillingMode {
    ApiKeys,
    Credits,
    Hybrid,
}

/// Per-org policy controlling whether message bodies/content are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionLevel {
    Full,
    None,
}
