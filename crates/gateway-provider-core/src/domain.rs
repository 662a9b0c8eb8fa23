use gateway_common::{ApiKeyId, BillingMode, Money, OrgId, ProjectId, ProviderKeyId, RetentionLevel};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrgId,
    pub credits: Money,
    pub auto_topup_enabled: bool,
    pub auto_topup_threshold: Money,
    pub auto_topup_amount: Money,
    pub default_payment_method_id: Option<String>,
    pub billing_plan: String,
    pub payment_processor_customer_id: Option<String>,
    pub retention_level: RetentionLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub org_id: OrgId,
    pub billing_mode: BillingMode,
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderKey {
    pub id: ProviderKeyId,
    pub org_id: OrgId,
    pub provider_id: String,
    /// Set when `provider_id == "custom"`: the org-unique name the
    /// router's `provider/model` prefix resolves against.
    pub custom_name: Option<String>,
    pub token: String,
    pub base_url: Option<String>,
    pub status: KeyStatus,
}

impl ProviderKey {
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub project_id: ProjectId,
    pub status: KeyStatus,
}

impl ApiKey {
    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }
}
