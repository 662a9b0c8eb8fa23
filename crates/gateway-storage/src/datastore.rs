use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use gateway_billing::{BillingStore, PaymentMethodRecord, Transaction, TransactionId, TransactionStatus};
use gateway_common::{ApiKeyId, Money, OrgId, ProjectId, ProviderKeyId};
use gateway_provider_core::credential::ProviderKeyStore;
use gateway_provider_core::domain::{ApiKey, KeyStatus, Organization, Project, ProviderKey};
use time::OffsetDateTime;

/// Everything the handler and billing loop read and write outside the
/// log queue. `gateway-core`/`gateway-billing` depend on this trait, not
/// on sea-orm, so the pipeline is testable without a database.
///
/// Runtime reads must not hit a real database on the hot path; a
/// concrete implementation is expected to serve these from an in-memory
/// snapshot kept current by its own write path.
#[async_trait]
pub trait Datastore: ProviderKeyStore {
    async fn find_active_api_key(&self, token: &str) -> Option<(ApiKey, String)>;
    async fn load_project(&self, project_id: ProjectId) -> Option<Project>;
    async fn load_organization(&self, org_id: OrgId) -> Option<Organization>;
    async fn stored_key_providers(&self, org_id: OrgId) -> HashSet<String>;
    async fn custom_provider_exists(&self, org_id: OrgId, name: &str) -> bool;

    /// Atomic `credits = credits - amount`; never a read-modify-write
    /// from application memory. Returns the post-debit balance, or
    /// `None` if the org doesn't exist.
    async fn debit_credits(&self, org_id: OrgId, amount: Money) -> Option<Money>;
}

#[derive(Debug, Clone)]
struct ApiKeyRecord {
    key: ApiKey,
    token: String,
}

#[derive(Default)]
struct State {
    api_keys: Vec<ApiKeyRecord>,
    projects: HashMap<ProjectId, Project>,
    organizations: HashMap<OrgId, Organization>,
    provider_keys: Vec<ProviderKey>,
    payment_methods: HashMap<String, PaymentMethodRecord>,
    transactions: Vec<Transaction>,
    next_transaction_id: i64,
}

/// The functional datastore engine: `sea-orm` entities in this crate
/// describe the schema a real deployment would persist to, but nothing
/// in the workspace yet drives a live connection through them — every
/// caller is wired against this in-memory implementation instead.
pub struct InMemoryDatastore {
    state: Mutex<State>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn insert_api_key(&self, key: ApiKey, token: impl Into<String>) {
        self.state.lock().unwrap().api_keys.push(ApiKeyRecord {
            key,
            token: token.into(),
        });
    }

    pub fn insert_project(&self, project: Project) {
        self.state.lock().unwrap().projects.insert(project.id, project);
    }

    pub fn insert_organization(&self, org: Organization) {
        self.state.lock().unwrap().organizations.insert(org.id, org);
    }

    pub fn insert_provider_key(&self, key: ProviderKey) {
        self.state.lock().unwrap().provider_keys.push(key);
    }

    pub fn insert_payment_method(&self, method: PaymentMethodRecord) {
        self.state
            .lock()
            .unwrap()
            .payment_methods
            .insert(method.id.clone(), method);
    }
}

impl Default for InMemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn find_active_api_key(&self, token: &str) -> Option<(ApiKey, String)> {
        let state = self.state.lock().unwrap();
        state
            .api_keys
            .iter()
            .find(|record| record.token == token && record.key.status == KeyStatus::Active)
            .map(|record| (record.key.clone(), record.token.clone()))
    }

    async fn load_project(&self, project_id: ProjectId) -> Option<Project> {
        self.state.lock().unwrap().projects.get(&project_id).cloned()
    }

    async fn load_organization(&self, org_id: OrgId) -> Option<Organization> {
        self.state.lock().unwrap().organizations.get(&org_id).cloned()
    }

    async fn stored_key_providers(&self, org_id: OrgId) -> HashSet<String> {
        self.state
            .lock()
            .unwrap()
            .provider_keys
            .iter()
            .filter(|key| key.org_id == org_id && key.is_active() && key.provider_id != "custom")
            .map(|key| key.provider_id.clone())
            .collect()
    }

    async fn custom_provider_exists(&self, org_id: OrgId, name: &str) -> bool {
        self.state.lock().unwrap().provider_keys.iter().any(|key| {
            key.org_id == org_id
                && key.is_active()
                && key.provider_id == "custom"
                && key.custom_name.as_deref() == Some(name)
        })
    }

    async fn debit_credits(&self, org_id: OrgId, amount: Money) -> Option<Money> {
        let mut state = self.state.lock().unwrap();
        let org = state.organizations.get_mut(&org_id)?;
        org.credits = org.credits - amount;
        Some(org.credits)
    }
}

#[async_trait]
impl ProviderKeyStore for InMemoryDatastore {
    async fn find_active_key(
        &self,
        org_id: OrgId,
        provider_id: &str,
        custom_name: Option<&str>,
    ) -> Option<ProviderKey> {
        let state = self.state.lock().unwrap();
        state
            .provider_keys
            .iter()
            .find(|key| {
                key.org_id == org_id
                    && key.is_active()
                    && key.provider_id == provider_id
                    && key.custom_name.as_deref() == custom_name
            })
            .cloned()
    }
}

#[async_trait]
impl BillingStore for InMemoryDatastore {
    async fn orgs_needing_topup(&self) -> Vec<Organization> {
        self.state
            .lock()
            .unwrap()
            .organizations
            .values()
            .filter(|org| org.auto_topup_enabled && org.credits < org.auto_topup_threshold)
            .cloned()
            .collect()
    }

    async fn most_recent_topup_transaction(&self, org_id: OrgId) -> Option<Transaction> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|transaction| transaction.org_id == org_id)
            .max_by_key(|transaction| transaction.created_at)
            .cloned()
    }

    async fn payment_method(&self, payment_method_id: &str) -> Option<PaymentMethodRecord> {
        self.state
            .lock()
            .unwrap()
            .payment_methods
            .get(payment_method_id)
            .cloned()
    }

    async fn insert_pending_transaction(
        &self,
        org_id: OrgId,
        _base_amount: Money,
        _total_fees: Money,
        _total_amount: Money,
    ) -> TransactionId {
        let mut state = self.state.lock().unwrap();
        state.next_transaction_id += 1;
        let id = TransactionId(state.next_transaction_id);
        state.transactions.push(Transaction {
            id,
            org_id,
            status: TransactionStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
        });
        id
    }

    async fn mark_transaction(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
        _payment_intent_id: Option<String>,
        _failure_message: Option<String>,
    ) {
        let mut state = self.state.lock().unwrap();
        if let Some(transaction) = state.transactions.iter_mut().find(|t| t.id == transaction_id) {
            transaction.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_common::{BillingMode, RetentionLevel};
    use rust_decimal_macros::dec;

    fn org(id: i64, credits: rust_decimal::Decimal) -> Organization {
        Organization {
            id: OrgId::from(id),
            credits: Money::new(credits),
            auto_topup_enabled: false,
            auto_topup_threshold: Money::ZERO,
            auto_topup_amount: Money::ZERO,
            default_payment_method_id: None,
            billing_plan: "free".to_string(),
            payment_processor_customer_id: None,
            retention_level: RetentionLevel::Full,
        }
    }

    #[tokio::test]
    async fn debit_credits_is_a_single_atomic_decrement() {
        let store = InMemoryDatastore::new();
        store.insert_organization(org(1, dec!(10.00)));

        let balance = store.debit_credits(OrgId::from(1), Money::new(dec!(2.50))).await;
        assert_eq!(balance, Some(Money::new(dec!(7.50))));
    }

    #[tokio::test]
    async fn debit_credits_on_unknown_org_returns_none() {
        let store = InMemoryDatastore::new();
        assert_eq!(store.debit_credits(OrgId::from(99), Money::ZERO).await, None);
    }

    #[tokio::test]
    async fn find_active_api_key_ignores_disabled_keys() {
        let store = InMemoryDatastore::new();
        store.insert_api_key(
            ApiKey {
                id: ApiKeyId::from(1),
                project_id: ProjectId::from(1),
                status: KeyStatus::Disabled,
            },
            "sk-disabled",
        );

        assert!(store.find_active_api_key("sk-disabled").await.is_none());
    }

    #[tokio::test]
    async fn stored_key_providers_excludes_custom_entries() {
        let store = InMemoryDatastore::new();
        store.insert_provider_key(ProviderKey {
            id: ProviderKeyId::from(1),
            org_id: OrgId::from(1),
            provider_id: "openai".to_string(),
            custom_name: None,
            token: "sk-1".to_string(),
            base_url: None,
            status: KeyStatus::Active,
        });
        store.insert_provider_key(ProviderKey {
            id: ProviderKeyId::from(2),
            org_id: OrgId::from(1),
            provider_id: "custom".to_string(),
            custom_name: Some("my-vllm".to_string()),
            token: "sk-2".to_string(),
            base_url: Some("http://localhost:8000".to_string()),
            status: KeyStatus::Active,
        });

        let providers = store.stored_key_providers(OrgId::from(1)).await;
        assert_eq!(providers, HashSet::from(["openai".to_string()]));
        assert!(store.custom_provider_exists(OrgId::from(1), "my-vllm").await);
    }

    #[test]
    fn billing_mode_roundtrips_through_project_record() {
        let project = Project {
            id: ProjectId::from(1),
            org_id: OrgId::from(1),
            billing_mode: BillingMode::Hybrid,
            cache_ttl_seconds: 60,
        };
        assert_eq!(project.billing_mode, BillingMode::Hybrid);
    }
}
