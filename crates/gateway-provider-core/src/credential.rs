use async_trait::async_trait;
use gateway_catalog::Provider;
use gateway_common::{BillingMode, OrgId, ProviderKeyId};

use crate::domain::{Organization, Project, ProviderKey};
use crate::error::GatewayError;

/// Storage lookup the resolver needs; implemented by `gateway-storage`
/// against the real datastore and by an in-memory fake in tests.
#[async_trait]
pub trait ProviderKeyStore: Send + Sync {
    async fn find_active_key(
        &self,
        org_id: OrgId,
        provider_id: &str,
        custom_name: Option<&str>,
    ) -> Option<ProviderKey>;
}

/// Reads the `{PROVIDER}_API_KEY`-style default credential. Abstracted
/// so tests don't read real process environment variables.
pub trait EnvCredentialSource: Send + Sync {
    fn lookup(&self, env_var: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvCredentialSource for ProcessEnv {
    fn lookup(&self, env_var: &str) -> Option<String> {
        std::env::var(env_var).ok().filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedCredential {
    pub token: String,
    pub base_url: Option<String>,
    pub provider_key_id: Option<ProviderKeyId>,
}

/// Resolves which credential to dispatch a request with, per the
/// project's billing mode.
pub async fn resolve_credential(
    org: &Organization,
    project: &Project,
    provider: &Provider,
    custom_provider_name: Option<&str>,
    store: &dyn ProviderKeyStore,
    env: &dyn EnvCredentialSource,
) -> Result<ResolvedCredential, GatewayError> {
    match project.billing_mode {
        BillingMode::ApiKeys => {
            let key = store
                .find_active_key(org.id, &provider.id, custom_provider_name)
                .await
                .ok_or_else(|| GatewayError::NoProviderKey(provider.id.clone()))?;
            Ok(ResolvedCredential {
                token: key.token,
                base_url: key.base_url,
                provider_key_id: Some(key.id),
            })
        }
        BillingMode::Credits => {
            if custom_provider_name.is_some() {
                return Err(GatewayError::CustomInCreditsMode);
            }
            let token = env
                .lookup(&provider.env_var)
                .ok_or_else(|| GatewayError::NoProviderEnv(provider.id.clone()))?;
            if !org.credits.is_positive() {
                return Err(GatewayError::InsufficientCredits);
            }
            Ok(ResolvedCredential {
                token,
                base_url: None,
                provider_key_id: None,
            })
        }
        BillingMode::Hybrid => {
            if let Some(key) = store
                .find_active_key(org.id, &provider.id, custom_provider_name)
                .await
            {
                return Ok(ResolvedCredential {
                    token: key.token,
                    base_url: key.base_url,
                    provider_key_id: Some(key.id),
                });
            }
            if !org.credits.is_positive() {
                return Err(GatewayError::InsufficientCredits);
            }
            let token = env
                .lookup(&provider.env_var)
                .ok_or_else(|| GatewayError::NoProviderEnv(provider.id.clone()))?;
            Ok(ResolvedCredential {
                token,
                base_url: None,
                provider_key_id: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_common::{Money, ProjectId, RetentionLevel};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct FakeStore(HashMap<(OrgId, String, Option<String>), ProviderKey>);

    #[async_trait]
    impl ProviderKeyStore for FakeStore {
        async fn find_active_key(
            &self,
            org_id: OrgId,
            provider_id: &str,
            custom_name: Option<&str>,
        ) -> Option<ProviderKey> {
            self.0
                .get(&(org_id, provider_id.to_string(), custom_name.map(str::to_string)))
                .cloned()
        }
    }

    struct FakeEnv(HashMap<&'static str, &'static str>);

    impl EnvCredentialSource for FakeEnv {
        fn lookup(&self, env_var: &str) -> Option<String> {
            self.0.get(env_var).map(|s| s.to_string())
        }
    }

    fn provider() -> Provider {
        gateway_catalog::built_in()
            .find_provider("openai")
            .unwrap()
            .clone()
    }

    fn org(credits: rust_decimal::Decimal) -> Organization {
        Organization {
            id: OrgId::from(1),
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

    fn project(mode: BillingMode) -> Project {
        Project {
            id: ProjectId::from(1),
            org_id: OrgId::from(1),
            billing_mode: mode,
            cache_ttl_seconds: 60,
        }
    }

    #[tokio::test]
    async fn api_keys_mode_requires_a_stored_key() {
        let store = FakeStore(HashMap::new());
        let env = FakeEnv(HashMap::new());
        let err = resolve_credential(
            &org(dec!(0)),
            &project(BillingMode::ApiKeys),
            &provider(),
            None,
            &store,
            &env,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::NoProviderKey(_)));
    }

    #[tokio::test]
    async fn credits_mode_rejects_custom_providers() {
        let store = FakeStore(HashMap::new());
        let env = FakeEnv(HashMap::from([("OPENAI_API_KEY", "sk-env")]));
        let err = resolve_credential(
            &org(dec!(10)),
            &project(BillingMode::Credits),
            &provider(),
            Some("my-custom"),
            &store,
            &env,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::CustomInCreditsMode));
    }

    #[tokio::test]
    async fn credits_mode_requires_positive_balance() {
        let store = FakeStore(HashMap::new());
        let env = FakeEnv(HashMap::from([("OPENAI_API_KEY", "sk-env")]));
        let err = resolve_credential(
            &org(dec!(0)),
            &project(BillingMode::Credits),
            &provider(),
            None,
            &store,
            &env,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::InsufficientCredits));
    }

    #[tokio::test]
    async fn hybrid_mode_prefers_stored_key_over_env() {
        let key = ProviderKey {
            id: ProviderKeyId::from(7),
            org_id: OrgId::from(1),
            provider_id: "openai".to_string(),
            custom_name: None,
            token: "sk-stored".to_string(),
            base_url: None,
            status: crate::domain::KeyStatus::Active,
        };
        let store = FakeStore(HashMap::from([(
            (OrgId::from(1), "openai".to_string(), None),
            key,
        )]));
        let env = FakeEnv(HashMap::new());
        let resolved = resolve_credential(
            &org(dec!(0)),
            &project(BillingMode::Hybrid),
            &provider(),
            None,
            &store,
            &env,
        )
        .await
        .unwrap();
        assert_eq!(resolved.token, "sk-stored");
    }
}
