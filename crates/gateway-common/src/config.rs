use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// `NODE_ENV`-equivalent: toggles worker cadences per spec §4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeEnv {
    Development,
    Production,
}

impl NodeEnv {
    /// Worker-loop iterations between auto-topup passes.
    pub fn auto_topup_interval_iterations(&self) -> u64 {
        match self {
            NodeEnv::Production => 120,
            NodeEnv::Development => 5,
        }
    }

    /// Worker-loop iterations between queue-depth stats logs.
    pub fn queue_stats_interval_iterations(&self) -> u64 {
        match self {
            NodeEnv::Production => 60,
            NodeEnv::Development => 10,
        }
    }
}

/// Final, merged global configuration used by the running process.
///
/// Merge order (after DB connection): CLI > ENV > DB, then persisted back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    pub dsn: String,
    pub node_env: NodeEnv,
    /// Messages claimed from the main queue per worker batch (spec: N=10).
    pub queue_claim_batch_size: u32,
    /// Default response-cache TTL for projects that enable caching.
    pub cache_default_ttl_seconds: u64,
    /// Lease duration for the `auto_topup_check` distributed lock.
    pub auto_topup_lock_lease_seconds: u64,
}

/// Optional layer used while merging global config from CLI/ENV/DB.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dsn: Option<String>,
    pub node_env: Option<NodeEnv>,
    pub queue_claim_batch_size: Option<u32>,
    pub cache_default_ttl_seconds: Option<u64>,
    pub auto_topup_lock_lease_seconds: Option<u64>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.node_env.is_some() {
            self.node_env = other.node_env;
        }
        if other.queue_claim_batch_size.is_some() {
            self.queue_claim_batch_size = other.queue_claim_batch_size;
        }
        if other.cache_default_ttl_seconds.is_some() {
            self.cache_default_ttl_seconds = other.cache_default_ttl_seconds;
        }
        if other.auto_topup_lock_lease_seconds.is_some() {
            self.auto_topup_lock_lease_seconds = other.auto_topup_lock_lease_seconds;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(4001),
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            node_env: self.node_env.unwrap_or(NodeEnv::Development),
            queue_claim_batch_size: self.queue_claim_batch_size.unwrap_or(10),
            cache_default_ttl_seconds: self.cache_default_ttl_seconds.unwrap_or(3600),
            auto_topup_lock_lease_seconds: self.auto_topup_lock_lease_seconds.unwrap_or(600),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            dsn: Some(value.dsn),
            node_env: Some(value.node_env),
            queue_claim_batch_size: Some(value.queue_claim_batch_size),
            cache_default_ttl_seconds: Some(value.cache_default_ttl_seconds),
            auto_topup_lock_lease_seconds: Some(value.auto_topup_lock_lease_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_newer_values_when_present() {
        let mut base = GlobalConfigPatch {
            host: Some("0.0.0.0".to_string()),
            port: Some(4001),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(9000),
            ..Default::default()
        });
        assert_eq!(base.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(base.port, Some(9000));
    }

    #[test]
    fn into_config_requires_dsn() {
        let err = GlobalConfigPatch::default().into_config().unwrap_err();
        assert!(matches!(err, GlobalConfigError::MissingField("dsn")));
    }

    #[test]
    fn into_config_applies_defaults() {
        let config = GlobalConfigPatch {
            dsn: Some("sqlite://gateway.db?mode=rwc".to_string()),
            ..Default::default()
        }
        .into_config()
        .unwrap();
        assert_eq!(config.port, 4001);
        assert_eq!(config.node_env, NodeEnv::Development);
        assert_eq!(config.queue_claim_batch_size, 10);
    }
}
