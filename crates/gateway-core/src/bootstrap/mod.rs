use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gateway_catalog::Catalog;
use gateway_common::{GlobalConfig, GlobalConfigPatch, NodeEnv};
use gateway_storage::{InMemoryDatastore, InMemoryLogQueue};

use crate::state::GatewayState;

#[derive(Debug, Clone, Parser)]
#[command(name = "gateway", version, about = "Multi-provider LLM gateway")]
pub struct CliArgs {
    /// Database DSN (required to bootstrap the rest of config).
    #[arg(long, env = "GATEWAY_DSN")]
    pub dsn: Option<String>,

    /// Bind host.
    #[arg(long, env = "GATEWAY_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "GATEWAY_PORT")]
    pub port: Option<String>,

    /// `development` or `production`; toggles worker cadences.
    #[arg(long, env = "NODE_ENV")]
    pub node_env: Option<String>,

    /// Log-worker batch claim size.
    #[arg(long, env = "GATEWAY_QUEUE_CLAIM_BATCH_SIZE")]
    pub queue_claim_batch_size: Option<String>,

    /// Default response-cache TTL in seconds.
    #[arg(long, env = "GATEWAY_CACHE_DEFAULT_TTL_SECONDS")]
    pub cache_default_ttl_seconds: Option<String>,

    /// Auto-topup distributed lock lease, in seconds.
    #[arg(long, env = "GATEWAY_AUTO_TOPUP_LOCK_LEASE_SECONDS")]
    pub auto_topup_lock_lease_seconds: Option<String>,
}

pub struct Bootstrap {
    pub state: Arc<GatewayState>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

/// Builds runtime state from CLI/ENV config alone. The ancestor merges
/// a third tier (CLI > ENV > DB-persisted config); this gateway has no
/// persisted global-config row to overlay, so the merge is just CLI > ENV.
pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let dsn = sanitize_dsn_value(args.dsn.clone());
    ensure_sqlite_parent_dir(&dsn)?;

    let host = sanitize_optional_env_value(args.host.clone());
    let port = parse_u16_env_value(args.port.clone(), "GATEWAY_PORT")?;
    let node_env = parse_node_env_value(args.node_env.clone())?;
    let queue_claim_batch_size = parse_u32_env_value(
        args.queue_claim_batch_size.clone(),
        "GATEWAY_QUEUE_CLAIM_BATCH_SIZE",
    )?;
    let cache_default_ttl_seconds = parse_u64_env_value(
        args.cache_default_ttl_seconds.clone(),
        "GATEWAY_CACHE_DEFAULT_TTL_SECONDS",
    )?;
    let auto_topup_lock_lease_seconds = parse_u64_env_value(
        args.auto_topup_lock_lease_seconds.clone(),
        "GATEWAY_AUTO_TOPUP_LOCK_LEASE_SECONDS",
    )?;

    let patch = GlobalConfigPatch {
        host,
        port,
        dsn: Some(dsn),
        node_env,
        queue_claim_batch_size,
        cache_default_ttl_seconds,
        auto_topup_lock_lease_seconds,
    };
    let mut merged = GlobalConfigPatch::default();
    merged.overlay(patch);
    let global: GlobalConfig = merged.into_config().context("finalize merged global config")?;

    let datastore = Arc::new(InMemoryDatastore::new());
    let billing_store: Arc<dyn gateway_billing::BillingStore> = datastore.clone();
    let datastore: Arc<dyn gateway_storage::Datastore> = datastore;
    let log_queue = Arc::new(InMemoryLogQueue::new());
    let catalog = Catalog::built_in().context("build catalog")?;

    let state = GatewayState::new(global, datastore, billing_store, log_queue, catalog)
        .context("build gateway state")?;

    Ok(Bootstrap {
        state: Arc::new(state),
    })
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn sanitize_dsn_value(value: Option<String>) -> String {
    sanitize_optional_env_value(value).unwrap_or_else(default_dsn)
}

fn default_dsn() -> String {
    if let Some(data_dir) = sanitize_optional_env_value(std::env::var("GATEWAY_DATA_DIR").ok()) {
        let dir = data_dir.trim_end_matches('/');
        return format!("sqlite://{dir}/gateway.db?mode=rwc");
    }
    "sqlite://gateway.db?mode=rwc".to_string()
}

fn ensure_sqlite_parent_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(db_path) = sqlite_file_path_from_dsn(dsn) else {
        return Ok(());
    };
    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    std::fs::create_dir_all(parent)
        .with_context(|| format!("create sqlite parent dir {}", parent.display()))?;
    Ok(())
}

fn sqlite_file_path_from_dsn(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next()?.trim();
    if path_part.is_empty() {
        return None;
    }

    let mut normalized = path_part;
    if let Some(stripped) = normalized.strip_prefix("//") {
        normalized = stripped;
    }

    let memory = normalized.to_ascii_lowercase();
    if memory == ":memory:" {
        return None;
    }

    Some(PathBuf::from(normalized))
}

fn parse_u16_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u16>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u16>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_u32_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u32>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u32>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_u64_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u64>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u64>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_node_env_value(value: Option<String>) -> anyhow::Result<Option<NodeEnv>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "production" => Ok(Some(NodeEnv::Production)),
        "development" => Ok(Some(NodeEnv::Development)),
        _ => Err(anyhow::anyhow!("invalid NODE_ENV value: {raw}")),
    }
}

#[cfg(test)]
mod tests {
    use super::sqlite_file_path_from_dsn;

    #[test]
    fn sqlite_dsn_resolves_relative_path() {
        let path = sqlite_file_path_from_dsn("sqlite://gateway.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "gateway.db");
    }

    #[test]
    fn sqlite_dsn_resolves_absolute_path() {
        let path = sqlite_file_path_from_dsn("sqlite://app/data/gateway.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "/app/data/gateway.db");
    }

    #[test]
    fn sqlite_memory_dsn_is_ignored() {
        assert!(sqlite_file_path_from_dsn("sqlite::memory:").is_none());
        assert!(sqlite_file_path_from_dsn("sqlite://:memory:").is_none());
    }
}
