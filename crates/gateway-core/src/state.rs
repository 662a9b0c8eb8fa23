use std::sync::Arc;

use arc_swap::ArcSwap;
use gateway_billing::{BillingStore, InMemoryLock, Lock};
use gateway_cache::ResponseCache;
use gateway_catalog::Catalog;
use gateway_common::GlobalConfig;
use gateway_storage::{Datastore, LogQueue};

use crate::upstream::UpstreamClient;

/// Everything a request handler or background worker needs, held behind
/// `Arc` so cloning the state into a tokio task is cheap. Runtime
/// config lives in an `ArcSwap` (no process-wide mutable global), per
/// the ancestor's `AppState` shape.
///
/// `datastore` and `billing_store` are two trait-object views over the
/// same underlying store (constructed from the same concrete `Arc` in
/// `bootstrap`) — the handler's hot path and the topup loop's write path
/// are kept as separate traits the way `gateway-billing` defines them,
/// but there is exactly one backing instance.
pub struct GatewayState {
    pub global: ArcSwap<GlobalConfig>,
    pub datastore: Arc<dyn Datastore>,
    pub billing_store: Arc<dyn BillingStore>,
    pub log_queue: Arc<dyn LogQueue>,
    pub catalog: Catalog,
    pub cache: ResponseCache,
    pub upstream: UpstreamClient,
    pub auto_topup_lock: Arc<dyn Lock>,
}

impl GatewayState {
    pub fn new(
        global: GlobalConfig,
        datastore: Arc<dyn Datastore>,
        billing_store: Arc<dyn BillingStore>,
        log_queue: Arc<dyn LogQueue>,
        catalog: Catalog,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            global: ArcSwap::from_pointee(global),
            datastore,
            billing_store,
            log_queue,
            catalog,
            cache: ResponseCache::new(),
            upstream: UpstreamClient::new()?,
            auto_topup_lock: Arc::new(InMemoryLock::new()),
        })
    }
}
