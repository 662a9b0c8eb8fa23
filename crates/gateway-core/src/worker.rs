use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gateway_common::{Money, OrgId};
use gateway_storage::{strip_for_retention, PendingLog};
use tokio::sync::watch;

use crate::state::GatewayState;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Handle the HTTP server holds to ask the worker to stop and wait for
/// its current pass to finish draining.
#[derive(Clone)]
pub struct WorkerHandle {
    stop: watch::Sender<bool>,
}

impl WorkerHandle {
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// Runs the C10 log-persistence loop: one pass per second, claiming a
/// batch, applying retention, persisting, debiting credits, and
/// acknowledging. Recovers any batch left mid-flight from a prior crash
/// before the first tick.
pub async fn spawn(state: Arc<GatewayState>) -> (tokio::task::JoinHandle<()>, WorkerHandle) {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let handle = WorkerHandle { stop: stop_tx };

    let join = tokio::spawn(async move {
        let recovered = state.log_queue.recover_processing().await;
        if recovered > 0 {
            tracing::warn!(recovered, "recovered log batch left processing at startup");
        }

        let mut iteration: u64 = 0;
        let mut interval = tokio::time::interval(TICK_INTERVAL);

        loop {
            tokio::select! {
                _ = interval.tick() => {},
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }

            run_pass(&state).await;
            iteration += 1;

            let global = state.global.load();
            let node_env = global.node_env;
            let lock_lease = Duration::from_secs(global.auto_topup_lock_lease_seconds);
            drop(global);

            if iteration % node_env.auto_topup_interval_iterations() == 0 {
                let outcome = gateway_billing::run_pass(
                    state.billing_store.as_ref(),
                    state.auto_topup_lock.as_ref(),
                    &gateway_billing::FakePaymentProcessor::default(),
                    &gateway_billing::StandardFeeCalculator,
                    lock_lease,
                )
                .await;
                match outcome {
                    Some(outcome) => tracing::info!(
                        processed = outcome.processed,
                        skipped = outcome.skipped,
                        failed = outcome.failed,
                        "auto-topup pass complete"
                    ),
                    None => tracing::debug!("auto-topup pass skipped, lock held elsewhere"),
                }
            }

            if iteration % node_env.queue_stats_interval_iterations() == 0 {
                tracing::info!(
                    main_len = state.log_queue.main_len().await,
                    processing_len = state.log_queue.processing_len().await,
                    "log queue stats"
                );
            }
        }

        let _ = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, run_pass(&state)).await;
    });

    (join, handle)
}

async fn run_pass(state: &GatewayState) {
    let batch_size = state.global.load().queue_claim_batch_size as usize;
    let batch = state.log_queue.claim_batch(batch_size).await;
    if batch.is_empty() {
        return;
    }

    let mut acknowledged = Vec::with_capacity(batch.len());
    let mut debits: HashMap<OrgId, Money> = HashMap::new();

    for log in &batch {
        match persist(state, log).await {
            Ok(()) => {
                acknowledged.push(log.request_id.clone());
                if log.billable_cost != Money::ZERO {
                    let entry = debits.entry(log.org_id).or_insert(Money::ZERO);
                    *entry = *entry + log.billable_cost;
                }
            }
            Err(err) => {
                tracing::error!(request_id = %log.request_id, error = %err, "discarding unparseable log row");
                acknowledged.push(log.request_id.clone());
            }
        }
    }

    for (org_id, amount) in debits {
        if state.datastore.debit_credits(org_id, amount).await.is_none() {
            tracing::error!(org_id = %org_id, amount = %amount, "credit debit failed, org missing or insufficient balance");
        }
    }

    state.log_queue.acknowledge(&acknowledged).await;
}

/// Stands in for the row insert a real persistence layer would do;
/// applies the organization's retention policy before "writing" so a
/// `none`-retention org never has message/content bodies land anywhere.
async fn persist(state: &GatewayState, log: &PendingLog) -> anyhow::Result<()> {
    let Some(org) = state.datastore.load_organization(log.org_id).await else {
        anyhow::bail!("organization {} not found for log row", log.org_id);
    };
    let _stripped = strip_for_retention(org.retention_level, log.clone());
    Ok(())
}
