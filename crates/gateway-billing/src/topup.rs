use std::time::Duration;

use async_trait::async_trait;
use gateway_common::{Money, OrgId};
use gateway_provider_core::domain::Organization;
use time::OffsetDateTime;

use crate::lock::Lock;
use crate::payment::{
    CreatePaymentIntentRequest, FeeCalculator, PaymentError, PaymentIntentStatus, PaymentProcessor,
};

pub const AUTO_TOPUP_LOCK_NAME: &str = "auto_topup_check";
const RECENT_ATTEMPT_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub org_id: OrgId,
    pub status: TransactionStatus,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct PaymentMethodRecord {
    pub id: String,
    pub card_country: Option<String>,
}

/// Org/transaction/payment-method reads and writes the topup loop needs,
/// kept separate from `gateway-storage::Datastore` the same way the
/// ancestor splits credential storage from traffic storage — billing has
/// its own write path (transactions), the handler's datastore does not.
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Organizations with auto-topup enabled whose balance has fallen
    /// below their configured threshold.
    async fn orgs_needing_topup(&self) -> Vec<Organization>;

    /// The most recent `credit_topup` transaction for the org, if any.
    async fn most_recent_topup_transaction(&self, org_id: OrgId) -> Option<Transaction>;

    async fn payment_method(&self, payment_method_id: &str) -> Option<PaymentMethodRecord>;

    async fn insert_pending_transaction(
        &self,
        org_id: OrgId,
        base_amount: Money,
        total_fees: Money,
        total_amount: Money,
    ) -> TransactionId;

    async fn mark_transaction(
        &self,
        transaction_id: TransactionId,
        status: TransactionStatus,
        payment_intent_id: Option<String>,
        failure_message: Option<String>,
    );
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopupPassOutcome {
    pub processed: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// One auto-topup pass (spec §4.11), serialized process-wide (and, once a
/// table-backed `Lock` is wired, cross-process) by `auto_topup_check`.
/// Returns `None` if another holder currently owns the lock.
pub async fn run_pass(
    store: &dyn BillingStore,
    lock: &dyn Lock,
    processor: &dyn PaymentProcessor,
    fees: &dyn FeeCalculator,
    lock_lease: Duration,
) -> Option<TopupPassOutcome> {
    if !lock.try_acquire(AUTO_TOPUP_LOCK_NAME, lock_lease).await {
        return None;
    }
    let outcome = run_pass_locked(store, processor, fees).await;
    lock.release(AUTO_TOPUP_LOCK_NAME).await;
    Some(outcome)
}

async fn run_pass_locked(
    store: &dyn BillingStore,
    processor: &dyn PaymentProcessor,
    fees: &dyn FeeCalculator,
) -> TopupPassOutcome {
    let mut outcome = TopupPassOutcome::default();
    let now = OffsetDateTime::now_utc();

    for org in store.orgs_needing_topup().await {
        if let Some(recent) = store.most_recent_topup_transaction(org.id).await
            && matches!(recent.status, TransactionStatus::Pending | TransactionStatus::Failed)
            && now - recent.created_at < RECENT_ATTEMPT_WINDOW
        {
            outcome.skipped += 1;
            continue;
        }

        let Some(payment_method_id) = org.default_payment_method_id.clone() else {
            outcome.skipped += 1;
            continue;
        };
        let Some(payment_method) = store.payment_method(&payment_method_id).await else {
            outcome.skipped += 1;
            continue;
        };

        let breakdown = fees.calculate(
            &org.billing_plan,
            payment_method.card_country.as_deref(),
            org.auto_topup_amount,
        );

        let transaction_id = store
            .insert_pending_transaction(
                org.id,
                breakdown.base_amount,
                breakdown.total_fees,
                breakdown.total_amount,
            )
            .await;

        match processor
            .create_payment_intent(CreatePaymentIntentRequest {
                customer_id: org.payment_processor_customer_id.clone(),
                payment_method_id: payment_method.id.clone(),
                amount: breakdown.total_amount,
                off_session: true,
                confirm: true,
            })
            .await
        {
            Ok(result) => match result.status {
                // Settling the transaction and crediting the org happens
                // off a webhook, outside this spec; the row stays pending.
                PaymentIntentStatus::Succeeded | PaymentIntentStatus::RequiresAction => {
                    store
                        .mark_transaction(transaction_id, TransactionStatus::Pending, Some(result.id), None)
                        .await;
                    outcome.processed += 1;
                }
                PaymentIntentStatus::Failed => {
                    store
                        .mark_transaction(transaction_id, TransactionStatus::Failed, Some(result.id), None)
                        .await;
                    outcome.failed += 1;
                }
            },
            Err(err) => {
                let message = match err {
                    PaymentError::Rejected(message) | PaymentError::Exception(message) => message,
                };
                store
                    .mark_transaction(transaction_id, TransactionStatus::Failed, None, Some(message))
                    .await;
                outcome.failed += 1;
            }
        }
    }

    if outcome.processed > 0 || outcome.failed > 0 || outcome.skipped > 0 {
        tracing::info!(
            processed = outcome.processed,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "auto-topup pass complete"
        );
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::InMemoryLock;
    use crate::payment::{FakePaymentProcessor, StandardFeeCalculator};
    use gateway_common::RetentionLevel;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    fn org(credits: rust_decimal::Decimal) -> Organization {
        Organization {
            id: OrgId::from(1),
            credits: Money::new(credits),
            auto_topup_enabled: true,
            auto_topup_threshold: Money::new(dec!(5.00)),
            auto_topup_amount: Money::new(dec!(20.00)),
            default_payment_method_id: Some("pm_1".to_string()),
            billing_plan: "free".to_string(),
            payment_processor_customer_id: Some("cus_1".to_string()),
            retention_level: RetentionLevel::Full,
        }
    }

    #[derive(Default)]
    struct FakeStore {
        org: Mutex<Option<Organization>>,
        last_transaction: Mutex<Option<Transaction>>,
        next_id: Mutex<i64>,
    }

    #[async_trait]
    impl BillingStore for FakeStore {
        async fn orgs_needing_topup(&self) -> Vec<Organization> {
            self.org.lock().unwrap().clone().into_iter().collect()
        }

        async fn most_recent_topup_transaction(&self, _org_id: OrgId) -> Option<Transaction> {
            self.last_transaction.lock().unwrap().clone()
        }

        async fn payment_method(&self, payment_method_id: &str) -> Option<PaymentMethodRecord> {
            Some(PaymentMethodRecord {
                id: payment_method_id.to_string(),
                card_country: Some("US".to_string()),
            })
        }

        async fn insert_pending_transaction(
            &self,
            org_id: OrgId,
            base_amount: Money,
            total_fees: Money,
            _total_amount: Money,
        ) -> TransactionId {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let id = TransactionId(*next_id);
            *self.last_transaction.lock().unwrap() = Some(Transaction {
                id,
                org_id,
                status: TransactionStatus::Pending,
                created_at: OffsetDateTime::now_utc(),
            });
            let _ = (base_amount, total_fees);
            id
        }

        async fn mark_transaction(
            &self,
            transaction_id: TransactionId,
            status: TransactionStatus,
            _payment_intent_id: Option<String>,
            _failure_message: Option<String>,
        ) {
            let mut last = self.last_transaction.lock().unwrap();
            if let Some(transaction) = last.as_mut()
                && transaction.id == transaction_id
            {
                transaction.status = status;
            }
        }
    }

    #[tokio::test]
    async fn successful_intent_leaves_the_transaction_pending_for_the_webhook() {
        let store = FakeStore {
            org: Mutex::new(Some(org(dec!(1.00)))),
            ..Default::default()
        };
        let lock = InMemoryLock::new();
        let processor = FakePaymentProcessor::succeeding("US");
        let fees = StandardFeeCalculator;

        let outcome = run_pass(&store, &lock, &processor, &fees, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(
            store.last_transaction.lock().unwrap().as_ref().unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[tokio::test]
    async fn skips_org_with_a_pending_attempt_in_the_last_hour() {
        let store = FakeStore {
            org: Mutex::new(Some(org(dec!(1.00)))),
            last_transaction: Mutex::new(Some(Transaction {
                id: TransactionId(1),
                org_id: OrgId::from(1),
                status: TransactionStatus::Pending,
                created_at: OffsetDateTime::now_utc(),
            })),
            ..Default::default()
        };
        let lock = InMemoryLock::new();
        let processor = FakePaymentProcessor::succeeding("US");
        let fees = StandardFeeCalculator;

        let outcome = run_pass(&store, &lock, &processor, &fees, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.processed, 0);
    }

    #[tokio::test]
    async fn org_without_a_default_payment_method_is_skipped() {
        let mut no_pm = org(dec!(1.00));
        no_pm.default_payment_method_id = None;
        let store = FakeStore {
            org: Mutex::new(Some(no_pm)),
            ..Default::default()
        };
        let lock = InMemoryLock::new();
        let processor = FakePaymentProcessor::succeeding("US");
        let fees = StandardFeeCalculator;

        let outcome = run_pass(&store, &lock, &processor, &fees, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 1);
    }

    #[tokio::test]
    async fn payment_exception_marks_the_transaction_failed() {
        let store = FakeStore {
            org: Mutex::new(Some(org(dec!(1.00)))),
            ..Default::default()
        };
        let lock = InMemoryLock::new();
        let processor = FakePaymentProcessor::failing("card declined");
        let fees = StandardFeeCalculator;

        let outcome = run_pass(&store, &lock, &processor, &fees, Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(
            store.last_transaction.lock().unwrap().as_ref().unwrap().status,
            TransactionStatus::Failed
        );
    }

    #[tokio::test]
    async fn a_pass_already_holding_the_lock_blocks_a_second_caller() {
        let store = FakeStore::default();
        let lock = InMemoryLock::new();
        lock.try_acquire(AUTO_TOPUP_LOCK_NAME, Duration::from_secs(600)).await;
        let processor = FakePaymentProcessor::succeeding("US");
        let fees = StandardFeeCalculator;

        let outcome = run_pass(&store, &lock, &processor, &fees, Duration::from_secs(600)).await;
        assert!(outcome.is_none());
    }
}
