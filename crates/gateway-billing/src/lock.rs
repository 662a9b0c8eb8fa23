use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

/// Named, leased lock. Grounded on spec §9's table-backed design: holding
/// it is a conditional insert, releasing it a delete, and a holder that
/// never released is preempted once its lease has expired rather than
/// blocking the next pass forever.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Attempts to acquire `name` for `lease`. Returns `false` if another
    /// holder's lease has not yet expired.
    async fn try_acquire(&self, name: &str, lease: Duration) -> bool;

    async fn release(&self, name: &str);
}

struct Held {
    expires_at: OffsetDateTime,
}

/// In-memory stand-in for the table-backed lock of spec §9, sufficient
/// for serializing auto-topup passes within one process. Grounded on
/// `gateway-storage`'s `InMemoryDatastore` (the same "interface-first,
/// in-memory by default" split spec.md treats persisted state as a
/// Non-goal for).
#[derive(Default)]
pub struct InMemoryLock {
    held: Mutex<HashMap<String, Held>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Lock for InMemoryLock {
    async fn try_acquire(&self, name: &str, lease: Duration) -> bool {
        let now = OffsetDateTime::now_utc();
        let mut held = self.held.lock().unwrap();
        if let Some(existing) = held.get(name)
            && existing.expires_at > now
        {
            return false;
        }
        held.insert(
            name.to_string(),
            Held {
                expires_at: now + lease,
            },
        );
        true
    }

    async fn release(&self, name: &str) {
        self.held.lock().unwrap().remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_while_first_holds_the_lease() {
        let lock = InMemoryLock::new();
        assert!(lock.try_acquire("auto_topup_check", Duration::from_secs(600)).await);
        assert!(!lock.try_acquire("auto_topup_check", Duration::from_secs(600)).await);
    }

    #[tokio::test]
    async fn release_lets_the_next_caller_acquire() {
        let lock = InMemoryLock::new();
        assert!(lock.try_acquire("auto_topup_check", Duration::from_secs(600)).await);
        lock.release("auto_topup_check").await;
        assert!(lock.try_acquire("auto_topup_check", Duration::from_secs(600)).await);
    }

    #[tokio::test]
    async fn expired_lease_is_preempted() {
        let lock = InMemoryLock::new();
        assert!(lock.try_acquire("auto_topup_check", Duration::from_millis(0)).await);
        assert!(lock.try_acquire("auto_topup_check", Duration::from_secs(600)).await);
    }
}
