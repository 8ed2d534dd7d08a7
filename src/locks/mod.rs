//! Per-(trader, period) mutual exclusion for score mutations.
//!
//! Acquisition retries with a fixed wait up to a bounded attempt count, then
//! fails with `LockTimeout`. Held locks carry a TTL so a crashed holder
//! cannot wedge a key forever; release is tied to guard drop.

use crate::domain::{Period, TraderId};
use crate::error::CoreError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type LockKey = (TraderId, Period);

struct LockHolder {
    token: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct LockTable {
    held: Mutex<HashMap<LockKey, LockHolder>>,
}

/// Process-wide score lock service.
pub struct ScoreLocks {
    table: Arc<LockTable>,
    ttl: Duration,
    max_attempts: u32,
    retry_wait: Duration,
    next_token: AtomicU64,
}

impl ScoreLocks {
    pub fn new(ttl_ms: u64, max_attempts: u32, retry_wait_ms: u64) -> Self {
        ScoreLocks {
            table: Arc::new(LockTable::default()),
            ttl: Duration::from_millis(ttl_ms),
            max_attempts,
            retry_wait: Duration::from_millis(retry_wait_ms),
            next_token: AtomicU64::new(1),
        }
    }

    /// Acquire the lock for (trader, period), waiting between attempts.
    ///
    /// An expired holder is taken over immediately. Fails with `LockTimeout`
    /// once attempts are exhausted; the caller treats that as fatal for the
    /// current operation.
    pub async fn acquire(
        &self,
        trader_id: &TraderId,
        period: &Period,
    ) -> Result<ScoreLockGuard, CoreError> {
        let key = (trader_id.clone(), period.clone());
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        for attempt in 0..self.max_attempts {
            {
                let mut held = self.table.held.lock();
                let now = Instant::now();
                let free = match held.get(&key) {
                    None => true,
                    Some(holder) => holder.expires_at <= now,
                };
                if free {
                    held.insert(
                        key.clone(),
                        LockHolder {
                            token,
                            expires_at: now + self.ttl,
                        },
                    );
                    return Ok(ScoreLockGuard {
                        table: Arc::clone(&self.table),
                        key,
                        token,
                    });
                }
            }

            if attempt + 1 < self.max_attempts {
                tokio::time::sleep(self.retry_wait).await;
            }
        }

        Err(CoreError::LockTimeout(format!(
            "score lock for {}/{} not acquired after {} attempts",
            trader_id, period, self.max_attempts
        )))
    }
}

/// Holds the lock for one (trader, period); releases on drop.
pub struct ScoreLockGuard {
    table: Arc<LockTable>,
    key: LockKey,
    token: u64,
}

impl std::fmt::Debug for ScoreLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreLockGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish()
    }
}

impl Drop for ScoreLockGuard {
    fn drop(&mut self) {
        let mut held = self.table.held.lock();
        // only release our own acquisition; after TTL expiry another caller
        // may legitimately hold this key
        if held.get(&self.key).map(|h| h.token) == Some(self.token) {
            held.remove(&self.key);
        }
    }
}
