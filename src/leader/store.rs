use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// A named lease as persisted by a `LeaseStore`.
///
/// Timestamps are milliseconds since the Unix epoch. An empty `holder` means
/// the lease was released and can be taken immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseRecord {
    pub name: String,
    pub holder: String,
    pub acquired_at_ms: i64,
    pub renewed_at_ms: i64,
    pub expires_at_ms: i64,
    pub transitions: i64,
}

impl LeaseRecord {
    pub fn is_held_at(&self, now_ms: i64) -> bool {
        !self.holder.is_empty() && self.expires_at_ms > now_ms
    }
}

/// Shared coordination record backing leader election.
///
/// Implementations must make `try_acquire_or_renew` atomic with respect to
/// every other caller of the same store.
pub trait LeaseStore: Send + Sync {
    /// Create or check the backing table. Called once at startup.
    fn ensure_schema(&self) -> Result<()>;

    /// Take the lease if it is free or expired, or extend it if `identity`
    /// already holds it. Returns whether `identity` holds the lease afterwards.
    fn try_acquire_or_renew(&self, name: &str, identity: &str, ttl: Duration) -> Result<bool>;

    fn get(&self, name: &str) -> Result<Option<LeaseRecord>>;

    /// Give the lease up if `identity` holds it. Returns whether it did.
    fn release(&self, name: &str, identity: &str) -> Result<bool>;
}

pub(super) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Compute the record that results from `identity` asking for the lease at
/// `now_ms`. Returns `None` when someone else holds a live lease.
pub(super) fn next_record(
    existing: Option<&LeaseRecord>,
    name: &str,
    identity: &str,
    now_ms: i64,
    ttl: Duration,
) -> Option<LeaseRecord> {
    let expires_at_ms = now_ms + ttl.as_millis() as i64;
    match existing {
        None => Some(LeaseRecord {
            name: name.to_string(),
            holder: identity.to_string(),
            acquired_at_ms: now_ms,
            renewed_at_ms: now_ms,
            expires_at_ms,
            transitions: 0,
        }),
        Some(current) if current.holder == identity => Some(LeaseRecord {
            renewed_at_ms: now_ms,
            expires_at_ms,
            ..current.clone()
        }),
        Some(current) if current.is_held_at(now_ms) => None,
        Some(current) => Some(LeaseRecord {
            name: name.to_string(),
            holder: identity.to_string(),
            acquired_at_ms: now_ms,
            renewed_at_ms: now_ms,
            expires_at_ms,
            transitions: current.transitions + 1,
        }),
    }
}

/// Process-local lease store. Useful for single-replica setups and tests.
#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<String, LeaseRecord>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    fn try_acquire_or_renew(&self, name: &str, identity: &str, ttl: Duration) -> Result<bool> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| anyhow::anyhow!("lease table lock poisoned"))?;
        match next_record(leases.get(name), name, identity, now_ms(), ttl) {
            Some(record) => {
                leases.insert(name.to_string(), record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get(&self, name: &str) -> Result<Option<LeaseRecord>> {
        let leases = self
            .leases
            .lock()
            .map_err(|_| anyhow::anyhow!("lease table lock poisoned"))?;
        Ok(leases.get(name).cloned())
    }

    fn release(&self, name: &str, identity: &str) -> Result<bool> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| anyhow::anyhow!("lease table lock poisoned"))?;
        match leases.get_mut(name) {
            Some(record) if record.holder == identity => {
                record.holder.clear();
                record.expires_at_ms = now_ms();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
