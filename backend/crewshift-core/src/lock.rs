// src/lock.rs
//! # Distributed Lock
//!
//! TTL-based mutual exclusion backed by a shared lock row per job name. At most
//! one holder per job is active across every process instance; a holder that
//! crashes stops blocking the job once its TTL passes.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::store::{LockRow, LockStore, StoreError, UpsertOutcome};

pub const RECONCILIATION_JOB: &str = "shift_reconciliation";

/// Builds a holder id that stays distinct for concurrent runs on one host.
pub fn lock_owner(run_id: &str) -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string());
    format!("{}:{}:{}", host, std::process::id(), run_id)
}

#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Attempts to take `job_name` for `ttl`. Storage failures count as "not acquired".
    pub async fn acquire(&self, job_name: &str, ttl: Duration, owner: &str) -> bool {
        match self.try_acquire(job_name, ttl, owner).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(
                    job = job_name,
                    owner = owner,
                    error = %e,
                    "Lock acquisition failed on storage error; treating as not acquired"
                );
                false
            }
        }
    }

    async fn try_acquire(
        &self,
        job_name: &str,
        ttl: Duration,
        owner: &str,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Backend(format!("lock ttl out of range: {}", e)))?;
        let expires_at = now + ttl;

        let acquired = match self.store.find_lock(job_name).await? {
            None => {
                let row = LockRow {
                    job_name: job_name.to_string(),
                    locked_by: Some(owner.to_string()),
                    locked_at: Some(now),
                    expires_at: Some(expires_at),
                };
                match self.store.create_lock(row).await? {
                    UpsertOutcome::Created => true,
                    // Another instance created the row between our read and insert.
                    UpsertOutcome::AlreadyExisted => {
                        self.store
                            .claim_free_lock(job_name, owner, now, expires_at)
                            .await?
                    }
                }
            }
            Some(row) if row.is_free_at(now) => {
                if row.locked_by.is_some() {
                    info!(
                        job = job_name,
                        previous_holder = ?row.locked_by,
                        expired_at = ?row.expires_at,
                        "Reclaiming expired lock"
                    );
                }
                self.store
                    .claim_free_lock(job_name, owner, now, expires_at)
                    .await?
            }
            Some(row) => {
                debug!(
                    job = job_name,
                    holder = ?row.locked_by,
                    expires_at = ?row.expires_at,
                    "Lock is held by another process"
                );
                false
            }
        };

        if acquired {
            info!(job = job_name, owner = owner, expires_at = %expires_at, "Lock acquired");
        }
        Ok(acquired)
    }

    /// Like [`acquire`](Self::acquire), but hands back a guard that releases the
    /// lock when dropped.
    pub async fn acquire_guard(
        &self,
        job_name: &str,
        ttl: Duration,
        owner: &str,
    ) -> Option<LockGuard> {
        if !self.acquire(job_name, ttl, owner).await {
            return None;
        }
        Some(LockGuard {
            lock: self.clone(),
            job_name: job_name.to_string(),
            owner: owner.to_string(),
            released: false,
        })
    }

    /// Releases the lock only if `owner` still holds it. Errors are logged and
    /// swallowed: the TTL frees the row eventually.
    pub async fn release(&self, job_name: &str, owner: &str) {
        match self.store.clear_lock(job_name, owner).await {
            Ok(0) => warn!(
                job = job_name,
                owner = owner,
                "Lock release skipped: not held by this owner (expired or reclaimed)"
            ),
            Ok(_) => info!(job = job_name, owner = owner, "Lock released"),
            Err(e) => warn!(
                job = job_name,
                owner = owner,
                error = %e,
                "Lock release failed; it will expire via TTL"
            ),
        }
    }

    /// Current holder row, if the lock is held and unexpired.
    pub async fn holder(&self, job_name: &str) -> Result<Option<LockRow>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .store
            .find_lock(job_name)
            .await?
            .filter(|row| !row.is_free_at(now)))
    }

    pub async fn is_held(&self, job_name: &str) -> bool {
        match self.holder(job_name).await {
            Ok(holder) => holder.is_some(),
            Err(e) => {
                warn!(job = job_name, error = %e, "Could not read lock state");
                false
            }
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// A held lock. Call [`release`](Self::release) on the normal path; if the
/// guard is dropped instead (the holding task panicked or was cancelled) the
/// release is spawned onto the current runtime. With no runtime left the row
/// expires with its TTL.
pub struct LockGuard {
    lock: DistributedLock,
    job_name: String,
    owner: String,
    released: bool,
}

impl LockGuard {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub async fn release(mut self) {
        self.released = true;
        self.lock.release(&self.job_name, &self.owner).await;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let lock = self.lock.clone();
        let job_name = std::mem::take(&mut self.job_name);
        let owner = std::mem::take(&mut self.owner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(job = %job_name, owner = %owner, "Lock holder ended abnormally; releasing");
                handle.spawn(async move {
                    lock.release(&job_name, &owner).await;
                });
            }
            Err(_) => warn!(
                job = %job_name,
                owner = %owner,
                "Lock holder ended outside a runtime; it will expire via TTL"
            ),
        }
    }
}
