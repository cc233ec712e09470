use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{UnixSecs, attr, get_n};
use crate::observability;
use crate::store::{Attr, Item, Key, Store, StoreError};

use super::{EngineError, now_secs};

#[derive(Debug, Clone, Copy)]
pub struct LeaseConfig {
    /// Seconds a lease must age before it may be reclaimed. A holder also
    /// refuses to renew past the same gap: once others may reclaim, its own
    /// lease is no longer trustworthy.
    pub min_gap_secs: i64,
    /// Renewal cadence; strictly shorter than `min_gap_secs`.
    pub renew_interval_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            min_gap_secs: 120,
            renew_interval_secs: 90,
        }
    }
}

/// Exclusive, time-bounded claim on one store record.
///
/// The timestamp is both the liveness clock and the CAS token. Renewal
/// advances it in place (the keep-alive task and the owning request share
/// the handle), so the eventual release always carries the current token.
#[derive(Debug)]
pub struct Lease {
    key: Key,
    stamp: AtomicI64,
}

impl Lease {
    pub(crate) fn new(key: Key, stamp: UnixSecs) -> Self {
        Self {
            key,
            stamp: AtomicI64::new(stamp),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn stamp(&self) -> UnixSecs {
        self.stamp.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn Store>,
    config: LeaseConfig,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn Store>, config: LeaseConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> LeaseConfig {
        self.config
    }

    /// Claim the record at `key`. A lease younger than the minimum gap is
    /// still considered held — even if its holder crashed — so the claim
    /// fails `Busy`; losing the CAS round to another caller fails `Conflict`.
    pub async fn acquire(&self, key: Key) -> Result<Arc<Lease>, EngineError> {
        let item = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("{}{}", key.partition, key.sort)))?;
        let current = get_n(&item, attr::LEASE)?;

        let now = now_secs();
        if now - current <= self.config.min_gap_secs {
            metrics::counter!(observability::LEASE_BUSY_TOTAL).increment(1);
            return Err(EngineError::Busy(format!(
                "lease on {} held for another {}s",
                key.sort,
                self.config.min_gap_secs - (now - current)
            )));
        }

        match self
            .store
            .update_guarded(&key, lease_attr(now), lease_attr(current))
            .await
        {
            Ok(()) => {
                metrics::counter!(observability::LEASE_ACQUIRED_TOTAL).increment(1);
                Ok(Arc::new(Lease::new(key, now)))
            }
            Err(StoreError::PreconditionFailed) => {
                metrics::counter!(observability::LEASE_CONFLICTS_TOTAL).increment(1);
                Err(EngineError::Conflict(format!(
                    "lease on {} won by another caller",
                    key.sort
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Advance the lease timestamp. Refuses (`Expired`) once the holder has
    /// waited past the minimum gap, because another caller may already have
    /// reclaimed the record.
    pub(crate) async fn renew(&self, lease: &Lease) -> Result<(), EngineError> {
        if self.store.get(&lease.key).await?.is_none() {
            return Err(EngineError::NotFound(format!(
                "{}{}",
                lease.key.partition, lease.key.sort
            )));
        }

        let stamp = lease.stamp();
        let now = now_secs();
        if now - stamp > self.config.min_gap_secs {
            return Err(EngineError::Expired);
        }

        match self
            .store
            .update_guarded(&lease.key, lease_attr(now), lease_attr(stamp))
            .await
        {
            Ok(()) => {
                lease.stamp.store(now, Ordering::SeqCst);
                metrics::counter!(observability::LEASE_RENEWALS_TOTAL).increment(1);
                Ok(())
            }
            Err(StoreError::PreconditionFailed) => Err(EngineError::Conflict(format!(
                "lease on {} no longer ours",
                lease.key.sort
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Fresh liveness check before a sensitive write: the stored token must
    /// exactly equal ours.
    pub async fn validate(&self, lease: &Lease) -> Result<(), EngineError> {
        let item = self
            .store
            .get(&lease.key)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("{}{}", lease.key.partition, lease.key.sort))
            })?;
        if get_n(&item, attr::LEASE)? != lease.stamp() {
            return Err(EngineError::Invalid);
        }
        Ok(())
    }

    /// Hand the record back. A lost precondition means the lease was already
    /// renewed, reclaimed, or expired out from under us — reported so the
    /// caller can log it, never fatal. A stale release can't touch the next
    /// holder's lease: its token no longer matches ours.
    pub async fn release(&self, lease: &Lease) -> Result<(), EngineError> {
        match self
            .store
            .update_guarded(&lease.key, lease_attr(0), lease_attr(lease.stamp()))
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::PreconditionFailed) => Err(EngineError::Conflict(format!(
                "lease on {} already renewed or reclaimed",
                lease.key.sort
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Background keep-alive scoped to one lease: a single renewal in flight
    /// at a time, ending on the first failed renewal or on cancellation.
    pub fn spawn_renewal(&self, lease: Arc<Lease>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let interval = Duration::from_secs(self.config.renew_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        match manager.renew(&lease).await {
                            Ok(()) => {
                                debug!(key = %lease.key().sort, "lease renewed");
                            }
                            Err(e) => {
                                // A failed renewal means the lease is no
                                // longer trustworthy; never retried.
                                warn!(key = %lease.key().sort, "renewal stopped: {e}");
                                metrics::counter!(observability::LEASE_RENEWAL_FAILURES_TOTAL)
                                    .increment(1);
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}

fn lease_attr(stamp: UnixSecs) -> Item {
    Item::from([(attr::LEASE.to_string(), Attr::n(stamp))])
}
