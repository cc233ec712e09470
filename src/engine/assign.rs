use std::sync::Arc;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::{CabRecord, CabState, PART_RESOURCES, attr, city_key};
use crate::observability;
use crate::store::{Attr, Item, Store, StoreError};

use super::lease::Lease;
use super::{Engine, EngineError, now_secs};

#[derive(Debug, Clone, Copy, Default)]
pub struct AllocatorConfig {
    /// When the ranked winner's lease is lost to contention, move on to the
    /// next-ranked candidate instead of failing the booking. Off by default:
    /// the caller sees the contention and re-requests.
    pub retry_next_candidate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub cab_id: String,
    pub cab_name: String,
    pub category: String,
}

impl Engine {
    /// Book an idle cab in `from` for a trip to `to`.
    ///
    /// Candidates are ranked longest-idle-first with exact ties broken
    /// uniformly at random. The winner is leased before the state commit;
    /// the keep-alive task and the lease are torn down on every exit path.
    /// `Ok(None)` means no cab matched — an empty result, not a failure.
    pub async fn assign_cab(
        &self,
        from: &str,
        to: &str,
        category: &str,
    ) -> Result<Option<Assignment>, EngineError> {
        let items = self
            .store
            .query(
                PART_RESOURCES,
                &[
                    (attr::LOCATION, Attr::s(from)),
                    (attr::CATEGORY, Attr::s(category)),
                    (attr::STATE, Attr::s(CabState::Idle.as_str())),
                ],
            )
            .await?;
        let mut candidates = items
            .iter()
            .map(CabRecord::from_item)
            .collect::<Result<Vec<_>, _>>()?;

        if candidates.is_empty() {
            info!(from, category, "no idle cab matches the request");
            return Ok(None);
        }

        loop {
            let idx = pick_longest_idle(&candidates);
            let cab = candidates.swap_remove(idx);

            match self.leases().acquire(cab.key()).await {
                Ok(lease) => {
                    return self.commit_assignment(cab, lease, from, to).await.map(Some);
                }
                Err(e)
                    if e.is_contention()
                        && self.allocator.retry_next_candidate
                        && !candidates.is_empty() =>
                {
                    debug!(cab = %cab.id, "lease contention, trying next candidate: {e}");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs with the lease held: guarded IDLE → ON_TRIP commit, then the
    /// best-effort demand bump. The keep-alive is cancelled and the lease
    /// released before the outcome propagates, success or failure.
    async fn commit_assignment(
        &self,
        cab: CabRecord,
        lease: Arc<Lease>,
        from: &str,
        to: &str,
    ) -> Result<Assignment, EngineError> {
        let cancel = CancellationToken::new();
        let renewal = self.leases().spawn_renewal(lease.clone(), cancel.clone());

        let outcome: Result<(), EngineError> = async {
            self.transition_to_trip(&cab, from, to).await?;

            // Non-critical once the commit has applied: log and move on.
            if let Err(e) = self.store.increment(&city_key(from), attr::DEMAND, 1).await {
                warn!(city = from, "demand increment failed: {e}");
                metrics::counter!(observability::DEMAND_INCREMENT_FAILURES_TOTAL).increment(1);
            }
            Ok(())
        }
        .await;

        cancel.cancel();
        if renewal.await.is_err() {
            warn!(cab = %cab.id, "renewal task ended abnormally");
        }
        if let Err(e) = self.leases().release(&lease).await {
            // Already renewed, reclaimed, or expired elsewhere; logged,
            // never an error for the booking.
            warn!(cab = %cab.id, "lease release reported: {e}");
        }

        outcome?;

        metrics::counter!(observability::ASSIGNMENTS_TOTAL).increment(1);
        info!(cab = %cab.id, from, to, "cab assigned");
        Ok(Assignment {
            cab_id: cab.id,
            cab_name: cab.name,
            category: cab.category,
        })
    }

    async fn transition_to_trip(
        &self,
        cab: &CabRecord,
        from: &str,
        to: &str,
    ) -> Result<(), EngineError> {
        let started = now_secs();
        let mut history = cab.history.clone();
        history.push(cab.next_history_entry(&format!(
            "State: {} | Traveling From: {from} to {to} | StartTime: {started}",
            CabState::OnTrip
        )));

        let attrs = Item::from([
            (attr::STATE.to_string(), Attr::s(CabState::OnTrip.as_str())),
            (attr::DESTINATION.to_string(), Attr::s(to)),
            (attr::HISTORY.to_string(), Attr::ss(history)),
        ]);
        let expected = Item::from([(
            attr::STATE.to_string(),
            Attr::s(CabState::Idle.as_str()),
        )]);

        match self.store.update_guarded(&cab.key(), attrs, expected).await {
            Ok(()) => Ok(()),
            Err(StoreError::PreconditionFailed) => {
                metrics::counter!(observability::ASSIGNMENT_CONFLICTS_TOTAL).increment(1);
                Err(EngineError::Conflict(format!(
                    "cab {} left IDLE between selection and commit",
                    cab.id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ── Idle ranking ─────────────────────────────────────────

/// Indices of every candidate sharing the minimum `LastActivityTime`.
/// Ties are exact-equal, not approximate.
fn longest_idle(candidates: &[CabRecord]) -> Vec<usize> {
    let mut ties: Vec<usize> = Vec::new();
    let mut min = i64::MAX;
    for (idx, cab) in candidates.iter().enumerate() {
        if cab.last_activity < min {
            min = cab.last_activity;
            ties.clear();
            ties.push(idx);
        } else if cab.last_activity == min {
            ties.push(idx);
        }
    }
    ties
}

/// Longest-idle-first is the fairness policy; the uniform tie-break keeps a
/// batch of same-age cabs (e.g. freshly registered) from starving by order.
/// Callers guarantee `candidates` is non-empty.
fn pick_longest_idle(candidates: &[CabRecord]) -> usize {
    let ties = longest_idle(candidates);
    if ties.len() == 1 {
        ties[0]
    } else {
        ties[rand::thread_rng().gen_range(0..ties.len())]
    }
}
