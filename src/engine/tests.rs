use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::model::{CabState, attr, cab_key};
use crate::store::{Attr, Key, MemoryStore, Store};

use super::*;
use super::lease::Lease;

fn test_engine() -> Arc<Engine> {
    test_engine_with(LeaseConfig::default(), AllocatorConfig::default())
}

fn test_engine_with(lease: LeaseConfig, allocator: AllocatorConfig) -> Arc<Engine> {
    Arc::new(Engine::new(Arc::new(MemoryStore::new()), lease, allocator))
}

async fn set_attr(engine: &Engine, key: &Key, name: &str, value: Attr) {
    let mut item = engine.store.get(key).await.unwrap().unwrap();
    item.insert(name.to_string(), value);
    engine.store.put(key, item).await.unwrap();
}

/// City + one idle cab; returns (city_id, cab_id).
async fn seed_city_and_cab(engine: &Engine) -> (String, String) {
    let city = engine.onboard_city("Alpha").await.unwrap();
    let cab = engine.register_cab("Nimbus", "sedan", &city).await.unwrap();
    (city, cab)
}

// ── Lease protocol ──────────────────────────────────────────────

#[tokio::test]
async fn concurrent_acquires_have_a_single_winner() {
    let engine = test_engine();
    let (_, cab) = seed_city_and_cab(&engine).await;
    let key = cab_key(&cab);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        let key = key.clone();
        handles.push(tokio::spawn(
            async move { engine.leases().acquire(key).await },
        ));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(e.is_contention(), "unexpected failure: {e}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn acquire_is_busy_while_lease_is_young() {
    let engine = test_engine();
    let (_, cab) = seed_city_and_cab(&engine).await;

    let _held = engine.leases().acquire(cab_key(&cab)).await.unwrap();
    let err = engine.leases().acquire(cab_key(&cab)).await.unwrap_err();
    assert!(matches!(err, EngineError::Busy(_)));
}

#[tokio::test]
async fn acquire_missing_record_is_not_found() {
    let engine = test_engine();
    let err = engine
        .leases()
        .acquire(cab_key("cab_404"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn renewed_lease_stays_valid() {
    let engine = test_engine();
    let (_, cab) = seed_city_and_cab(&engine).await;

    let lease = engine.leases().acquire(cab_key(&cab)).await.unwrap();
    engine.leases().renew(&lease).await.unwrap();
    engine.leases().validate(&lease).await.unwrap();
}

#[tokio::test]
async fn renew_past_min_gap_expires_and_frees_the_record() {
    let engine = test_engine();
    let (_, cab) = seed_city_and_cab(&engine).await;
    let key = cab_key(&cab);

    // A holder that went quiet: both the stored token and its handle are
    // older than the minimum gap.
    let old = now_secs() - 200;
    set_attr(&engine, &key, attr::LEASE, Attr::n(old)).await;
    let stale = Lease::new(key.clone(), old);

    let err = engine.leases().renew(&stale).await.unwrap_err();
    assert!(matches!(err, EngineError::Expired));

    // The record is now reclaimable by anyone else.
    engine.leases().acquire(key).await.unwrap();
}

#[tokio::test]
async fn stale_release_cannot_touch_the_new_holder() {
    let engine = test_engine();
    let (_, cab) = seed_city_and_cab(&engine).await;
    let key = cab_key(&cab);

    // A holder that acquired long ago and went quiet.
    let old = now_secs() - 200;
    set_attr(&engine, &key, attr::LEASE, Attr::n(old)).await;
    let stale = Lease::new(key.clone(), old);

    let second = engine.leases().acquire(key.clone()).await.unwrap();

    // The stale holder's release loses its CAS; the write never lands.
    let err = engine.leases().release(&stale).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let item = engine.store.get(&key).await.unwrap().unwrap();
    assert_eq!(
        item.get(attr::LEASE).unwrap().as_n(),
        Some(second.stamp()),
        "new holder's token must be untouched by a stale release"
    );
    engine.leases().validate(&second).await.unwrap();
}

#[tokio::test]
async fn validate_detects_a_reclaimed_lease() {
    let engine = test_engine();
    let (_, cab) = seed_city_and_cab(&engine).await;
    let key = cab_key(&cab);

    let old = now_secs() - 200;
    set_attr(&engine, &key, attr::LEASE, Attr::n(old)).await;
    let stale = Lease::new(key.clone(), old);
    let _second = engine.leases().acquire(key).await.unwrap();

    let err = engine.leases().validate(&stale).await.unwrap_err();
    assert!(matches!(err, EngineError::Invalid));
}

#[tokio::test]
async fn renewal_loop_stops_on_cancel() {
    let engine = test_engine_with(
        LeaseConfig {
            min_gap_secs: 120,
            renew_interval_secs: 1,
        },
        AllocatorConfig::default(),
    );
    let (_, cab) = seed_city_and_cab(&engine).await;
    let lease = engine.leases().acquire(cab_key(&cab)).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = engine.leases().spawn_renewal(lease, cancel.clone());
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop must end promptly on cancellation")
        .unwrap();
}

#[tokio::test]
async fn renewal_loop_ends_after_losing_the_lease() {
    let engine = test_engine_with(
        LeaseConfig {
            min_gap_secs: 120,
            renew_interval_secs: 1,
        },
        AllocatorConfig::default(),
    );
    let (_, cab) = seed_city_and_cab(&engine).await;
    let key = cab_key(&cab);
    let lease = engine.leases().acquire(key.clone()).await.unwrap();

    // Hijack the stored token; the next renewal loses its CAS and the loop
    // must terminate on its own, without cancellation.
    set_attr(&engine, &key, attr::LEASE, Attr::n(lease.stamp() + 7)).await;

    let handle = engine
        .leases()
        .spawn_renewal(lease, CancellationToken::new());
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop must end after a failed renewal")
        .unwrap();
}

// ── Id generation ───────────────────────────────────────────────

#[tokio::test]
async fn next_id_is_collision_free_under_contention() {
    let engine = test_engine();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.next_id(CATEGORY_CAB).await.unwrap()
        }));
    }

    let mut suffixes = HashSet::new();
    for handle in handles {
        let id = handle.await.unwrap();
        let n: i64 = id.strip_prefix("cab_").unwrap().parse().unwrap();
        assert!(suffixes.insert(n), "duplicate id {id}");
    }
    assert_eq!(suffixes.len(), 50);
    assert_eq!(*suffixes.iter().min().unwrap(), 1);
    assert_eq!(*suffixes.iter().max().unwrap(), 50);
}

// ── Guarded transitions ─────────────────────────────────────────

#[tokio::test]
async fn end_trip_on_idle_cab_conflicts_and_leaves_state() {
    let engine = test_engine();
    let (_, cab) = seed_city_and_cab(&engine).await;

    let err = engine.end_trip(&cab, None).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let record = engine.load_cab(&cab).await.unwrap();
    assert_eq!(record.state, CabState::Idle);
    assert_eq!(record.history.len(), 1, "no history entry may land");
}

#[tokio::test]
async fn deactivate_activate_relocate_lifecycle() {
    let engine = test_engine();
    let city_a = engine.onboard_city("Alpha").await.unwrap();
    let city_b = engine.onboard_city("Beta").await.unwrap();
    let cab = engine.register_cab("Nimbus", "sedan", &city_a).await.unwrap();

    // Relocation requires IN_ACTIVE
    let err = engine.relocate_cab(&cab, &city_b).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    engine.deactivate_cab(&cab).await.unwrap();
    assert_eq!(
        engine.load_cab(&cab).await.unwrap().state,
        CabState::Inactive
    );

    // Double deactivate loses its precondition
    let err = engine.deactivate_cab(&cab).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    engine.relocate_cab(&cab, &city_b).await.unwrap();
    assert_eq!(engine.load_cab(&cab).await.unwrap().location, city_b);

    engine.activate_cab(&cab).await.unwrap();
    let record = engine.load_cab(&cab).await.unwrap();
    assert_eq!(record.state, CabState::Idle);
}

// ── Assignment flow ─────────────────────────────────────────────

#[tokio::test]
async fn assign_with_no_match_is_an_empty_result() {
    let engine = test_engine();
    let city = engine.onboard_city("Alpha").await.unwrap();

    let got = engine.assign_cab(&city, "city_9", "sedan").await.unwrap();
    assert!(got.is_none());
}

#[tokio::test]
async fn assign_commits_transition_and_releases_lease() {
    let engine = test_engine();
    let city_a = engine.onboard_city("Alpha").await.unwrap();
    let city_b = engine.onboard_city("Beta").await.unwrap();
    let cab = engine.register_cab("Nimbus", "sedan", &city_a).await.unwrap();

    let assignment = engine
        .assign_cab(&city_a, &city_b, "sedan")
        .await
        .unwrap()
        .expect("one idle cab must match");
    assert_eq!(assignment.cab_id, cab);
    assert_eq!(assignment.category, "sedan");

    let record = engine.load_cab(&cab).await.unwrap();
    assert_eq!(record.state, CabState::OnTrip);
    assert_eq!(record.destination, city_b);
    assert_eq!(record.lease, 0, "lease must be released after the booking");
    assert_eq!(record.history.len(), 2);

    // Demand on the origin city moved 0 → 1
    assert_eq!(engine.load_city(&city_a).await.unwrap().demand, 1);
}

#[tokio::test]
async fn assign_prefers_longest_idle_and_ties_rotate() {
    // 3 cabs with LastActivityTime {100, 50, 50}: one of the two 50s wins,
    // and across fresh trials each 50 wins at least once.
    let mut winners = HashSet::new();
    for _ in 0..40 {
        let engine = test_engine();
        let city = engine.onboard_city("Alpha").await.unwrap();
        let mut cabs = Vec::new();
        for (name, last_activity) in [("a", 100), ("b", 50), ("c", 50)] {
            let id = engine.register_cab(name, "sedan", &city).await.unwrap();
            set_attr(&engine, &cab_key(&id), attr::LAST_ACTIVITY, Attr::n(last_activity)).await;
            cabs.push(id);
        }

        let assignment = engine
            .assign_cab(&city, "city_9", "sedan")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(assignment.cab_id, cabs[0], "the 100-cab must never win");
        winners.insert(assignment.cab_id);
    }
    assert_eq!(winners.len(), 2, "both tied cabs must win across trials");
}

#[tokio::test]
async fn assign_fails_fast_when_the_winner_is_leased() {
    let engine = test_engine();
    let city = engine.onboard_city("Alpha").await.unwrap();
    let winner = engine.register_cab("a", "sedan", &city).await.unwrap();
    let other = engine.register_cab("b", "sedan", &city).await.unwrap();
    set_attr(&engine, &cab_key(&winner), attr::LAST_ACTIVITY, Attr::n(10)).await;
    set_attr(&engine, &cab_key(&other), attr::LAST_ACTIVITY, Attr::n(20)).await;

    let _held = engine.leases().acquire(cab_key(&winner)).await.unwrap();

    let err = engine
        .assign_cab(&city, "city_9", "sedan")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Busy(_)));
}

#[tokio::test]
async fn assign_retry_policy_falls_through_to_next_candidate() {
    let engine = test_engine_with(
        LeaseConfig::default(),
        AllocatorConfig {
            retry_next_candidate: true,
        },
    );
    let city = engine.onboard_city("Alpha").await.unwrap();
    let winner = engine.register_cab("a", "sedan", &city).await.unwrap();
    let other = engine.register_cab("b", "sedan", &city).await.unwrap();
    set_attr(&engine, &cab_key(&winner), attr::LAST_ACTIVITY, Attr::n(10)).await;
    set_attr(&engine, &cab_key(&other), attr::LAST_ACTIVITY, Attr::n(20)).await;

    let _held = engine.leases().acquire(cab_key(&winner)).await.unwrap();

    let assignment = engine
        .assign_cab(&city, "city_9", "sedan")
        .await
        .unwrap()
        .expect("the second-ranked cab must be assigned");
    assert_eq!(assignment.cab_id, other);
}

#[tokio::test]
async fn concurrent_bookings_share_no_cab() {
    let engine = test_engine();
    let city = engine.onboard_city("Alpha").await.unwrap();
    for name in ["a", "b", "c"] {
        engine.register_cab(name, "sedan", &city).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let city = city.clone();
        handles.push(tokio::spawn(async move {
            engine.assign_cab(&city, "city_9", "sedan").await
        }));
    }

    let mut booked = HashSet::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(Some(a)) => {
                assert!(booked.insert(a.cab_id.clone()), "cab {} double-booked", a.cab_id);
            }
            Ok(None) => {}
            Err(e) => assert!(e.is_contention(), "unexpected failure: {e}"),
        }
    }
    assert!(!booked.is_empty());
    assert!(booked.len() <= 3);
}

// ── Queries ─────────────────────────────────────────────────────

#[tokio::test]
async fn demand_ranking_orders_by_bookings() {
    let engine = test_engine();
    let city_a = engine.onboard_city("Alpha").await.unwrap();
    let city_b = engine.onboard_city("Beta").await.unwrap();
    engine.register_cab("a", "sedan", &city_b).await.unwrap();
    engine.register_cab("b", "sedan", &city_b).await.unwrap();

    // Two bookings out of Beta, none out of Alpha
    for _ in 0..2 {
        let a = engine.assign_cab(&city_b, &city_a, "sedan").await.unwrap();
        assert!(a.is_some());
    }

    let ranking = engine.demand_ranking().await.unwrap();
    assert_eq!(ranking.len(), 2);
    assert_eq!(ranking[0].city_id, city_b);
    assert_eq!(ranking[0].demand, 2);
    assert_eq!(ranking[1].city_id, city_a);
    assert_eq!(ranking[1].demand, 0);
}

#[tokio::test]
async fn history_is_sequenced_across_transitions() {
    let engine = test_engine();
    let city_a = engine.onboard_city("Alpha").await.unwrap();
    let city_b = engine.onboard_city("Beta").await.unwrap();
    let cab = engine.register_cab("Nimbus", "sedan", &city_a).await.unwrap();

    engine.assign_cab(&city_a, &city_b, "sedan").await.unwrap().unwrap();
    engine.end_trip(&cab, None).await.unwrap();
    engine.deactivate_cab(&cab).await.unwrap();
    engine.activate_cab(&cab).await.unwrap();

    let history = engine.cab_history(&cab).await.unwrap();
    assert_eq!(history.len(), 5);
    for (seq, entry) in history.iter().enumerate() {
        assert!(
            entry.starts_with(&format!("{seq}. ")),
            "entry out of order: {entry}"
        );
    }
    assert!(history[1].contains(&format!("Traveling From: {city_a} to {city_b}")));
    assert!(history[2].contains(&format!("Trip Ended In: {city_b}")));
}
