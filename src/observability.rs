use std::net::SocketAddr;

// ── Booking flow ────────────────────────────────────────────────

/// Counter: bookings committed.
pub const ASSIGNMENTS_TOTAL: &str = "fleetd_assignments_total";

/// Counter: state commits lost to a raced transition.
pub const ASSIGNMENT_CONFLICTS_TOTAL: &str = "fleetd_assignment_conflicts_total";

/// Counter: best-effort demand bumps that failed (logged, never fatal).
pub const DEMAND_INCREMENT_FAILURES_TOTAL: &str = "fleetd_demand_increment_failures_total";

// ── Lease protocol ──────────────────────────────────────────────

/// Counter: leases acquired.
pub const LEASE_ACQUIRED_TOTAL: &str = "fleetd_lease_acquired_total";

/// Counter: acquisitions refused because the current lease is too young.
pub const LEASE_BUSY_TOTAL: &str = "fleetd_lease_busy_total";

/// Counter: acquisitions that lost the CAS round.
pub const LEASE_CONFLICTS_TOTAL: &str = "fleetd_lease_conflicts_total";

/// Counter: successful keep-alive renewals.
pub const LEASE_RENEWALS_TOTAL: &str = "fleetd_lease_renewals_total";

/// Counter: keep-alive loops terminated by a failed renewal.
pub const LEASE_RENEWAL_FAILURES_TOTAL: &str = "fleetd_lease_renewal_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
