//! Metric instrument factories for derivq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"derivq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for derivq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("derivq")
}

/// Counter: requests submitted to the ledger.
/// Labels: `kind`.
pub fn requests_submitted() -> Counter<u64> {
    meter()
        .u64_counter("derivq.requests.submitted")
        .with_description("Number of requests submitted to the ledger")
        .build()
}

/// Counter: ledger state transitions.
/// Labels: `from`, `to`.
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("derivq.requests.state_transitions")
        .with_description("Number of request state transitions")
        .build()
}

/// Counter: claim attempts.
/// Labels: `result` ("claimed" | "empty").
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("derivq.requests.claims")
        .with_description("Number of claim_next calls")
        .build()
}

/// Counter: retired requests by outcome.
/// Labels: `kind`, `result` ("fulfilled" | "deduplicated" | "fetch_failed" | "generation_failed").
pub fn fulfillments() -> Counter<u64> {
    meter()
        .u64_counter("derivq.worker.fulfillments")
        .with_description("Requests retired by workers, by outcome")
        .build()
}

/// Histogram: end-to-end fulfillment duration per request.
/// Labels: `kind`.
pub fn fulfillment_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("derivq.worker.fulfillment_duration_ms")
        .with_description("Fulfillment duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: notifications published via pg_notify.
/// Labels: `channel`.
pub fn notifications_published() -> Counter<u64> {
    meter()
        .u64_counter("derivq.notifications.published")
        .with_description("Notifications published on Postgres channels")
        .build()
}

/// Counter: notification payloads that failed to parse (logged and dropped).
/// Labels: `channel`.
pub fn malformed_notifications() -> Counter<u64> {
    meter()
        .u64_counter("derivq.notifications.malformed")
        .with_description("Notification payloads dropped as unparseable")
        .build()
}

/// Counter: artifact upserts.
/// Labels: `kind`, `result` ("inserted" | "existing").
pub fn artifact_upserts() -> Counter<u64> {
    meter()
        .u64_counter("derivq.artifacts.upserts")
        .with_description("Artifact upsert attempts, by conflict outcome")
        .build()
}

/// Counter: vector searches served.
/// Labels: `hits`.
pub fn searches() -> Counter<u64> {
    meter()
        .u64_counter("derivq.search.queries")
        .with_description("Nearest-neighbor queries served")
        .build()
}
