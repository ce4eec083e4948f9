//! Prometheus metrics exporter for the query gateway.
//!
//! Kept in the teacher's shape: a static `Lazy<Registry>` plus one
//! `Lazy<Gauge/GaugeVec/Counter/CounterVec>` per metric, served by a small
//! hand-rolled HTTP exporter (`server.rs`) independent of the client-facing
//! HTTP ports (spec.md §9.4).

use once_cell::sync::Lazy;
use prometheus::{Counter, CounterVec, Gauge, Opts, Registry};

mod metrics;
mod server;
mod system;

pub use server::start_prometheus_server;

pub(crate) static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub(crate) static TOTAL_MEMORY: Lazy<Gauge> = Lazy::new(|| {
    let gauge = Gauge::new(
        "query_gateway_total_memory",
        "Total memory allocated to the query gateway process in bytes.",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub(crate) static SESSIONS_IN_USE: Lazy<Gauge> = Lazy::new(|| {
    let gauge = Gauge::new(
        "query_gateway_sessions_in_use",
        "Number of session pool slots currently UNAVAILABLE (acquired).",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

pub(crate) static SESSIONS_REAPED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    let counter = Counter::new(
        "query_gateway_sessions_reaped_total",
        "Total number of orphaned sessions reclaimed by the allocator's reaper.",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub(crate) static REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let counter = CounterVec::new(
        Opts::new(
            "query_gateway_requests_total",
            "Total number of HTTP requests handled, labeled by route.",
        ),
        &["route"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub(crate) static ENGINE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let counter = CounterVec::new(
        Opts::new(
            "query_gateway_engine_errors_total",
            "Total number of engine failures, labeled by classification (connection_fatal or query_local).",
        ),
        &["class"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Count one request against `route`'s counter. Called from the dispatcher
/// on every inbound request, not just successful ones.
pub fn record_request(route: &str) {
    REQUESTS_TOTAL.with_label_values(&[route]).inc();
}

/// Count one engine failure against its classification.
pub fn record_engine_error(class: crate::engine::ErrorClass) {
    let label = match class {
        crate::engine::ErrorClass::ConnectionFatal => "connection_fatal",
        crate::engine::ErrorClass::QueryLocal => "query_local",
    };
    ENGINE_ERRORS_TOTAL.with_label_values(&[label]).inc();
}

/// Count one orphan reclaimed by the reaper.
pub fn record_session_reaped() {
    SESSIONS_REAPED_TOTAL.inc();
}
