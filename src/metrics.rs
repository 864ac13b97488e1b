//! Prometheus counters for the back-office core.
//!
//! Every counter is registered once in [`REGISTRY`]; [`render`] produces the
//! text exposition format.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new_custom(Some("backoffice".into()), None)
        .expect("registry can be created");
    pub static ref ORDERS_CREATED: IntCounter =
        IntCounter::new("orders_created_total", "Total number of orders created")
            .expect("metric can be created");
    pub static ref ORDER_STATUS_CHANGES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "order_status_changes_total",
            "Order status transitions applied"
        ),
        &["from", "to"]
    )
    .expect("metric can be created");
    pub static ref STOCK_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stock_failures_total",
            "Stock mutations rejected by the ledger"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
    pub static ref SHIPMENTS_FINISHED: IntCounter =
        IntCounter::new("shipments_finished_total", "Total number of shipments finished")
            .expect("metric can be created");
    pub static ref SIDE_EFFECT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "shipment_side_effect_failures_total",
            "Per-order side effects that failed after a shipment finished"
        ),
        &["kind"]
    )
    .expect("metric can be created");
    pub static ref NOTIFICATIONS_CREATED: IntCounter = IntCounter::new(
        "maintenance_notifications_created_total",
        "Maintenance notifications created for admins"
    )
    .expect("metric can be created");
    pub static ref EVENTS_PROCESSED: IntCounterVec = IntCounterVec::new(
        Opts::new("events_processed_total", "Domain events drained by the event loop"),
        &["event"]
    )
    .expect("metric can be created");
}

/// Registers all counters. Calling it more than once is harmless.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ORDERS_CREATED.clone()),
        Box::new(ORDER_STATUS_CHANGES.clone()),
        Box::new(STOCK_FAILURES.clone()),
        Box::new(SHIPMENTS_FINISHED.clone()),
        Box::new(SIDE_EFFECT_FAILURES.clone()),
        Box::new(NOTIFICATIONS_CREATED.clone()),
        Box::new(EVENTS_PROCESSED.clone()),
    ];
    for collector in collectors {
        // AlreadyReg on repeated calls
        let _ = REGISTRY.register(collector);
    }
}

/// Renders every registered metric in the Prometheus text format.
pub fn render() -> String {
    register_metrics();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
