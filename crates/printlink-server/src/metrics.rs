//! Metrics collection and export for printlink.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Device activity is observed through a wildcard
//! listener on the event hub, so sessions stay unaware of metrics.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use printlink_core::topic::WILDCARD;
use printlink_core::{ConnectionId, DeviceChannel, Event, EventHub, Subscription, Topic};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Metric names.
pub mod names {
    pub const EVENTS_TOTAL: &str = "printlink_events_total";
    pub const SESSIONS_OPEN: &str = "printlink_sessions_open";
    pub const SESSION_TRANSITIONS_TOTAL: &str = "printlink_session_transitions_total";
    pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "printlink_heartbeat_timeouts_total";
    pub const DEVICE_ERRORS_TOTAL: &str = "printlink_device_errors_total";
    pub const UI_CLIENTS_ACTIVE: &str = "printlink_ui_clients_active";
    pub const UI_CLIENTS_TOTAL: &str = "printlink_ui_clients_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::EVENTS_TOTAL, "Hub events published, by category");
    metrics::describe_gauge!(names::SESSIONS_OPEN, "Device sessions currently open");
    metrics::describe_counter!(
        names::SESSION_TRANSITIONS_TOTAL,
        "Session state transitions, by target state"
    );
    metrics::describe_counter!(
        names::HEARTBEAT_TIMEOUTS_TOTAL,
        "Sessions closed by the heartbeat monitor"
    );
    metrics::describe_counter!(names::DEVICE_ERRORS_TOTAL, "Device transport errors");
    metrics::describe_gauge!(names::UI_CLIENTS_ACTIVE, "Connected UI bridge clients");
    metrics::describe_counter!(names::UI_CLIENTS_TOTAL, "UI bridge clients since start");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Subscribe a listener that turns hub traffic into metrics.
pub fn observe_hub(hub: &EventHub) -> Subscription {
    let open = Mutex::new(HashSet::new());
    hub.subscribe(WILDCARD, move |event: &Event| record_event(event, &open))
}

fn record_event(event: &Event, open: &Mutex<HashSet<ConnectionId>>) {
    let category = Topic::category(&event.topic).to_string();
    counter!(names::EVENTS_TOTAL, "category" => category).increment(1);

    let Some((id, channel)) = Topic::parse_device(&event.topic) else {
        return;
    };

    match channel {
        DeviceChannel::Status => {
            let state = event.payload["state"].as_str().unwrap_or("unknown");
            counter!(names::SESSION_TRANSITIONS_TOTAL, "state" => state.to_string()).increment(1);

            let mut open = open.lock().unwrap_or_else(PoisonError::into_inner);
            if state == "open" {
                open.insert(id);
            } else {
                open.remove(&id);
            }
            gauge!(names::SESSIONS_OPEN).set(open.len() as f64);
        }
        DeviceChannel::Timeout => counter!(names::HEARTBEAT_TIMEOUTS_TOTAL).increment(1),
        DeviceChannel::Error => counter!(names::DEVICE_ERRORS_TOTAL).increment(1),
        DeviceChannel::Telemetry | DeviceChannel::Heartbeat => {}
    }
}

/// Metrics guard that tracks a UI bridge client for its lifetime.
pub struct ClientMetricsGuard;

impl ClientMetricsGuard {
    /// Create a new metrics guard, recording a client.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::UI_CLIENTS_TOTAL).increment(1);
        gauge!(names::UI_CLIENTS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ClientMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ClientMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::UI_CLIENTS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_observer_handles_every_channel() {
        // No recorder installed: only checks the listener never panics
        let hub = EventHub::new();
        let subscription = observe_hub(&hub);

        hub.publish("device:c1:status", json!({"id": "c1", "state": "open"}));
        hub.publish("device:c1:timeout", json!({"id": "c1"}));
        hub.publish("device:c1:error", json!({"id": "c1", "reason": "x"}));
        hub.publish("connection:added", json!({"id": "c1"}));

        assert_eq!(hub.listener_count(WILDCARD), 1);
        hub.unsubscribe(&subscription);
    }

    #[test]
    fn test_client_guard() {
        let _guard = ClientMetricsGuard::new();
    }
}
