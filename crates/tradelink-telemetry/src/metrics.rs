//! Prometheus metrics for tradelink.
//!
//! Covers:
//! - Persistent channel status and reconnects
//! - Request client totals
//! - Offline queue depth, replay outcomes and storage usage
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a programming error that should crash at
//! startup. These panics only occur during static initialization.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_gauge_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use tradelink_core::ConnectionStatus;

const CONNECTION_STATES: [ConnectionStatus; 5] = [
    ConnectionStatus::Disconnected,
    ConnectionStatus::Connecting,
    ConnectionStatus::Connected,
    ConnectionStatus::Reconnecting,
    ConnectionStatus::Error,
];

const OFFLINE_MODES: [&str; 3] = ["full", "limited", "read-only"];

/// Persistent channel connected (1) or not (0).
pub static WS_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tradelink_ws_connected",
        "Persistent channel connection state (1=connected)"
    )
    .unwrap()
});

/// Current connection status, one-hot.
/// Labels: state (disconnected/connecting/connected/reconnecting/error)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tradelink_ws_state",
        "Persistent channel status (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Reconnect attempts scheduled.
pub static WS_RECONNECT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tradelink_ws_reconnect_total",
        "Total persistent channel reconnect attempts"
    )
    .unwrap()
});

/// Inbound envelopes by kind.
pub static WS_MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tradelink_ws_messages_total",
        "Inbound envelopes dispatched, by kind",
        &["kind"]
    )
    .unwrap()
});

pub static API_REQUESTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("tradelink_api_requests_total", "Total API requests").unwrap()
});

pub static API_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("tradelink_api_failures_total", "Total failed API requests").unwrap()
});

pub static API_RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("tradelink_api_retries_total", "Total API retry attempts").unwrap()
});

/// Actions waiting for replay.
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("tradelink_queue_depth", "Offline actions waiting for replay").unwrap()
});

/// Replay results.
/// Labels: outcome (replayed/failed)
pub static SYNC_ACTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tradelink_sync_actions_total",
        "Offline actions replayed, by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Current offline mode, one-hot.
pub static OFFLINE_MODE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tradelink_offline_mode",
        "Offline mode (1=active, 0=inactive)",
        &["mode"]
    )
    .unwrap()
});

pub static STORAGE_USAGE_BYTES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tradelink_storage_usage_bytes",
        "Estimated local storage usage in bytes"
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set the connection status. Only the active state is 1.
    pub fn connection_status(status: ConnectionStatus) {
        for state in CONNECTION_STATES {
            let active = if state == status { 1.0 } else { 0.0 };
            WS_STATE.with_label_values(&[&state.to_string()]).set(active);
        }
        WS_CONNECTED.set(i64::from(status == ConnectionStatus::Connected));
    }

    pub fn ws_reconnect() {
        WS_RECONNECT_TOTAL.inc();
    }

    pub fn ws_message(kind: &str) {
        WS_MESSAGES_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Bring the API counters up to the client's running totals.
    ///
    /// Totals lower than what was already exported (after a stats reset)
    /// are ignored; Prometheus counters never go down.
    pub fn api_totals(total: u64, failed: u64, retries: u64) {
        advance(&API_REQUESTS_TOTAL, total);
        advance(&API_FAILURES_TOTAL, failed);
        advance(&API_RETRIES_TOTAL, retries);
    }

    pub fn queue_depth(depth: usize) {
        QUEUE_DEPTH.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Bring the replay counters up to the coordinator's running totals.
    pub fn sync_totals(replayed: u64, failed: u64) {
        advance(&SYNC_ACTIONS_TOTAL.with_label_values(&["replayed"]), replayed);
        advance(&SYNC_ACTIONS_TOTAL.with_label_values(&["failed"]), failed);
    }

    /// Set the offline mode (`full`, `limited` or `read-only`).
    pub fn offline_mode(mode: &str) {
        for m in OFFLINE_MODES {
            OFFLINE_MODE
                .with_label_values(&[m])
                .set(if m == mode { 1.0 } else { 0.0 });
        }
    }

    pub fn storage_usage(bytes: u64) {
        STORAGE_USAGE_BYTES.set(i64::try_from(bytes).unwrap_or(i64::MAX));
    }

    /// Every registered metric in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_status_is_one_hot() {
        Metrics::connection_status(ConnectionStatus::Reconnecting);
        assert_eq!(WS_STATE.with_label_values(&["reconnecting"]).get(), 1.0);
        assert_eq!(WS_STATE.with_label_values(&["connected"]).get(), 0.0);
        assert_eq!(WS_CONNECTED.get(), 0);

        Metrics::connection_status(ConnectionStatus::Connected);
        assert_eq!(WS_STATE.with_label_values(&["reconnecting"]).get(), 0.0);
        assert_eq!(WS_CONNECTED.get(), 1);
    }

    #[test]
    fn test_api_totals_only_advance() {
        let start = API_REQUESTS_TOTAL.get();
        Metrics::api_totals(start + 5, 0, 0);
        assert_eq!(API_REQUESTS_TOTAL.get(), start + 5);

        Metrics::api_totals(1, 0, 0);
        assert_eq!(API_REQUESTS_TOTAL.get(), start + 5);
    }

    #[test]
    fn test_sync_totals_only_advance() {
        let replayed = SYNC_ACTIONS_TOTAL.with_label_values(&["replayed"]);
        let start = replayed.get();
        Metrics::sync_totals(start + 2, 0);
        Metrics::sync_totals(start + 2, 0);
        assert_eq!(replayed.get(), start + 2);
    }

    #[test]
    fn test_gather_text_contains_metrics() {
        Metrics::queue_depth(3);
        Metrics::offline_mode("limited");

        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("tradelink_queue_depth 3"));
        assert!(text.contains("tradelink_offline_mode{mode=\"limited\"} 1"));
    }
}
