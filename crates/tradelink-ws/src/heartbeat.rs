//! Heartbeat tracking for the persistent channel.
//!
//! Records PING/PONG timing and message activity so connection health is
//! observable through `stats()`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Heartbeat tracker for one connection manager.
pub struct HeartbeatManager {
    /// How often PING is sent while connected.
    interval: Duration,
    last_ping: RwLock<Option<DateTime<Utc>>>,
    last_pong: RwLock<Option<DateTime<Utc>>>,
    /// Last inbound frame of any kind.
    last_message: RwLock<Option<DateTime<Utc>>>,
    last_rtt_ms: RwLock<Option<i64>>,
    pings_sent: AtomicU64,
    pongs_received: AtomicU64,
}

impl HeartbeatManager {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_ping: RwLock::new(None),
            last_pong: RwLock::new(None),
            last_message: RwLock::new(None),
            last_rtt_ms: RwLock::new(None),
            pings_sent: AtomicU64::new(0),
            pongs_received: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reset timing state (called on each successful open).
    pub fn reset(&self) {
        *self.last_ping.write() = None;
        *self.last_pong.write() = None;
        *self.last_message.write() = Some(Utc::now());
    }

    /// Record that a PING was sent.
    pub fn record_ping(&self) {
        let now = Utc::now();
        *self.last_ping.write() = Some(now);
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
        debug!(time = %now, "Recorded ping");
    }

    /// Record that a PONG was received.
    pub fn record_pong(&self) {
        let now = Utc::now();
        *self.last_pong.write() = Some(now);
        self.pongs_received.fetch_add(1, Ordering::Relaxed);

        if let Some(ping_time) = *self.last_ping.read() {
            let rtt_ms = (now - ping_time).num_milliseconds();
            *self.last_rtt_ms.write() = Some(rtt_ms);
            debug!(rtt_ms, "Received pong");
        }
    }

    /// Record that any frame was received.
    pub fn record_message(&self) {
        *self.last_message.write() = Some(Utc::now());
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            last_ping: *self.last_ping.read(),
            last_pong: *self.last_pong.read(),
            last_message: *self.last_message.read(),
            last_rtt_ms: *self.last_rtt_ms.read(),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            pongs_received: self.pongs_received.load(Ordering::Relaxed),
        }
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatStats {
    pub last_ping: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
    pub last_message: Option<DateTime<Utc>>,
    pub last_rtt_ms: Option<i64>,
    pub pings_sent: u64,
    pub pongs_received: u64,
}
