//! Liveness heartbeats.
//!
//! The dispatch loop and the signature collector both emit heartbeats into
//! a buffered channel consumed by an external health-check endpoint. Sends
//! never block: a full channel drops the heartbeat.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::trace;

/// Component name stamped on every dispatcher heartbeat.
pub const COMPONENT: &str = "dispatcher";

/// One liveness signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatMessage {
    /// Emitting component.
    pub component: String,
    /// When the signal was emitted. Non-decreasing within one emitter.
    pub timestamp: SystemTime,
}

/// Heartbeat emitter with monotonically non-decreasing timestamps.
///
/// Wall clocks can step backwards; the emitter clamps each timestamp to the
/// maximum seen so far so consumers can rely on ordering.
#[derive(Debug)]
pub struct Liveness {
    tx: mpsc::Sender<HeartbeatMessage>,
    last_ns: AtomicU64,
}

impl Liveness {
    /// Wrap a heartbeat channel.
    pub fn new(tx: mpsc::Sender<HeartbeatMessage>) -> Self {
        Self {
            tx,
            last_ns: AtomicU64::new(0),
        }
    }

    /// Emit one heartbeat. Never blocks; drops the signal if the channel is
    /// full or closed.
    pub fn signal(&self) {
        let now = now_nanos();
        let prev = self.last_ns.fetch_max(now, Ordering::AcqRel);
        let ts = now.max(prev);

        let message = HeartbeatMessage {
            component: COMPONENT.to_string(),
            timestamp: UNIX_EPOCH + Duration::from_nanos(ts),
        };
        if self.tx.try_send(message).is_err() {
            trace!("liveness channel full or closed, dropping heartbeat");
        }
    }
}

/// Nanoseconds since the unix epoch.
pub(crate) fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
