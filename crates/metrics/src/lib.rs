//! Metrics facade for the Dahlia disperser.
//!
//! Provides a [`MetricsRecorder`] trait with domain-specific methods and
//! default no-op implementations. A global singleton recorder is accessed
//! via [`recorder()`], and convenience free functions delegate to it.
//!
//! Callers record metrics via free functions:
//! ```ignore
//! dahlia_metrics::record_batch_built(batch_size);
//! dahlia_metrics::record_attestation(num_quorums_met, latency_secs);
//! ```
//!
//! At startup, a deployment installs an exporter-backed recorder with
//! [`install`]; until then everything is a no-op, which is what tests and
//! the simulator want.

use std::sync::OnceLock;

/// Domain-specific metrics recording trait.
///
/// All methods have default no-op implementations so backends only need to
/// override the metrics they care about.
#[allow(unused_variables)]
pub trait MetricsRecorder: Send + Sync + 'static {
    /// A batch was built with this many certificates.
    fn record_batch_built(&self, num_blobs: usize) {}

    /// A tick found no blobs to dispatch.
    fn record_empty_tick(&self) {}

    /// One `StoreChunks` attempt completed.
    fn record_store_chunks(&self, success: bool, latency_secs: f64) {}

    /// An operator exhausted its retry budget for a batch.
    fn record_dispatch_failure(&self) {}

    /// A signature was received and fed to aggregation.
    fn record_signature_received(&self, valid: bool) {}

    /// Aggregation finalized for a batch.
    fn record_attestation(&self, quorums_met: usize, latency_secs: f64) {}

    /// A blob reached a terminal status.
    fn record_blob_terminal(&self, complete: bool) {}
}

struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {}

static RECORDER: OnceLock<Box<dyn MetricsRecorder>> = OnceLock::new();

/// Install a recorder backend. Later calls are ignored; first install wins.
pub fn install(recorder: Box<dyn MetricsRecorder>) {
    let _ = RECORDER.set(recorder);
}

/// The installed recorder, or the no-op default.
pub fn recorder() -> &'static dyn MetricsRecorder {
    static NOOP: NoopRecorder = NoopRecorder;
    RECORDER
        .get()
        .map(|b| b.as_ref())
        .unwrap_or(&NOOP)
}

/// A batch was built with this many certificates.
pub fn record_batch_built(num_blobs: usize) {
    recorder().record_batch_built(num_blobs);
}

/// A tick found no blobs to dispatch.
pub fn record_empty_tick() {
    recorder().record_empty_tick();
}

/// One `StoreChunks` attempt completed.
pub fn record_store_chunks(success: bool, latency_secs: f64) {
    recorder().record_store_chunks(success, latency_secs);
}

/// An operator exhausted its retry budget for a batch.
pub fn record_dispatch_failure() {
    recorder().record_dispatch_failure();
}

/// A signature was received and fed to aggregation.
pub fn record_signature_received(valid: bool) {
    recorder().record_signature_received(valid);
}

/// Aggregation finalized for a batch.
pub fn record_attestation(quorums_met: usize, latency_secs: f64) {
    recorder().record_attestation(quorums_met, latency_secs);
}

/// A blob reached a terminal status.
pub fn record_blob_terminal(complete: bool) {
    recorder().record_blob_terminal(complete);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_by_default() {
        // Must not panic with nothing installed.
        record_batch_built(5);
        record_store_chunks(true, 0.1);
        record_blob_terminal(false);
    }
}
