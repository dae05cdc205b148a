//! # Detection Telemetry
//!
//! `DetectionTelemetryBridge` turns raw detection payloads into
//! [`TelemetrySnapshot`]s, flags threshold breaches, and keeps a rolling
//! summary.
//!
//! `TelemetryQueue` decouples emission from the producer: `enqueue` returns
//! immediately and one named consumer thread hands snapshots to a
//! [`TelemetrySink`]. When full, the oldest queued snapshot is dropped.
//! `join` waits until the queue is empty and the consumer idle; `shutdown`
//! drains the queue before stopping the thread.

use crate::error::{MonitorError, MonitorResult};
use parking_lot::{Condvar, Mutex};
use polytier_core::unix_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Schema version assumed when a payload does not carry one.
pub const SCHEMA_VERSION: &str = "0.1";

const SNAPSHOT_HISTORY: usize = 1024;

const KNOWN_FIELDS: &[&str] = &[
    "request_id",
    "duration_ms",
    "region_count",
    "coverage_percent",
    "hull_region_count",
    "hull_volume_total",
    "topology_backend",
    "avg_candidate_score",
    "schema_version",
    "timestamp",
];

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// Alert thresholds for detection snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryThresholds {
    pub coverage_percent_min: f64,
    pub hull_region_min: f64,
    pub avg_candidate_score_min: f64,
}

impl Default for TelemetryThresholds {
    fn default() -> Self {
        Self {
            coverage_percent_min: 40.0,
            hull_region_min: 1.0,
            avg_candidate_score_min: 1.5,
        }
    }
}

/// Structured view of one detection payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub request_id: Option<String>,
    pub duration_ms: f64,
    pub region_count: u64,
    pub coverage_percent: f64,
    pub hull_region_count: u64,
    pub hull_volume_total: f64,
    pub topology_backend: Option<String>,
    pub avg_candidate_score: f64,
    pub schema_version: String,
    pub timestamp: f64,
    pub alerts: Vec<String>,
    /// Every field not listed above, passed through untouched.
    pub metadata: BTreeMap<String, Value>,
}

fn number(payload: &Map<String, Value>, key: &str) -> f64 {
    payload.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn count(payload: &Map<String, Value>, key: &str) -> u64 {
    payload
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
        .unwrap_or(0)
}

fn text(payload: &Map<String, Value>, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl TelemetrySnapshot {
    #[must_use]
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let metadata = payload
            .iter()
            .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Self {
            request_id: text(payload, "request_id"),
            duration_ms: number(payload, "duration_ms"),
            region_count: count(payload, "region_count"),
            coverage_percent: number(payload, "coverage_percent"),
            hull_region_count: count(payload, "hull_region_count"),
            hull_volume_total: number(payload, "hull_volume_total"),
            topology_backend: text(payload, "topology_backend"),
            avg_candidate_score: number(payload, "avg_candidate_score"),
            schema_version: text(payload, "schema_version")
                .unwrap_or_else(|| SCHEMA_VERSION.to_string()),
            timestamp: payload
                .get("timestamp")
                .and_then(Value::as_f64)
                .unwrap_or_else(unix_timestamp),
            alerts: Vec::new(),
            metadata,
        }
    }

    fn evaluate(&mut self, thresholds: &TelemetryThresholds) {
        if self.coverage_percent < thresholds.coverage_percent_min {
            self.alerts.push(format!(
                "coverage {:.1}% < {:.1}% threshold",
                self.coverage_percent, thresholds.coverage_percent_min
            ));
        }
        if (self.hull_region_count as f64) < thresholds.hull_region_min {
            self.alerts.push(format!(
                "hull regions {} < {} minimum",
                self.hull_region_count, thresholds.hull_region_min as u64
            ));
        }
        if self.avg_candidate_score < thresholds.avg_candidate_score_min {
            self.alerts.push(format!(
                "avg candidate score {:.2} < {:.2}",
                self.avg_candidate_score, thresholds.avg_candidate_score_min
            ));
        }
    }
}

/// Rolling averages over recorded snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryAverages {
    pub coverage_percent: f64,
    pub avg_candidate_score: f64,
    pub hull_region_count: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySummary {
    pub runs: usize,
    /// Snapshots with at least one alert.
    pub breaches: usize,
    pub averages: Option<TelemetryAverages>,
    /// Snapshot with the lowest coverage.
    pub worst_case: Option<TelemetrySnapshot>,
}

// =============================================================================
// BRIDGE
// =============================================================================

/// Converts detection payloads into snapshots and optionally forwards them.
#[derive(Debug, Default)]
pub struct DetectionTelemetryBridge {
    thresholds: TelemetryThresholds,
    snapshots: Mutex<VecDeque<TelemetrySnapshot>>,
    queue: Option<Arc<TelemetryQueue>>,
}

impl DetectionTelemetryBridge {
    #[must_use]
    pub fn new(thresholds: TelemetryThresholds) -> Self {
        Self {
            thresholds,
            snapshots: Mutex::new(VecDeque::new()),
            queue: None,
        }
    }

    /// Forward every snapshot into `queue`.
    #[must_use]
    pub fn with_queue(mut self, queue: Arc<TelemetryQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    #[must_use]
    pub fn queue(&self) -> Option<&Arc<TelemetryQueue>> {
        self.queue.as_ref()
    }

    /// Record one payload. Never blocks on the sink.
    pub fn emit(&self, payload: &Map<String, Value>) -> TelemetrySnapshot {
        let mut snapshot = TelemetrySnapshot::from_payload(payload);
        snapshot.evaluate(&self.thresholds);
        if !snapshot.alerts.is_empty() {
            warn!(
                request_id = ?snapshot.request_id,
                alerts = %snapshot.alerts.join("; "),
                "detection telemetry below threshold"
            );
        }
        {
            let mut history = self.snapshots.lock();
            if history.len() >= SNAPSHOT_HISTORY {
                history.pop_front();
            }
            history.push_back(snapshot.clone());
        }
        if let Some(queue) = &self.queue {
            queue.enqueue(snapshot.clone());
        }
        snapshot
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<TelemetrySnapshot> {
        self.snapshots.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn summary(&self) -> TelemetrySummary {
        let history = self.snapshots.lock();
        if history.is_empty() {
            return TelemetrySummary::default();
        }
        let runs = history.len();
        let n = runs as f64;
        let averages = TelemetryAverages {
            coverage_percent: history.iter().map(|s| s.coverage_percent).sum::<f64>() / n,
            avg_candidate_score: history.iter().map(|s| s.avg_candidate_score).sum::<f64>() / n,
            hull_region_count: history.iter().map(|s| s.hull_region_count as f64).sum::<f64>() / n,
        };
        let worst_case = history
            .iter()
            .min_by(|a, b| a.coverage_percent.total_cmp(&b.coverage_percent))
            .cloned();
        TelemetrySummary {
            runs,
            breaches: history.iter().filter(|s| !s.alerts.is_empty()).count(),
            averages: Some(averages),
            worst_case,
        }
    }

    /// Wait until every forwarded snapshot has been handed to the sink.
    pub fn flush(&self) {
        if let Some(queue) = &self.queue {
            queue.join();
        }
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Receives snapshots on the queue's consumer thread. May be slow.
pub trait TelemetrySink: Send + Sync {
    fn name(&self) -> &str;

    fn send(&self, snapshot: &TelemetrySnapshot) -> MonitorResult<()>;
}

/// Logs each snapshot as one `info!` line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn send(&self, snapshot: &TelemetrySnapshot) -> MonitorResult<()> {
        info!(
            request_id = ?snapshot.request_id,
            coverage_percent = snapshot.coverage_percent,
            hull_regions = snapshot.hull_region_count,
            avg_candidate_score = snapshot.avg_candidate_score,
            alerts = snapshot.alerts.len(),
            "detection telemetry"
        );
        Ok(())
    }
}

/// Counters exposed by the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<TelemetrySnapshot>,
    in_flight: bool,
    shutdown: bool,
    delivered: u64,
    failed: u64,
    dropped: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    available: Condvar,
    idle: Condvar,
    capacity: usize,
}

/// Bounded drop-oldest queue with one consumer thread.
pub struct TelemetryQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TelemetryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryQueue")
            .field("capacity", &self.shared.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

impl TelemetryQueue {
    /// Start the consumer thread.
    pub fn spawn(capacity: usize, sink: Arc<dyn TelemetrySink>) -> MonitorResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            idle: Condvar::new(),
            capacity: capacity.max(1),
        });
        let consumer = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("polytier-telemetry".into())
            .spawn(move || consume(&consumer, sink.as_ref()))
            .map_err(MonitorError::Io)?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue a snapshot. Returns `false` once the queue is shut down.
    pub fn enqueue(&self, snapshot: TelemetrySnapshot) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return false;
        }
        if state.items.len() >= self.shared.capacity {
            state.items.pop_front();
            state.dropped += 1;
            debug!(capacity = self.shared.capacity, "telemetry queue full, dropped oldest");
        }
        state.items.push_back(snapshot);
        drop(state);
        self.shared.available.notify_one();
        true
    }

    /// Block until the queue is empty and the consumer is idle.
    pub fn join(&self) {
        let mut state = self.shared.state.lock();
        while !state.items.is_empty() || state.in_flight {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Like [`join`](Self::join) with a deadline. Returns whether the queue
    /// drained in time.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.items.is_empty() || state.in_flight {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.items.is_empty() && !state.in_flight;
            }
        }
        true
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock();
        QueueStats {
            pending: state.items.len(),
            delivered: state.delivered,
            failed: state.failed,
            dropped: state.dropped,
        }
    }

    /// Drain remaining snapshots, then stop the consumer thread.
    pub fn shutdown(&self) {
        self.shared.state.lock().shutdown = true;
        self.shared.available.notify_all();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("telemetry consumer thread panicked");
            }
        }
    }
}

impl Drop for TelemetryQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn consume(shared: &Shared, sink: &dyn TelemetrySink) {
    loop {
        let snapshot = {
            let mut state = shared.state.lock();
            while state.items.is_empty() && !state.shutdown {
                shared.available.wait(&mut state);
            }
            match state.items.pop_front() {
                Some(snapshot) => {
                    state.in_flight = true;
                    snapshot
                }
                None => break,
            }
        };

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| sink.send(&snapshot)));

        let mut state = shared.state.lock();
        state.in_flight = false;
        match outcome {
            Ok(Ok(())) => state.delivered += 1,
            Ok(Err(err)) => {
                state.failed += 1;
                warn!(sink = sink.name(), error = %err, "telemetry delivery failed");
            }
            Err(_) => {
                state.failed += 1;
                warn!(sink = sink.name(), "telemetry sink panicked");
            }
        }
        if state.items.is_empty() {
            shared.idle.notify_all();
        }
    }
    shared.idle.notify_all();
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct CollectingSink {
        seen: Mutex<Vec<Option<String>>>,
        delay: Duration,
    }

    impl TelemetrySink for CollectingSink {
        fn name(&self) -> &str {
            "collecting"
        }

        fn send(&self, snapshot: &TelemetrySnapshot) -> MonitorResult<()> {
            thread::sleep(self.delay);
            self.seen.lock().push(snapshot.request_id.clone());
            Ok(())
        }
    }

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn snapshot_parses_known_and_passthrough_fields() {
        let snapshot = TelemetrySnapshot::from_payload(&payload(json!({
            "request_id": "req-1",
            "duration_ms": 12.5,
            "region_count": 4,
            "coverage_percent": 55.0,
            "topology": {"faces": 6},
        })));
        assert_eq!(snapshot.request_id.as_deref(), Some("req-1"));
        assert_eq!(snapshot.region_count, 4);
        assert_eq!(snapshot.schema_version, SCHEMA_VERSION);
        assert_eq!(snapshot.metadata.get("topology"), Some(&json!({"faces": 6})));
        assert!(!snapshot.metadata.contains_key("request_id"));
    }

    #[test]
    fn thresholds_raise_alerts() {
        let bridge = DetectionTelemetryBridge::new(TelemetryThresholds::default());
        let low = bridge.emit(&payload(json!({"coverage_percent": 10.0})));
        assert_eq!(low.alerts.len(), 3);
        let healthy = bridge.emit(&payload(json!({
            "coverage_percent": 80.0,
            "hull_region_count": 2,
            "avg_candidate_score": 2.0,
        })));
        assert!(healthy.alerts.is_empty());

        let summary = bridge.summary();
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.breaches, 1);
        assert_eq!(
            summary.worst_case.map(|s| s.coverage_percent),
            Some(10.0)
        );
        let averages = summary.averages.expect("averages");
        assert!((averages.coverage_percent - 45.0).abs() < 1e-9);
    }

    #[test]
    fn empty_summary() {
        let bridge = DetectionTelemetryBridge::default();
        assert_eq!(bridge.summary(), TelemetrySummary::default());
    }

    #[test]
    fn queue_delivers_in_order_and_joins() {
        let sink = Arc::new(CollectingSink::default());
        let queue = TelemetryQueue::spawn(8, sink.clone()).expect("spawn");
        for i in 0..5 {
            let snapshot = TelemetrySnapshot::from_payload(&payload(json!({"request_id": format!("r{i}")})));
            assert!(queue.enqueue(snapshot));
        }
        queue.join();
        let seen = sink.seen.lock().clone();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0].as_deref(), Some("r0"));
        assert_eq!(queue.stats().delivered, 5);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let sink = Arc::new(CollectingSink {
            delay: Duration::from_millis(50),
            ..CollectingSink::default()
        });
        let queue = TelemetryQueue::spawn(2, sink.clone()).expect("spawn");
        for i in 0..6 {
            let snapshot = TelemetrySnapshot::from_payload(&payload(json!({"request_id": format!("r{i}")})));
            queue.enqueue(snapshot);
        }
        queue.join();
        let stats = queue.stats();
        assert!(stats.dropped >= 1);
        assert_eq!(stats.delivered + stats.dropped, 6);
        assert_eq!(sink.seen.lock().last().cloned().flatten().as_deref(), Some("r5"));
    }

    #[test]
    fn shutdown_drains_then_rejects() {
        let sink = Arc::new(CollectingSink {
            delay: Duration::from_millis(5),
            ..CollectingSink::default()
        });
        let queue = TelemetryQueue::spawn(16, sink.clone()).expect("spawn");
        for i in 0..4 {
            let snapshot = TelemetrySnapshot::from_payload(&payload(json!({"request_id": format!("r{i}")})));
            queue.enqueue(snapshot);
        }
        queue.shutdown();
        assert_eq!(sink.seen.lock().len(), 4);
        assert!(!queue.enqueue(TelemetrySnapshot::from_payload(&Map::new())));
    }
}
