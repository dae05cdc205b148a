//! Latency checks for the dispatch path.
//!
//! Telemetry sinks run on the queue's consumer thread, so a slow sink must
//! not show up in the producer's timing.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use parking_lot::Mutex;
use polytier::error::MonitorResult;
use polytier::monitoring::{
    AlertFanout, ContextBriefEntry, DetectionTelemetryBridge, LibraryRefreshWorker,
    ListAlertSink, TelemetryQueue, TelemetrySink, TelemetrySnapshot, dispatch_entries,
};
use polytier_core::{Namespace, SharedRegistry};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

struct SlowSink {
    delay: Duration,
    received: Mutex<usize>,
}

impl SlowSink {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            received: Mutex::new(0),
        }
    }
}

impl TelemetrySink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    fn send(&self, _snapshot: &TelemetrySnapshot) -> MonitorResult<()> {
        std::thread::sleep(self.delay);
        *self.received.lock() += 1;
        Ok(())
    }
}

fn registry() -> SharedRegistry {
    let registry = SharedRegistry::default();
    registry
        .write()
        .seed_ranked(
            Namespace::Assemblies,
            (0..200).map(|i| (format!("assembly-{i}"), json!({"rank": i}))),
        )
        .unwrap();
    registry
}

fn combined_entry(index: usize, digest: &str) -> ContextBriefEntry {
    let value = json!({
        "checkpoint_record": {
            "label": format!("checkpoint-{index:06}"),
            "path": format!("checkpoints/checkpoint-{index:06}.ptck"),
            "polygons": 128,
            "chunk_count": 1,
            "module_refs": 3,
            "registry_digest": digest,
            "timestamp": 1_700_000_000.0 + index as f64,
        },
        "detection_telemetry": {
            "request_id": format!("req-{index}"),
            "duration_ms": 41.0,
            "region_count": 12,
            "coverage_percent": 73.5,
            "hull_region_count": 5,
            "hull_volume_total": 912.4,
            "topology_backend": "scipy",
            "avg_candidate_score": 2.4,
            "schema_version": "0.1",
        },
    });
    match value {
        Value::Object(map) => ContextBriefEntry::new(map),
        _ => ContextBriefEntry::new(Map::new()),
    }
}

// =============================================================================
// LATENCY TESTS
// =============================================================================

#[test]
fn test_ten_combined_entries_dispatch_under_budget() {
    let registry = registry();
    let alerts = Arc::new(ListAlertSink::new());
    let mut worker = LibraryRefreshWorker::builder("unused.jsonl")
        .registry(registry.clone())
        .on_alert(AlertFanout::new().with_sink(alerts.clone()).into_callback())
        .build()
        .unwrap();
    let sink = Arc::new(SlowSink::new(Duration::from_millis(200)));
    let queue = TelemetryQueue::spawn(64, sink.clone()).unwrap();
    let bridge = DetectionTelemetryBridge::default().with_queue(Arc::new(queue));

    // Half the entries carry a stale digest so the alert path is timed too.
    let digest = registry.digest();
    let entries: Vec<ContextBriefEntry> = (0..10)
        .map(|i| combined_entry(i, if i % 2 == 0 { digest.as_str() } else { "stale" }))
        .collect();

    let started = Instant::now();
    let result = dispatch_entries(&entries, &mut worker, Some(&bridge), None);
    let elapsed = started.elapsed();

    assert_eq!(result.processed, 10);
    assert_eq!(result.refresh_results.len(), 10);
    assert_eq!(result.telemetry_snapshots.len(), 10);
    assert_eq!(alerts.len(), 5);
    assert!(
        elapsed < Duration::from_millis(100),
        "dispatch took {elapsed:?}"
    );

    let queue = bridge.queue().unwrap();
    assert!(queue.join_timeout(Duration::from_secs(10)));
    assert_eq!(*sink.received.lock(), 10);
}

#[test]
fn test_single_request_is_not_slowed_by_sink() {
    let sink = Arc::new(SlowSink::new(Duration::from_millis(200)));
    let queue = TelemetryQueue::spawn(8, sink.clone()).unwrap();
    let bridge = DetectionTelemetryBridge::default().with_queue(Arc::new(queue));
    let entry = combined_entry(1, "unused");

    let started = Instant::now();
    let snapshot = bridge.emit(entry.detection_telemetry().unwrap());
    let elapsed = started.elapsed();

    assert_eq!(snapshot.request_id.as_deref(), Some("req-1"));
    assert!(snapshot.alerts.is_empty());
    assert!(
        elapsed < Duration::from_millis(150),
        "synchronous path took {elapsed:?}"
    );

    bridge.flush();
    assert_eq!(*sink.received.lock(), 1);
}
