//! Integration tests for registry monitoring: drift detection through the
//! checkpoint log, alert fan-out, watcher shutdown and reconciliation.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use parking_lot::Mutex;
use polytier::error::{MonitorError, MonitorResult};
use polytier::monitoring::{
    AlertFanout, AlertRecord, AlertSink, ContextBriefTailer, DetectionTelemetryBridge,
    LibraryRefreshWorker, ListAlertSink, REGISTRY_MISMATCH, RegistryReconciliationHarness,
    Severity, TelemetryQueue, TelemetrySink, TelemetrySnapshot, WatchBackend, WatchOptions,
    dispatch_once, watch_context_brief,
};
use polytier_core::{
    CheckpointConfig, CheckpointEngine, CheckpointRecord, Namespace, SharedRegistry,
};
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Create a temporary directory for tests.
fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn seeded_registry() -> SharedRegistry {
    let registry = SharedRegistry::default();
    registry
        .write()
        .seed_ranked(
            Namespace::Assemblies,
            ["hexagon-ring", "triangle-fan"]
                .into_iter()
                .map(|id| (id.to_string(), json!({}))),
        )
        .unwrap();
    registry
}

/// Flush one small workspace through a real engine so the record lands in
/// the context brief exactly as production writes it.
fn write_checkpoint(dir: &Path, registry: &SharedRegistry) -> CheckpointRecord {
    let config = CheckpointConfig {
        chunk_dir: dir.join("chunks"),
        chunk_size: 8,
        context_brief_path: Some(dir.join("brief.jsonl")),
        ..CheckpointConfig::default()
    };
    let mut engine = CheckpointEngine::new(config, registry.clone());
    engine.add_polygon(6, 0, 0, [0, 0, 0]).unwrap();
    engine.add_polygon(6, 1, 1, [1, 0, 0]).unwrap();
    engine.tick(true).unwrap().record.unwrap()
}

fn append_line(path: &Path, line: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    writeln!(file, "{line}").unwrap();
}

struct BrokenSink;

impl AlertSink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    fn emit(&self, _alert: &AlertRecord) -> MonitorResult<()> {
        Err(MonitorError::Sink {
            sink: "broken".into(),
            reason: "endpoint unreachable".into(),
        })
    }
}

#[derive(Default)]
struct CollectingTelemetrySink {
    received: Mutex<Vec<TelemetrySnapshot>>,
}

impl TelemetrySink for CollectingTelemetrySink {
    fn name(&self) -> &str {
        "collecting"
    }

    fn send(&self, snapshot: &TelemetrySnapshot) -> MonitorResult<()> {
        std::thread::sleep(Duration::from_millis(20));
        self.received.lock().push(snapshot.clone());
        Ok(())
    }
}

// =============================================================================
// DRIFT DETECTION
// =============================================================================

#[test]
fn test_drift_alerts_every_channel_once() {
    let temp = create_temp_dir();
    let registry = seeded_registry();
    let log_path: PathBuf = temp.path().join("brief.jsonl");
    let record = write_checkpoint(temp.path(), &registry);

    let primary = Arc::new(ListAlertSink::new());
    let secondary = Arc::new(ListAlertSink::new());
    let fanout = AlertFanout::new()
        .with_sink(primary.clone())
        .with_sink(Arc::new(BrokenSink))
        .with_sink(secondary.clone());
    let channel_codes: Arc<Mutex<Vec<String>>> = Arc::default();
    let codes = Arc::clone(&channel_codes);
    let refreshed: Arc<Mutex<Vec<String>>> = Arc::default();
    let refreshes = Arc::clone(&refreshed);

    let mut worker = LibraryRefreshWorker::builder(&log_path)
        .registry(registry.clone())
        .on_refresh(move |record| refreshes.lock().push(record.label.clone()))
        .on_alert(fanout.into_callback())
        .on_alert(move |code, _| codes.lock().push(code.to_string()))
        .build()
        .unwrap();

    let first = worker.process_new_records().unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].registry_match);
    assert!(primary.is_empty());

    registry
        .write()
        .allocate(Namespace::Assemblies, "square-strip", json!({}), 400)
        .unwrap();

    // Same record, live registry has moved on.
    let drift = worker.process_record(&record).unwrap();
    assert!(!drift.registry_match);
    assert!(drift.refreshed);
    assert_eq!(*refreshed.lock(), vec![record.label.clone()]);
    assert_eq!(*channel_codes.lock(), vec![REGISTRY_MISMATCH.to_string()]);
    assert_eq!(primary.len(), 1);
    assert_eq!(secondary.len(), 1);
    assert_eq!(primary.alerts()[0].severity, Severity::Error);

    // No new lines: nothing to read.
    assert!(worker.process_new_records().unwrap().is_empty());

    // Replaying the unchanged log does not fire again.
    let mut replay = ContextBriefTailer::new(&log_path);
    for entry in replay.read_new_entries().unwrap() {
        let record: CheckpointRecord = serde_json::from_value(entry.checkpoint_payload()).unwrap();
        let result = worker.process_record(&record).unwrap();
        assert!(!result.registry_match);
        assert!(!result.refreshed);
    }
    assert_eq!(refreshed.lock().len(), 1);
    assert_eq!(channel_codes.lock().len(), 1);
    assert_eq!(primary.len(), 1);
}

#[test]
fn test_malformed_lines_do_not_stop_tailing() {
    let temp = create_temp_dir();
    let registry = seeded_registry();
    let log_path = temp.path().join("brief.jsonl");
    append_line(&log_path, "{\"label\": truncated");
    let record = write_checkpoint(temp.path(), &registry);

    let mut worker = LibraryRefreshWorker::builder(&log_path)
        .registry(registry)
        .build()
        .unwrap();
    let results = worker.process_new_records().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record.label, record.label);
    assert_eq!(worker.tailer().skipped_lines(), 1);
}

// =============================================================================
// DISPATCH AND WATCHER
// =============================================================================

#[test]
fn test_combined_entries_route_to_worker_and_bridge() {
    let temp = create_temp_dir();
    let registry = seeded_registry();
    let log_path = temp.path().join("brief.jsonl");
    let digest = registry.digest();
    for i in 0..3 {
        append_line(
            &log_path,
            &json!({
                "checkpoint_record": {
                    "label": format!("checkpoint-{i:06}"),
                    "path": "cp.ptck",
                    "polygons": 2,
                    "chunk_count": 1,
                    "module_refs": 0,
                    "registry_digest": digest,
                    "timestamp": 1.0,
                },
                "detection_telemetry": {
                    "request_id": format!("req-{i}"),
                    "duration_ms": 12.5,
                    "region_count": 4,
                    "coverage_percent": 20.0,
                    "hull_region_count": 2,
                    "avg_candidate_score": 2.0,
                    "camera": "north",
                },
            })
            .to_string(),
        );
    }

    let mut tailer = ContextBriefTailer::new(&log_path);
    let mut worker = LibraryRefreshWorker::builder(&log_path)
        .registry(registry)
        .build()
        .unwrap();
    let bridge = DetectionTelemetryBridge::default();
    let result = dispatch_once(&mut tailer, &mut worker, Some(&bridge), None).unwrap();

    assert_eq!(result.processed, 3);
    assert!(result.refresh_results.iter().all(|r| r.registry_match));
    assert_eq!(result.telemetry_snapshots.len(), 3);
    let snapshot = &result.telemetry_snapshots[0];
    assert_eq!(snapshot.schema_version, "0.1");
    assert_eq!(snapshot.metadata.get("camera"), Some(&json!("north")));
    assert_eq!(snapshot.alerts.len(), 1);

    let summary = bridge.summary();
    assert_eq!(summary.runs, 3);
    assert_eq!(summary.breaches, 3);
}

#[test]
fn test_watcher_stop_drains_forwarded_telemetry() {
    let temp = create_temp_dir();
    let registry = seeded_registry();
    let log_path = temp.path().join("brief.jsonl");
    std::fs::write(&log_path, "").unwrap();

    let sink = Arc::new(CollectingTelemetrySink::default());
    let queue = TelemetryQueue::spawn(16, sink.clone()).unwrap();
    let bridge = Arc::new(DetectionTelemetryBridge::default().with_queue(Arc::new(queue)));
    let worker = LibraryRefreshWorker::builder(&log_path)
        .registry(registry.clone())
        .build()
        .unwrap();

    let mut handle = watch_context_brief(
        ContextBriefTailer::new(&log_path),
        Arc::new(Mutex::new(worker)),
        Some(Arc::clone(&bridge)),
        WatchOptions {
            backends: vec![WatchBackend::Polling],
            poll_interval: Duration::from_millis(25),
        },
    )
    .unwrap();

    let digest = registry.digest();
    for i in 0..4 {
        append_line(
            &log_path,
            &json!({
                "checkpoint_record": {
                    "label": format!("checkpoint-{i:06}"),
                    "path": "cp.ptck",
                    "polygons": 1,
                    "chunk_count": 1,
                    "module_refs": 0,
                    "registry_digest": digest,
                    "timestamp": 1.0,
                },
                "detection_telemetry": {"request_id": format!("req-{i}"), "coverage_percent": 80.0},
            })
            .to_string(),
        );
    }

    let counters = handle.stop();
    assert_eq!(counters.entries, 4);
    assert_eq!(sink.received.lock().len(), 4);
    assert_eq!(bridge.queue().unwrap().stats().pending, 0);
}

// =============================================================================
// RECONCILIATION
// =============================================================================

#[test]
fn test_reconcile_converges_to_baseline() {
    let registry = seeded_registry();
    let alerts = Arc::new(ListAlertSink::new());
    let harness =
        RegistryReconciliationHarness::new(registry.clone()).with_sink(alerts.clone());
    let baseline = harness.capture_snapshot("baseline");

    {
        let mut live = registry.write();
        live.remove(Namespace::Assemblies, "triangle-fan");
        live.allocate(Namespace::Clusters, "rogue", json!({}), 300)
            .unwrap();
        live.allocate(Namespace::Megas, "stray", json!({}), 2000)
            .unwrap();
    }

    let (ok, diff) = harness.verify_parity(&baseline);
    assert!(!ok);
    assert_eq!(diff.missing.len(), 1);
    assert_eq!(diff.unexpected.len(), 2);
    assert!(!alerts.is_empty());

    let residual = harness.reconcile(&baseline).unwrap();
    assert!(residual.is_empty());
    let (ok, diff) = harness.verify_parity(&baseline);
    assert!(ok);
    assert!(diff.is_empty());
    assert_eq!(registry.digest(), baseline.digest);
}

#[test]
fn test_reconcile_repairs_drift_seen_by_refresh_worker() {
    let temp = create_temp_dir();
    let registry = seeded_registry();
    let harness = RegistryReconciliationHarness::new(registry.clone());
    let baseline = harness.capture_snapshot("baseline");
    let record = write_checkpoint(temp.path(), &registry);

    let mut worker = LibraryRefreshWorker::builder(temp.path().join("brief.jsonl"))
        .registry(registry.clone())
        .build()
        .unwrap();

    registry.write().remove(Namespace::Assemblies, "hexagon-ring");
    assert!(!worker.process_record(&record).unwrap().registry_match);

    harness.reconcile(&baseline).unwrap();
    assert!(worker.process_record(&record).unwrap().registry_match);
}
