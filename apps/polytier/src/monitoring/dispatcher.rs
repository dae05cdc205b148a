//! # Dispatcher
//!
//! Routes context-brief entries: the checkpoint record (bare line or
//! `checkpoint_record` envelope field) goes to the refresh worker, and a
//! `detection_telemetry` object goes to the telemetry bridge. An entry that
//! does not decode as a checkpoint record is reported to the error handler
//! and skipped; the rest of the batch still runs.

use super::refresh::{LibraryRefreshWorker, MonitoringResult};
use super::tailer::{ContextBriefEntry, ContextBriefTailer};
use super::telemetry::{DetectionTelemetryBridge, TelemetrySnapshot};
use crate::error::{MonitorError, MonitorResult};
use polytier_core::CheckpointRecord;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Called with each entry that could not be dispatched.
pub type DispatchErrorHandler = dyn Fn(&ContextBriefEntry, &MonitorError) + Send + Sync;

/// Aggregate of one dispatch pass.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    pub processed: usize,
    pub refresh_results: Vec<MonitoringResult>,
    pub telemetry_snapshots: Vec<TelemetrySnapshot>,
    pub errors: usize,
}

/// Process a batch that was already read from the log.
pub fn dispatch_entries(
    entries: &[ContextBriefEntry],
    worker: &mut LibraryRefreshWorker,
    bridge: Option<&DetectionTelemetryBridge>,
    error_handler: Option<&DispatchErrorHandler>,
) -> DispatchResult {
    let mut result = DispatchResult {
        processed: entries.len(),
        ..DispatchResult::default()
    };

    for entry in entries {
        if let (Some(bridge), Some(telemetry)) = (bridge, entry.detection_telemetry()) {
            result.telemetry_snapshots.push(bridge.emit(telemetry));
        }

        match serde_json::from_value::<CheckpointRecord>(entry.checkpoint_payload()) {
            Ok(record) => result.refresh_results.extend(worker.process_record(&record)),
            Err(err) => {
                result.errors += 1;
                let err = MonitorError::Json(err);
                warn!(error = %err, "context brief entry is not a checkpoint record");
                if let Some(handler) = error_handler {
                    handler(entry, &err);
                }
            }
        }
    }
    result
}

/// Read new entries from `tailer` and dispatch them.
pub fn dispatch_once(
    tailer: &mut ContextBriefTailer,
    worker: &mut LibraryRefreshWorker,
    bridge: Option<&DetectionTelemetryBridge>,
    error_handler: Option<&DispatchErrorHandler>,
) -> MonitorResult<DispatchResult> {
    let entries = tailer.read_new_entries()?;
    Ok(dispatch_entries(&entries, worker, bridge, error_handler))
}

// =============================================================================
// LOOP
// =============================================================================

/// Loop telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    pub iterations: u64,
    pub entries: u64,
    pub errors: u64,
    pub last_dispatch: Duration,
    pub total_dispatch: Duration,
}

impl DispatchCounters {
    pub fn record(&mut self, result: &DispatchResult, elapsed: Duration) {
        self.iterations += 1;
        self.entries += result.processed as u64;
        self.errors += result.errors as u64;
        self.last_dispatch = elapsed;
        self.total_dispatch += elapsed;
    }
}

/// Loop bounds.
#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    /// Stop after this many iterations; `None` runs until `enabled` is false.
    pub max_iterations: Option<u64>,
    pub poll_interval: Duration,
}

/// Results of a finished loop.
#[derive(Debug, Clone, Default)]
pub struct LoopReport {
    pub results: Vec<DispatchResult>,
    pub counters: DispatchCounters,
}

/// Dispatch repeatedly while `enabled` holds. `sleep` runs between
/// iterations (never after the last).
pub fn run_dispatch_loop<E, S>(
    tailer: &mut ContextBriefTailer,
    worker: &mut LibraryRefreshWorker,
    bridge: Option<&DetectionTelemetryBridge>,
    options: LoopOptions,
    enabled: E,
    mut sleep: S,
) -> MonitorResult<LoopReport>
where
    E: Fn() -> bool,
    S: FnMut(Duration),
{
    let mut report = LoopReport::default();
    while enabled() {
        let started = Instant::now();
        let result = dispatch_once(tailer, worker, bridge, None)?;
        report.counters.record(&result, started.elapsed());
        debug!(
            iteration = report.counters.iterations,
            entries = result.processed,
            "dispatch pass"
        );
        report.results.push(result);

        if options
            .max_iterations
            .is_some_and(|max| report.counters.iterations >= max)
        {
            break;
        }
        if !options.poll_interval.is_zero() {
            sleep(options.poll_interval);
        }
    }
    Ok(report)
}

// =============================================================================
// TESTS
// =============================================================================
