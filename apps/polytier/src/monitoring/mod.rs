//! # Monitoring
//!
//! Read-only observation of the checkpoint pipeline.
//!
//! - `tailer`: forward-only reader over the context-brief log
//! - `refresh`: registry digest parity per checkpoint record
//! - `alerts`: alert records, sinks, fan-out
//! - `telemetry`: detection telemetry bridge and the bounded forwarding queue
//! - `dispatcher`: routes log entries to the worker and the bridge
//! - `watcher`: background dispatch driven by filesystem events or polling
//! - `reconcile`: snapshot parity checks and drift repair
//!
//! Nothing here writes to a checkpoint workspace. The only registry mutation
//! is an explicit `reconcile`.

pub mod alerts;
pub mod dispatcher;
pub mod reconcile;
pub mod refresh;
pub mod tailer;
pub mod telemetry;
pub mod watcher;

pub use alerts::{
    AlertFanout, AlertRecord, AlertSink, FanoutReport, ListAlertSink, Severity, TracingAlertSink,
    render_diff_alerts, sink_error,
};
pub use dispatcher::{
    DispatchCounters, DispatchErrorHandler, DispatchResult, LoopOptions, LoopReport,
    dispatch_entries, dispatch_once, run_dispatch_loop,
};
pub use reconcile::RegistryReconciliationHarness;
pub use refresh::{
    LibraryRefreshWorker, LibraryRefreshWorkerBuilder, MonitoringResult, PROVIDER_ERROR_PREFIX,
    REGISTRY_MISMATCH, RegistryStateProvider, registry_provider,
};
pub use tailer::{ContextBriefEntry, ContextBriefTailer};
pub use telemetry::{
    DetectionTelemetryBridge, QueueStats, TelemetryQueue, TelemetrySink, TelemetrySnapshot,
    TelemetrySummary, TelemetryThresholds, TracingTelemetrySink,
};
pub use watcher::{WatchBackend, WatchHandle, WatchOptions, watch_context_brief};
