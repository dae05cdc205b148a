//! # Alerts
//!
//! Alert records, the sink capability, and fan-out.
//!
//! A fan-out delivers every alert to every sink. Each delivery is isolated:
//! a sink that errors or panics is logged and skipped, and the remaining
//! sinks still receive the alert.

use crate::error::{MonitorError, MonitorResult};
use parking_lot::Mutex;
use polytier_core::{CheckpointRecord, RegistryDiff};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

// =============================================================================
// RECORDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        })
    }
}

/// One alert raised by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub severity: Severity,
    pub message: String,
    pub metadata: BTreeMap<String, Value>,
}

impl AlertRecord {
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Alert for a refresh-worker code such as `registry_mismatch`.
    #[must_use]
    pub fn for_checkpoint(code: &str, record: &CheckpointRecord) -> Self {
        Self::new(Severity::Error, code)
            .with_metadata("label", record.label.as_str())
            .with_metadata("registry_digest", record.registry_digest.as_str())
            .with_metadata("path", record.path.display().to_string())
    }
}

// =============================================================================
// SINKS
// =============================================================================

/// Something that can receive alerts.
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the sink can currently accept alerts.
    fn is_available(&self) -> bool {
        true
    }

    fn emit(&self, alert: &AlertRecord) -> MonitorResult<()>;
}

/// Collects alerts in memory.
#[derive(Debug, Default)]
pub struct ListAlertSink {
    alerts: Mutex<Vec<AlertRecord>>,
}

impl ListAlertSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}

impl AlertSink for ListAlertSink {
    fn name(&self) -> &str {
        "list"
    }

    fn emit(&self, alert: &AlertRecord) -> MonitorResult<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

/// Writes alerts to the tracing subscriber at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn emit(&self, alert: &AlertRecord) -> MonitorResult<()> {
        let metadata = serde_json::to_string(&alert.metadata)?;
        match alert.severity {
            Severity::Info => info!(metadata = %metadata, "{}", alert.message),
            Severity::Warning => warn!(metadata = %metadata, "{}", alert.message),
            Severity::Error => error!(metadata = %metadata, "{}", alert.message),
        }
        Ok(())
    }
}

// =============================================================================
// FAN-OUT
// =============================================================================

/// Outcome of one fan-out delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    /// `(sink name, reason)` for every failed delivery.
    pub failed: Vec<(String, String)>,
}

/// Delivers alerts to every registered sink.
#[derive(Clone, Default)]
pub struct AlertFanout {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl fmt::Debug for AlertFanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("AlertFanout").field("sinks", &names).finish()
    }
}

impl AlertFanout {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// First sink in priority order that reports itself available.
    #[must_use]
    pub fn first_available<I>(candidates: I) -> Option<Arc<dyn AlertSink>>
    where
        I: IntoIterator<Item = Arc<dyn AlertSink>>,
    {
        candidates.into_iter().find(|sink| sink.is_available())
    }

    /// Deliver `alert` to every sink, isolating failures.
    pub fn emit(&self, alert: &AlertRecord) -> FanoutReport {
        let mut report = FanoutReport::default();
        for sink in &self.sinks {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| sink.emit(alert)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(_) => Some("sink panicked".to_string()),
            };
            match failure {
                None => report.delivered += 1,
                Some(reason) => {
                    warn!(sink = sink.name(), reason = %reason, "alert delivery failed");
                    report.failed.push((sink.name().to_string(), reason));
                }
            }
        }
        report
    }

    pub fn emit_all<'a, I>(&self, alerts: I) -> FanoutReport
    where
        I: IntoIterator<Item = &'a AlertRecord>,
    {
        let mut total = FanoutReport::default();
        for alert in alerts {
            let report = self.emit(alert);
            total.delivered += report.delivered;
            total.failed.extend(report.failed);
        }
        total
    }

    /// Adapter for refresh-worker alert callbacks.
    #[must_use]
    pub fn into_callback(self) -> impl Fn(&str, &CheckpointRecord) + Send + Sync + 'static {
        move |code, record| {
            self.emit(&AlertRecord::for_checkpoint(code, record));
        }
    }
}

/// Sink failure as a `MonitorError`, for sink implementations.
#[must_use]
pub fn sink_error(sink: &str, reason: impl Into<String>) -> MonitorError {
    MonitorError::Sink {
        sink: sink.to_string(),
        reason: reason.into(),
    }
}

/// Alerts summarising a registry diff. Missing and unexpected entries are
/// errors; mismatched symbols are warnings.
#[must_use]
pub fn render_diff_alerts(diff: &RegistryDiff) -> Vec<AlertRecord> {
    fn join_keys<V>(entries: &BTreeMap<(String, String), V>) -> String {
        entries
            .keys()
            .map(|(ns, id)| format!("{ns}/{id}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    let mut alerts = Vec::new();
    if !diff.missing.is_empty() {
        alerts.push(
            AlertRecord::new(
                Severity::Error,
                format!(
                    "registry parity failed: baseline symbols missing in '{}'",
                    diff.candidate_label
                ),
            )
            .with_metadata("missing_symbols", join_keys(&diff.missing)),
        );
    }
    if !diff.unexpected.is_empty() {
        alerts.push(
            AlertRecord::new(
                Severity::Error,
                format!(
                    "registry parity failed: unexpected symbols present in '{}'",
                    diff.candidate_label
                ),
            )
            .with_metadata("unexpected_symbols", join_keys(&diff.unexpected)),
        );
    }
    if !diff.mismatched.is_empty() {
        alerts.push(
            AlertRecord::new(
                Severity::Warning,
                format!(
                    "registry parity found mismatched symbols in '{}'",
                    diff.candidate_label
                ),
            )
            .with_metadata("mismatched_symbols", join_keys(&diff.mismatched)),
        );
    }
    alerts
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use polytier_core::RegistrySnapshot;
    use std::path::PathBuf;

    struct FailingSink;

    impl AlertSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn emit(&self, _alert: &AlertRecord) -> MonitorResult<()> {
            Err(sink_error("failing", "offline"))
        }
    }

    struct PanickingSink;

    impl AlertSink for PanickingSink {
        fn name(&self) -> &str {
            "panicking"
        }

        #[allow(clippy::panic)]
        fn emit(&self, _alert: &AlertRecord) -> MonitorResult<()> {
            panic!("sink exploded")
        }
    }

    struct UnavailableSink;

    impl AlertSink for UnavailableSink {
        fn name(&self) -> &str {
            "unavailable"
        }

        fn is_available(&self) -> bool {
            false
        }

        fn emit(&self, _alert: &AlertRecord) -> MonitorResult<()> {
            Ok(())
        }
    }

    #[test]
    fn failing_sinks_do_not_block_others() {
        let first = Arc::new(ListAlertSink::new());
        let last = Arc::new(ListAlertSink::new());
        let fanout = AlertFanout::new()
            .with_sink(first.clone())
            .with_sink(Arc::new(FailingSink))
            .with_sink(Arc::new(PanickingSink))
            .with_sink(last.clone());

        let report = fanout.emit(&AlertRecord::new(Severity::Error, "drift"));
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(first.len(), 1);
        assert_eq!(last.len(), 1);
    }

    #[test]
    fn first_available_skips_unavailable() {
        let list: Arc<dyn AlertSink> = Arc::new(ListAlertSink::new());
        let chosen = AlertFanout::first_available([
            Arc::new(UnavailableSink) as Arc<dyn AlertSink>,
            list,
            Arc::new(TracingAlertSink) as Arc<dyn AlertSink>,
        ]);
        assert_eq!(chosen.map(|s| s.name().to_string()), Some("list".to_string()));
    }

    #[test]
    fn callback_carries_record_metadata() {
        let sink = Arc::new(ListAlertSink::new());
        let callback = AlertFanout::new().with_sink(sink.clone()).into_callback();
        let record = CheckpointRecord {
            label: "checkpoint-000003".into(),
            path: PathBuf::from("cp.ptck"),
            polygons: 1,
            chunk_count: 1,
            module_refs: 0,
            registry_digest: "ab".repeat(32),
            timestamp: 0.0,
        };
        callback("registry_mismatch", &record);
        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "registry_mismatch");
        assert_eq!(
            alerts[0].metadata.get("label"),
            Some(&Value::from("checkpoint-000003"))
        );
    }

    #[test]
    fn diff_alerts_use_severity_per_kind() {
        let base = RegistrySnapshot::from_state(
            "base",
            BTreeMap::from([(
                "assemblies".to_string(),
                BTreeMap::from([
                    ("a".to_string(), "x".to_string()),
                    ("b".to_string(), "y".to_string()),
                ]),
            )]),
        );
        let live = RegistrySnapshot::from_state(
            "live",
            BTreeMap::from([(
                "assemblies".to_string(),
                BTreeMap::from([
                    ("b".to_string(), "z".to_string()),
                    ("c".to_string(), "w".to_string()),
                ]),
            )]),
        );
        let alerts = render_diff_alerts(&base.diff(&live));
        let severities: Vec<Severity> = alerts.iter().map(|a| a.severity).collect();
        assert_eq!(severities, vec![Severity::Error, Severity::Error, Severity::Warning]);
        assert_eq!(
            alerts[0].metadata.get("missing_symbols"),
            Some(&Value::from("assemblies/a"))
        );
        assert!(render_diff_alerts(&base.diff(&base)).is_empty());
    }
}
