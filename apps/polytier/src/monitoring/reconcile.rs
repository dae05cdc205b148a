//! # Registry Reconciliation
//!
//! Compares the live registry against a baseline snapshot, raises alerts for
//! any difference, and repairs drift by restoring the baseline state.

use super::alerts::{AlertFanout, AlertSink, render_diff_alerts};
use crate::error::MonitorResult;
use polytier_core::{RegistryDiff, RegistrySnapshot, SharedRegistry};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const LIVE_LABEL: &str = "live";

/// Parity checks and drift repair for one live registry.
#[derive(Debug, Clone)]
pub struct RegistryReconciliationHarness {
    registry: SharedRegistry,
    fanout: AlertFanout,
}

impl RegistryReconciliationHarness {
    #[must_use]
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            fanout: AlertFanout::new(),
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.fanout.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn AlertSink>) {
        self.fanout.push(sink);
    }

    #[must_use]
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    #[must_use]
    pub fn capture_snapshot(&self, label: &str) -> RegistrySnapshot {
        RegistrySnapshot::capture(label, &self.registry)
    }

    #[must_use]
    pub fn diff(baseline: &RegistrySnapshot, candidate: &RegistrySnapshot) -> RegistryDiff {
        baseline.diff(candidate)
    }

    /// Compare `baseline` with the live registry. Differences are sent to
    /// every sink.
    pub fn verify_parity(&self, baseline: &RegistrySnapshot) -> (bool, RegistryDiff) {
        let live = self.capture_snapshot(LIVE_LABEL);
        let diff = baseline.diff(&live);
        if diff.is_empty() {
            return (true, diff);
        }
        warn!(
            baseline = %baseline.label,
            differences = diff.len(),
            "registry parity check failed"
        );
        let report = self.fanout.emit_all(&render_diff_alerts(&diff));
        if !report.failed.is_empty() {
            warn!(failed = report.failed.len(), "some parity alerts were not delivered");
        }
        (false, diff)
    }

    /// Restore the baseline state and return the residual difference, which
    /// is empty on success.
    pub fn reconcile(&self, baseline: &RegistrySnapshot) -> MonitorResult<RegistryDiff> {
        let before = baseline.diff(&self.capture_snapshot(LIVE_LABEL));
        if before.is_empty() {
            return Ok(before);
        }
        {
            let mut registry = self.registry.write();
            registry.load_state(&baseline.state)?;
            registry.invalidate();
        }
        info!(
            baseline = %baseline.label,
            removed = before.unexpected.len(),
            restored = before.missing.len(),
            rebound = before.mismatched.len(),
            "registry reconciled to baseline"
        );

        let residual = baseline.diff(&self.capture_snapshot(LIVE_LABEL));
        if !residual.is_empty() {
            warn!(differences = residual.len(), "registry still differs after reconcile");
        }
        Ok(residual)
    }

    /// Capture and persist a snapshot of the live registry.
    pub fn save_snapshot(&self, label: &str, path: &Path) -> MonitorResult<RegistrySnapshot> {
        let snapshot = self.capture_snapshot(label);
        snapshot.save(path)?;
        Ok(snapshot)
    }

    pub fn load_snapshot(path: &Path) -> MonitorResult<RegistrySnapshot> {
        Ok(RegistrySnapshot::load(path)?)
    }
}

// =============================================================================
// TESTS
// =============================================================================
