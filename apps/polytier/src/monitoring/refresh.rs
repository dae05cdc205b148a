//! # Library Refresh Worker
//!
//! Checks each checkpoint record's embedded digest against the digest of the
//! live registry state.
//!
//! On mismatch every refresh callback fires, then every alert callback with
//! code `registry_mismatch`. A matching digest fires nothing. A provider
//! failure fires the alert callbacks with `registry_provider_error:{reason}`
//! and yields no result.
//!
//! The same drift (record, recorded digest, live digest) is only signalled
//! once, so replayed log lines do not trigger callbacks again.
//!
//! A callback that panics is logged and skipped; the remaining callbacks
//! still run.

use super::tailer::ContextBriefTailer;
use crate::error::{MonitorError, MonitorResult};
use polytier_core::registry::state_to_value;
use polytier_core::{CheckpointRecord, SharedRegistry, digest_value};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Alert code for a digest mismatch.
pub const REGISTRY_MISMATCH: &str = "registry_mismatch";

/// Prefix of the alert code raised when the provider fails.
pub const PROVIDER_ERROR_PREFIX: &str = "registry_provider_error";

const HANDLED_HISTORY: usize = 1024;

/// Returns the current registry state as JSON.
pub type RegistryStateProvider = Box<dyn Fn() -> MonitorResult<Value> + Send + Sync>;
pub type RefreshCallback = Box<dyn Fn(&CheckpointRecord) + Send + Sync>;
pub type AlertCallback = Box<dyn Fn(&str, &CheckpointRecord) + Send + Sync>;

/// Outcome of checking one record.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringResult {
    pub record: CheckpointRecord,
    pub registry_match: bool,
    pub refreshed: bool,
    pub current_digest: String,
}

/// Provider over a live registry. Reads one consistent snapshot per call.
#[must_use]
pub fn registry_provider(registry: SharedRegistry) -> RegistryStateProvider {
    Box::new(move || Ok(state_to_value(&registry.snapshot())))
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builds a [`LibraryRefreshWorker`]; a registry provider is required.
pub struct LibraryRefreshWorkerBuilder {
    log_path: PathBuf,
    cursor_path: Option<PathBuf>,
    provider: Option<RegistryStateProvider>,
    on_refresh: Vec<RefreshCallback>,
    on_alert: Vec<AlertCallback>,
}

impl LibraryRefreshWorkerBuilder {
    #[must_use]
    pub fn registry_provider(mut self, provider: RegistryStateProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn registry(self, registry: SharedRegistry) -> Self {
        self.registry_provider(registry_provider(registry))
    }

    #[must_use]
    pub fn cursor_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cursor_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn on_refresh<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CheckpointRecord) + Send + Sync + 'static,
    {
        self.on_refresh.push(Box::new(callback));
        self
    }

    /// Add an alert channel. Every channel receives every alert.
    #[must_use]
    pub fn on_alert<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &CheckpointRecord) + Send + Sync + 'static,
    {
        self.on_alert.push(Box::new(callback));
        self
    }

    pub fn build(self) -> MonitorResult<LibraryRefreshWorker> {
        let provider = self.provider.ok_or_else(|| {
            MonitorError::Config("library refresh worker requires a registry state provider".into())
        })?;
        let mut tailer = ContextBriefTailer::new(self.log_path);
        if let Some(cursor) = self.cursor_path {
            tailer = tailer.with_cursor(cursor)?;
        }
        Ok(LibraryRefreshWorker {
            tailer,
            provider,
            on_refresh: self.on_refresh,
            on_alert: self.on_alert,
            handled: VecDeque::new(),
        })
    }
}

// =============================================================================
// WORKER
// =============================================================================

/// Tails the context brief and checks registry parity.
pub struct LibraryRefreshWorker {
    tailer: ContextBriefTailer,
    provider: RegistryStateProvider,
    on_refresh: Vec<RefreshCallback>,
    on_alert: Vec<AlertCallback>,
    handled: VecDeque<(String, String, String)>,
}

impl fmt::Debug for LibraryRefreshWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryRefreshWorker")
            .field("tailer", &self.tailer)
            .field("on_refresh", &self.on_refresh.len())
            .field("on_alert", &self.on_alert.len())
            .finish()
    }
}

impl LibraryRefreshWorker {
    #[must_use]
    pub fn builder(log_path: impl Into<PathBuf>) -> LibraryRefreshWorkerBuilder {
        LibraryRefreshWorkerBuilder {
            log_path: log_path.into(),
            cursor_path: None,
            provider: None,
            on_refresh: Vec::new(),
            on_alert: Vec::new(),
        }
    }

    #[must_use]
    pub fn tailer(&self) -> &ContextBriefTailer {
        &self.tailer
    }

    /// Check every record appended since the last call.
    pub fn process_new_records(&mut self) -> MonitorResult<Vec<MonitoringResult>> {
        let entries = self.tailer.read_new_entries()?;
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<CheckpointRecord>(entry.checkpoint_payload()) {
                Ok(record) => results.extend(self.process_record(&record)),
                Err(err) => warn!(error = %err, "skipping context brief line without a checkpoint record"),
            }
        }
        Ok(results)
    }

    /// Check one record against the live registry.
    pub fn process_record(&mut self, record: &CheckpointRecord) -> Option<MonitoringResult> {
        let current_digest = match (self.provider)() {
            Ok(state) => digest_value(&state),
            Err(err) => {
                warn!(label = %record.label, error = %err, "registry provider failed");
                let code = format!("{PROVIDER_ERROR_PREFIX}:{err}");
                self.alert(&code, record);
                return None;
            }
        };

        let registry_match = current_digest == record.registry_digest;
        let mut refreshed = false;
        if registry_match {
            debug!(label = %record.label, "registry digest matches");
        } else {
            let key = (
                record.label.clone(),
                record.registry_digest.clone(),
                current_digest.clone(),
            );
            if self.handled.contains(&key) {
                debug!(label = %record.label, "drift already signalled");
            } else {
                info!(
                    label = %record.label,
                    recorded = %record.registry_digest,
                    current = %current_digest,
                    "registry drift detected"
                );
                for (index, callback) in self.on_refresh.iter().enumerate() {
                    if catch_unwind(AssertUnwindSafe(|| callback(record))).is_ok() {
                        refreshed = true;
                    } else {
                        warn!(label = %record.label, callback = index, "refresh callback panicked");
                    }
                }
                self.alert(REGISTRY_MISMATCH, record);
                if self.handled.len() >= HANDLED_HISTORY {
                    self.handled.pop_front();
                }
                self.handled.push_back(key);
            }
        }

        Some(MonitoringResult {
            record: record.clone(),
            registry_match,
            refreshed,
            current_digest,
        })
    }

    fn alert(&self, code: &str, record: &CheckpointRecord) {
        for (index, callback) in self.on_alert.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| callback(code, record))).is_err() {
                warn!(label = %record.label, code, callback = index, "alert callback panicked");
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use polytier_core::Namespace;
    use serde_json::json;
    use std::sync::Arc;

    fn record(digest: &str) -> CheckpointRecord {
        CheckpointRecord {
            label: "checkpoint-000001".into(),
            path: PathBuf::from("cp.ptck"),
            polygons: 3,
            chunk_count: 1,
            module_refs: 0,
            registry_digest: digest.to_string(),
            timestamp: 1.0,
        }
    }

    #[test]
    fn missing_provider_fails_fast() {
        let err = LibraryRefreshWorker::builder("brief.jsonl").build();
        assert!(matches!(err, Err(MonitorError::Config(_))));
    }

    #[test]
    fn match_fires_nothing_and_drift_fires_once() {
        let registry = SharedRegistry::default();
        let refreshes = Arc::new(Mutex::new(0_usize));
        let codes: Arc<Mutex<Vec<String>>> = Arc::default();
        let r = Arc::clone(&refreshes);
        let c = Arc::clone(&codes);
        let mut worker = LibraryRefreshWorker::builder("unused.jsonl")
            .registry(registry.clone())
            .on_refresh(move |_| *r.lock() += 1)
            .on_alert(move |code, _| c.lock().push(code.to_string()))
            .build()
            .expect("build");

        let baseline = registry.digest();
        let result = worker.process_record(&record(&baseline)).expect("result");
        assert!(result.registry_match);
        assert!(!result.refreshed);
        assert!(codes.lock().is_empty());

        registry
            .write()
            .allocate(Namespace::Assemblies, "drifted", json!({}), 300)
            .expect("allocate");
        let drift = worker.process_record(&record(&baseline)).expect("result");
        assert!(!drift.registry_match);
        assert!(drift.refreshed);
        assert_eq!(*refreshes.lock(), 1);
        assert_eq!(*codes.lock(), vec![REGISTRY_MISMATCH.to_string()]);

        let replay = worker.process_record(&record(&baseline)).expect("result");
        assert!(!replay.registry_match);
        assert!(!replay.refreshed);
        assert_eq!(*refreshes.lock(), 1);
        assert_eq!(codes.lock().len(), 1);
    }

    #[test]
    fn provider_errors_raise_alert() {
        let codes: Arc<Mutex<Vec<String>>> = Arc::default();
        let c = Arc::clone(&codes);
        let mut worker = LibraryRefreshWorker::builder("unused.jsonl")
            .registry_provider(Box::new(|| Err(MonitorError::Provider("offline".into()))))
            .on_alert(move |code, _| c.lock().push(code.to_string()))
            .build()
            .expect("build");
        assert!(worker.process_record(&record("00")).is_none());
        let codes = codes.lock();
        assert_eq!(codes.len(), 1);
        assert!(codes[0].starts_with("registry_provider_error:"));
    }

    #[test]
    #[allow(clippy::panic)]
    fn panicking_callbacks_do_not_stop_the_others() {
        let registry = SharedRegistry::default();
        let refreshes = Arc::new(Mutex::new(0_usize));
        let codes: Arc<Mutex<Vec<String>>> = Arc::default();
        let r = Arc::clone(&refreshes);
        let c = Arc::clone(&codes);
        let mut worker = LibraryRefreshWorker::builder("unused.jsonl")
            .registry(registry.clone())
            .on_refresh(|_| panic!("refresh hook failed"))
            .on_refresh(move |_| *r.lock() += 1)
            .on_alert(|_, _| panic!("alert hook failed"))
            .on_alert(move |code, _| c.lock().push(code.to_string()))
            .build()
            .expect("build");

        let drift = worker.process_record(&record("stale")).expect("result");
        assert!(!drift.registry_match);
        assert!(drift.refreshed);
        assert_eq!(*refreshes.lock(), 1);
        assert_eq!(*codes.lock(), vec![REGISTRY_MISMATCH.to_string()]);

        // The worker keeps processing after the panics.
        registry
            .write()
            .allocate(Namespace::Megas, "later", json!({}), 2000)
            .expect("allocate");
        assert!(worker.process_record(&record("stale")).is_some());
        assert_eq!(codes.lock().len(), 2);
    }
}
