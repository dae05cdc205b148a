//! # Context-Brief Watcher
//!
//! Runs the dispatcher on a dedicated thread whenever the context brief may
//! have grown.
//!
//! Backends are tried in priority order and the first that starts wins:
//!
//! - `Native`: a `notify` filesystem watcher on the log's directory wakes the
//!   dispatch thread on changes to the log file
//! - `Polling`: the dispatch thread wakes every poll interval
//!
//! The dispatch thread also wakes on the poll interval under `Native`, so a
//! missed event only delays dispatch. `stop` runs one last dispatch, stops
//! the thread, and then waits for forwarded telemetry to drain.

use super::dispatcher::{DispatchCounters, dispatch_once};
use super::refresh::LibraryRefreshWorker;
use super::tailer::ContextBriefTailer;
use super::telemetry::DetectionTelemetryBridge;
use crate::error::{MonitorError, MonitorResult};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, SyncSender, sync_channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchBackend {
    Native,
    Polling,
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Backends in priority order.
    pub backends: Vec<WatchBackend>,
    pub poll_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            backends: vec![WatchBackend::Native, WatchBackend::Polling],
            poll_interval: Duration::from_millis(crate::config::DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Running watcher. Stops on drop.
pub struct WatchHandle {
    backend: WatchBackend,
    stop: Arc<AtomicBool>,
    wake: SyncSender<()>,
    thread: Option<JoinHandle<()>>,
    counters: Arc<Mutex<DispatchCounters>>,
    bridge: Option<Arc<DetectionTelemetryBridge>>,
    native: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("backend", &self.backend)
            .field("running", &self.thread.is_some())
            .field("counters", &*self.counters.lock())
            .finish()
    }
}

impl WatchHandle {
    #[must_use]
    pub fn backend(&self) -> WatchBackend {
        self.backend
    }

    #[must_use]
    pub fn counters(&self) -> DispatchCounters {
        *self.counters.lock()
    }

    /// Dispatch once more, stop the thread, and drain telemetry.
    pub fn stop(&mut self) -> DispatchCounters {
        if let Some(thread) = self.thread.take() {
            self.stop.store(true, Ordering::Release);
            let _ = self.wake.try_send(());
            if thread.join().is_err() {
                warn!("context brief watch thread panicked");
            }
            self.native = None;
            if let Some(bridge) = &self.bridge {
                bridge.flush();
            }
            info!(backend = ?self.backend, "context brief watcher stopped");
        }
        self.counters()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn start_native(log_path: &Path, wake: SyncSender<()>) -> MonitorResult<RecommendedWatcher> {
    let dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    std::fs::create_dir_all(&dir)?;
    let target = log_path.file_name().map(ToOwned::to_owned);

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        match event {
            Ok(event) => {
                if event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == target.as_deref())
                {
                    let _ = wake.try_send(());
                }
            }
            Err(err) => warn!(error = %err, "filesystem watcher error"),
        }
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Start dispatching new context-brief lines on a background thread.
pub fn watch_context_brief(
    tailer: ContextBriefTailer,
    worker: Arc<Mutex<LibraryRefreshWorker>>,
    bridge: Option<Arc<DetectionTelemetryBridge>>,
    options: WatchOptions,
) -> MonitorResult<WatchHandle> {
    let (wake_tx, wake_rx) = sync_channel::<()>(1);

    let mut selected = None;
    for backend in &options.backends {
        match backend {
            WatchBackend::Native => match start_native(tailer.path(), wake_tx.clone()) {
                Ok(watcher) => {
                    selected = Some((WatchBackend::Native, Some(watcher)));
                    break;
                }
                Err(err) => warn!(error = %err, "native watcher unavailable, trying next backend"),
            },
            WatchBackend::Polling => {
                selected = Some((WatchBackend::Polling, None));
                break;
            }
        }
    }
    let (backend, native) = selected
        .ok_or_else(|| MonitorError::Config("no usable context brief watch backend".into()))?;

    let stop = Arc::new(AtomicBool::new(false));
    let counters = Arc::new(Mutex::new(DispatchCounters::default()));
    let interval = options.poll_interval.max(Duration::from_millis(1));

    let thread = {
        let stop = Arc::clone(&stop);
        let counters = Arc::clone(&counters);
        let bridge = bridge.clone();
        let mut tailer = tailer;
        thread::Builder::new()
            .name("polytier-watch".into())
            .spawn(move || {
                loop {
                    let stopping = stop.load(Ordering::Acquire);
                    let started = Instant::now();
                    let outcome = {
                        let mut worker = worker.lock();
                        dispatch_once(&mut tailer, &mut worker, bridge.as_deref(), None)
                    };
                    match outcome {
                        Ok(result) => {
                            if result.processed > 0 {
                                debug!(entries = result.processed, "watcher dispatched entries");
                            }
                            counters.lock().record(&result, started.elapsed());
                        }
                        Err(err) => warn!(error = %err, "watcher dispatch failed"),
                    }
                    if stopping {
                        break;
                    }
                    match wake_rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?
    };
    info!(backend = ?backend, "context brief watcher started");

    Ok(WatchHandle {
        backend,
        stop,
        wake: wake_tx,
        thread: Some(thread),
        counters,
        bridge,
        native,
    })
}

// =============================================================================
// TESTS
// =============================================================================
