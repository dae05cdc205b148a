//! # CLI Commands
//!
//! One `cmd_*` function per subcommand. Each takes plain paths and settings
//! and returns a value the binary prints, so the commands are testable
//! without a process boundary.
//!
//! The registry is kept between invocations as a snapshot file (see
//! [`RegistrySnapshot`]). Only symbol bindings persist; payloads do not.

use crate::config::Settings;
use crate::error::{CliError, CliResult, MonitorError};
use crate::monitoring::{
    AlertFanout, ContextBriefTailer, DetectionTelemetryBridge, DispatchResult,
    LibraryRefreshWorker, RegistryReconciliationHarness, RegistryStateProvider, TelemetryQueue,
    TracingAlertSink, TracingTelemetrySink, dispatch_once,
};
use polytier_core::formats::CHECKPOINT_EXTENSION;
use polytier_core::registry::state_to_value;
use polytier_core::tier0::{self, Tier0Symbol};
use polytier_core::{
    CandidateStatus, CheckpointEngine, CheckpointRecord, GuardrailStatus, ModuleRef, Namespace,
    PolygonRecord, PromotionEvent, PromotionService, RegistryDiff, RegistrySnapshot,
    RestoreReport, SharedRegistry, Symbol, SymbolRegistry, Tier3Candidate, Tier3Catalog,
    Tier3IngestionPipeline, TierPolicy, Token, digest_value, evaluate_guardrails, state_digest,
    unix_timestamp,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Label stored in the registry file.
pub const REGISTRY_LABEL: &str = "registry";

// =============================================================================
// REGISTRY FILE
// =============================================================================

/// Load the registry file, or start empty when it does not exist.
pub fn load_or_create_registry(path: &Path, policy: &TierPolicy) -> CliResult<SharedRegistry> {
    let mut registry = SymbolRegistry::new(policy.clone());
    if path.exists() {
        let snapshot = RegistrySnapshot::load(path)?;
        registry.load_state(&snapshot.state)?;
        debug!(path = %path.display(), entries = snapshot.entry_count(), "registry loaded");
    }
    Ok(SharedRegistry::new(registry))
}

pub fn save_registry(path: &Path, registry: &SharedRegistry) -> CliResult<()> {
    RegistrySnapshot::capture(REGISTRY_LABEL, registry).save(path)?;
    Ok(())
}

/// Provider that re-reads the registry file on every call.
#[must_use]
pub fn file_registry_provider(path: PathBuf) -> RegistryStateProvider {
    Box::new(move || {
        let snapshot = RegistrySnapshot::load(&path)
            .map_err(|err| MonitorError::Provider(format!("{}: {err}", path.display())))?;
        Ok(state_to_value(&snapshot.state))
    })
}

// =============================================================================
// DIGEST / TIER-0
// =============================================================================

/// Canonical digest of a JSON document.
pub fn cmd_digest(path: &Path) -> CliResult<String> {
    let raw = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)?;
    Ok(digest_value(&value))
}

pub fn cmd_tier0(symbol: &str) -> CliResult<Tier0Symbol> {
    Ok(tier0::parse(symbol)?)
}

// =============================================================================
// SEED
// =============================================================================

/// Seed `namespace` from a file of identities, one per line, most frequent
/// first. Blank lines and `#` comments are ignored.
pub fn cmd_seed(
    registry_path: &Path,
    policy: &TierPolicy,
    namespace: &str,
    identities_path: &Path,
) -> CliResult<Vec<(String, Symbol)>> {
    let namespace: Namespace = namespace.parse()?;
    let raw = std::fs::read_to_string(identities_path)?;
    let identities: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if identities.is_empty() {
        return Err(CliError::Invalid(format!(
            "no identities in {}",
            identities_path.display()
        )));
    }

    let registry = load_or_create_registry(registry_path, policy)?;
    let symbols = registry.write().seed_ranked(
        namespace,
        identities
            .iter()
            .map(|id| (id.clone(), Value::Object(Map::new()))),
    )?;
    save_registry(registry_path, &registry)?;
    info!(namespace = %namespace, seeded = symbols.len(), "registry seeded");
    Ok(identities.into_iter().zip(symbols).collect())
}

// =============================================================================
// CHECKPOINT / RESTORE
// =============================================================================

/// Polygons and module references to checkpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckpointInput {
    pub polygons: Vec<PolygonRecord>,
    pub modules: Vec<ModuleRef>,
}

/// Result of `cmd_checkpoint`.
#[derive(Debug, Clone)]
pub struct CheckpointReport {
    pub record: CheckpointRecord,
    pub guardrails: GuardrailStatus,
}

/// Highest sequence among `{prefix}-NNNNNN` checkpoint files in `dir`.
fn last_sequence(dir: &Path, prefix: &str) -> CliResult<u64> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut last = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXTENSION) {
            continue;
        }
        let sequence = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix(prefix))
            .and_then(|s| s.strip_prefix('-'))
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(sequence) = sequence {
            last = last.max(sequence);
        }
    }
    Ok(last)
}

/// Flush the polygons in `input_path` as one checkpoint and append its
/// record to the context brief.
pub fn cmd_checkpoint(
    settings: &Settings,
    registry_path: &Path,
    input_path: &Path,
    label: Option<&str>,
) -> CliResult<CheckpointReport> {
    let raw = std::fs::read_to_string(input_path)?;
    let input: CheckpointInput = serde_json::from_str(&raw)?;
    if input.polygons.is_empty() {
        return Err(CliError::Invalid(format!(
            "no polygons in {}",
            input_path.display()
        )));
    }

    let mut config = settings.checkpoint.clone();
    if config.context_brief_path.is_none() {
        config.context_brief_path = Some(settings.monitoring.resolve_context_brief_path()?);
    }
    let sequence = last_sequence(&config.chunk_dir, &config.label_prefix)?;
    let registry = load_or_create_registry(registry_path, &settings.tiers)?;
    let mut engine = CheckpointEngine::new(config, registry).starting_after(sequence);

    engine.ingest_tokens(0, input.polygons.into_iter().map(Token::Polygon))?;
    for module in input.modules {
        engine.ingest_tokens(module.chunk_index, [Token::Module(module.module_id)])?;
    }

    let guardrails = evaluate_guardrails(engine.workspace(), &settings.guardrails)?;
    let record = match label {
        Some(label) => engine.checkpoint(label)?,
        None => engine
            .tick(true)?
            .record
            .ok_or_else(|| CliError::Invalid("checkpoint did not flush".into()))?,
    };
    Ok(CheckpointReport { record, guardrails })
}

/// Read a checkpoint file. With `registry_out`, the embedded registry state
/// is written there as a registry file.
pub fn cmd_restore(
    settings: &Settings,
    checkpoint_path: &Path,
    registry_out: Option<&Path>,
) -> CliResult<RestoreReport> {
    let mut engine = CheckpointEngine::new(settings.checkpoint.clone(), SharedRegistry::default());
    let report = engine.restore_from(checkpoint_path)?;
    if let Some(out) = registry_out {
        let state = report.registry_state.clone().ok_or_else(|| {
            CliError::Invalid(format!(
                "{} carries no registry state",
                checkpoint_path.display()
            ))
        })?;
        let label = report.label.clone().unwrap_or_else(|| REGISTRY_LABEL.into());
        RegistrySnapshot::from_state(label, state).save(out)?;
    }
    Ok(report)
}

// =============================================================================
// TIER-3 CATALOG
// =============================================================================

fn open_catalog(settings: &Settings) -> CliResult<Tier3Catalog> {
    Ok(Tier3Catalog::open(
        &settings.catalog.path,
        settings.catalog.candidate_flush_threshold,
    )?)
}

/// Extract candidates from a checkpoint file into the catalog.
pub fn cmd_ingest(settings: &Settings, checkpoint_path: &Path) -> CliResult<Vec<String>> {
    let mut engine = CheckpointEngine::new(settings.checkpoint.clone(), SharedRegistry::default());
    let report = engine.restore_from(checkpoint_path)?;
    let label = report.label.clone().unwrap_or_else(|| {
        checkpoint_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let record = CheckpointRecord {
        label,
        path: checkpoint_path.to_path_buf(),
        polygons: report.polygons,
        chunk_count: report.chunk_count,
        module_refs: engine.workspace().module_references().len(),
        registry_digest: report
            .registry_state
            .as_ref()
            .map(state_digest)
            .unwrap_or_default(),
        timestamp: unix_timestamp(),
    };

    let mut catalog = open_catalog(settings)?;
    let pipeline = Tier3IngestionPipeline::new(settings.checkpoint.chunk_size);
    let ids = pipeline.ingest_checkpoint(&mut catalog, &record, engine.workspace())?;
    catalog.flush()?;
    Ok(ids)
}

pub fn cmd_candidates(
    settings: &Settings,
    status: Option<CandidateStatus>,
) -> CliResult<Vec<Tier3Candidate>> {
    let catalog = open_catalog(settings)?;
    Ok(catalog
        .iter_candidates()
        .filter(|c| status.is_none_or(|s| c.status == s))
        .cloned()
        .collect())
}

pub fn cmd_promote(
    settings: &Settings,
    registry_path: &Path,
    candidate_id: &str,
    reason: &str,
) -> CliResult<PromotionEvent> {
    let registry = load_or_create_registry(registry_path, &settings.tiers)?;
    let mut catalog = open_catalog(settings)?;
    let mut service = PromotionService::new(registry.clone(), settings.promotion.clone());
    let event = service.promote(&mut catalog, candidate_id, reason)?;
    catalog.flush()?;
    save_registry(registry_path, &registry)?;
    Ok(event)
}

pub fn cmd_demote(
    settings: &Settings,
    registry_path: &Path,
    candidate_id: &str,
    reason: &str,
) -> CliResult<PromotionEvent> {
    let registry = load_or_create_registry(registry_path, &settings.tiers)?;
    let mut catalog = open_catalog(settings)?;
    let mut service = PromotionService::new(registry, settings.promotion.clone());
    let event = service.demote(&mut catalog, candidate_id, reason)?;
    catalog.flush()?;
    Ok(event)
}

// =============================================================================
// SNAPSHOT / VERIFY / RECONCILE
// =============================================================================

pub fn cmd_snapshot(
    settings: &Settings,
    registry_path: &Path,
    label: &str,
    out: &Path,
) -> CliResult<RegistrySnapshot> {
    let registry = load_or_create_registry(registry_path, &settings.tiers)?;
    let harness = RegistryReconciliationHarness::new(registry);
    Ok(harness.save_snapshot(label, out)?)
}

/// Parity of the registry file against a baseline snapshot. Differences are
/// also logged as alerts.
pub fn cmd_verify(
    settings: &Settings,
    registry_path: &Path,
    baseline_path: &Path,
) -> CliResult<(bool, RegistryDiff)> {
    let registry = load_or_create_registry(registry_path, &settings.tiers)?;
    let baseline = RegistryReconciliationHarness::load_snapshot(baseline_path)?;
    let harness =
        RegistryReconciliationHarness::new(registry).with_sink(Arc::new(TracingAlertSink));
    Ok(harness.verify_parity(&baseline))
}

/// Restore the registry file to a baseline snapshot. Returns the residual
/// difference.
pub fn cmd_reconcile(
    settings: &Settings,
    registry_path: &Path,
    baseline_path: &Path,
) -> CliResult<RegistryDiff> {
    let registry = load_or_create_registry(registry_path, &settings.tiers)?;
    let baseline = RegistryReconciliationHarness::load_snapshot(baseline_path)?;
    let harness = RegistryReconciliationHarness::new(registry.clone());
    let residual = harness.reconcile(&baseline)?;
    if residual.is_empty() {
        save_registry(registry_path, &registry)?;
    }
    Ok(residual)
}

// =============================================================================
// MONITOR
// =============================================================================

/// Everything the `monitor` command drives.
#[derive(Debug)]
pub struct MonitorSession {
    pub tailer: ContextBriefTailer,
    pub worker: LibraryRefreshWorker,
    pub bridge: Arc<DetectionTelemetryBridge>,
}

impl MonitorSession {
    pub fn dispatch(&mut self) -> CliResult<DispatchResult> {
        Ok(dispatch_once(
            &mut self.tailer,
            &mut self.worker,
            Some(&self.bridge),
            None,
        )?)
    }

    /// Drain forwarded telemetry.
    pub fn finish(&self) {
        self.bridge.flush();
    }
}

/// Wire the tailer, refresh worker and telemetry bridge from settings. The
/// live registry is the registry file, re-read on every record.
pub fn build_monitor(settings: &Settings, registry_path: &Path) -> CliResult<MonitorSession> {
    let log_path = settings.monitoring.resolve_context_brief_path()?;
    let mut tailer = ContextBriefTailer::new(&log_path)
        .with_poll_interval(settings.monitoring.poll_interval());
    if let Some(cursor) = &settings.monitoring.cursor_path {
        tailer = tailer.with_cursor(cursor)?;
    }

    let alerts = AlertFanout::new().with_sink(Arc::new(TracingAlertSink));
    let worker = LibraryRefreshWorker::builder(&log_path)
        .registry_provider(file_registry_provider(registry_path.to_path_buf()))
        .on_alert(alerts.into_callback())
        .build()?;

    let queue = TelemetryQueue::spawn(
        settings.telemetry.queue_capacity,
        Arc::new(TracingTelemetrySink),
    )?;
    let bridge = DetectionTelemetryBridge::new(settings.telemetry.thresholds.clone())
        .with_queue(Arc::new(queue));

    info!(path = %log_path.display(), "monitoring context brief");
    Ok(MonitorSession {
        tailer,
        worker,
        bridge: Arc::new(bridge),
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings_in(dir: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.checkpoint.chunk_dir = dir.path().join("chunks");
        settings.monitoring.context_brief_path = dir.path().join("brief.jsonl");
        settings.catalog.path = dir.path().join("catalog.redb");
        settings
    }

    #[test]
    fn sequence_scan_ignores_foreign_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        for name in [
            "checkpoint-000004.ptck",
            "checkpoint-000011.ptck",
            "checkpoint-x.ptck",
            "checkpoint-000099.json",
            "other-000500.ptck",
        ] {
            std::fs::write(dir.path().join(name), b"").expect("write");
        }
        assert_eq!(last_sequence(dir.path(), "checkpoint").expect("scan"), 11);
        assert_eq!(last_sequence(&dir.path().join("absent"), "checkpoint").expect("scan"), 0);
    }

    #[test]
    fn file_provider_reports_missing_registry() {
        let dir = tempfile::tempdir().expect("temp dir");
        let provider = file_registry_provider(dir.path().join("registry.json"));
        assert!(matches!(provider(), Err(MonitorError::Provider(_))));

        let registry = SharedRegistry::default();
        save_registry(&dir.path().join("registry.json"), &registry).expect("save");
        let value = provider().expect("state");
        assert_eq!(digest_value(&value), registry.digest());
    }

    #[test]
    fn checkpoint_labels_continue_across_runs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings = settings_in(&dir);
        let input = dir.path().join("input.json");
        std::fs::write(
            &input,
            r#"{"polygons": [{"sides": 3, "orientation_index": 0, "rotation_count": 0, "delta": [0, 0, 0]}]}"#,
        )
        .expect("write");
        let registry = dir.path().join("registry.json");

        let first = cmd_checkpoint(&settings, &registry, &input, None).expect("first");
        let second = cmd_checkpoint(&settings, &registry, &input, None).expect("second");
        assert_eq!(first.record.label, "checkpoint-000001");
        assert_eq!(second.record.label, "checkpoint-000002");
    }
}
