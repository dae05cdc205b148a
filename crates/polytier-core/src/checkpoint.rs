//! # Checkpoint Engine
//!
//! Owns the live [`Workspace`] on the checkpoint hot path. Every `tick`
//! counts toward `checkpoint_interval`; when the cadence (or `force`) fires,
//! the workspace is flushed to the chunk store and a [`CheckpointRecord`] is
//! produced, stamped with the digest of a registry snapshot taken for that
//! flush.
//!
//! Each flush also appends the record as one JSON line to the context-brief
//! log. That append is best-effort: a failure is logged and the checkpoint
//! still counts.

use crate::error::{Error, Result};
use crate::formats::{ChunkStore, read_checkpoint};
use crate::guardrails::{GuardrailConfig, GuardrailStatus, evaluate_guardrails};
use crate::registry::{RegistryState, SharedRegistry, state_digest};
use crate::workspace::{Token, Workspace};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Seconds since the Unix epoch, `0.0` if the clock is before it.
#[must_use]
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Flush cadence and storage layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub chunk_dir: PathBuf,
    pub chunk_size: usize,
    /// Ticks between automatic flushes.
    pub checkpoint_interval: u64,
    /// Embed registry state in every n-th chunk.
    pub snapshot_interval: usize,
    pub label_prefix: String,
    pub context_brief_path: Option<PathBuf>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            chunk_dir: PathBuf::from("checkpoints"),
            chunk_size: 10_000,
            checkpoint_interval: 1,
            snapshot_interval: 1,
            label_prefix: "checkpoint".to_string(),
            context_brief_path: None,
        }
    }
}

// =============================================================================
// RECORDS
// =============================================================================

/// One flushed checkpoint. Immutable once written to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub label: String,
    pub path: PathBuf,
    pub polygons: usize,
    pub chunk_count: usize,
    pub module_refs: usize,
    pub registry_digest: String,
    pub timestamp: f64,
}

/// What a tick did.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub record: Option<CheckpointRecord>,
    pub guardrails: Option<GuardrailStatus>,
}

/// Result of replaying a checkpoint into the workspace.
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub label: Option<String>,
    pub polygons: usize,
    pub chunk_count: usize,
    pub registry_state: Option<RegistryState>,
    pub warnings: Vec<String>,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Single-writer checkpoint driver.
#[derive(Debug)]
pub struct CheckpointEngine {
    workspace: Workspace,
    store: ChunkStore,
    registry: SharedRegistry,
    config: CheckpointConfig,
    guardrails: Option<GuardrailConfig>,
    ticks_since_flush: u64,
    sequence: u64,
    last_record: Option<CheckpointRecord>,
}

impl CheckpointEngine {
    #[must_use]
    pub fn new(config: CheckpointConfig, registry: SharedRegistry) -> Self {
        let store = ChunkStore::new(
            config.chunk_dir.clone(),
            config.chunk_size,
            config.snapshot_interval,
        );
        Self {
            workspace: Workspace::new(),
            store,
            registry,
            config,
            guardrails: None,
            ticks_since_flush: 0,
            sequence: 0,
            last_record: None,
        }
    }

    /// Evaluate guardrails before every flush.
    #[must_use]
    pub fn with_guardrails(mut self, config: GuardrailConfig) -> Self {
        self.guardrails = Some(config);
        self
    }

    /// Continue label numbering after `sequence`.
    #[must_use]
    pub fn starting_after(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    #[must_use]
    pub fn last_record(&self) -> Option<&CheckpointRecord> {
        self.last_record.as_ref()
    }

    pub fn add_polygon(
        &mut self,
        sides: u32,
        orientation_index: u32,
        rotation_count: i32,
        delta: [i64; 3],
    ) -> Result<()> {
        self.workspace
            .add_polygon(sides, orientation_index, rotation_count, delta)
    }

    pub fn ingest_tokens<I>(&mut self, chunk_index: u32, tokens: I) -> Result<()>
    where
        I: IntoIterator<Item = Token>,
    {
        self.workspace.ingest_tokens(chunk_index, tokens)
    }

    /// Advance the cadence and flush when due.
    pub fn tick(&mut self, force: bool) -> Result<TickOutcome> {
        self.ticks_since_flush = self.ticks_since_flush.saturating_add(1);
        let due = force || self.ticks_since_flush >= self.config.checkpoint_interval.max(1);
        if !due {
            debug!(ticks = self.ticks_since_flush, "checkpoint not due");
            return Ok(TickOutcome::default());
        }

        let guardrails = match &self.guardrails {
            Some(config) => {
                let status = evaluate_guardrails(&self.workspace, config)?;
                if !status.passed {
                    warn!(breaches = ?status.breaches, "guardrail breach at checkpoint");
                }
                Some(status)
            }
            None => None,
        };

        self.sequence = self.sequence.saturating_add(1);
        let label = format!("{}-{:06}", self.config.label_prefix, self.sequence);
        let record = self.checkpoint(&label)?;
        Ok(TickOutcome {
            record: Some(record),
            guardrails,
        })
    }

    /// Flush now under an explicit label.
    pub fn checkpoint(&mut self, label: &str) -> Result<CheckpointRecord> {
        let state = self.registry.snapshot();
        let registry_digest = state_digest(&state);
        let written = self.store.write(label, &self.workspace, &state)?;

        let record = CheckpointRecord {
            label: label.to_string(),
            path: written.path,
            polygons: written.polygons,
            chunk_count: written.chunk_count,
            module_refs: self.workspace.module_references().len(),
            registry_digest,
            timestamp: unix_timestamp(),
        };
        info!(
            label = %record.label,
            polygons = record.polygons,
            chunks = record.chunk_count,
            "checkpoint flushed"
        );

        if let Some(path) = &self.config.context_brief_path {
            if let Err(err) = append_context_brief(path, &record) {
                warn!(path = %path.display(), error = %err, "context-brief append failed");
            }
        }

        self.ticks_since_flush = 0;
        self.last_record = Some(record.clone());
        Ok(record)
    }

    /// Replace the workspace with the content of a checkpoint file.
    pub fn restore_from(&mut self, path: &Path) -> Result<RestoreReport> {
        let loaded = read_checkpoint(path)?;
        let polygons = loaded.replay_into(&mut self.workspace)?;
        info!(path = %path.display(), polygons, "workspace restored");
        Ok(RestoreReport {
            label: loaded.label,
            polygons,
            chunk_count: loaded.chunks.len(),
            registry_state: loaded.registry_state,
            warnings: loaded.warnings,
        })
    }
}

/// Append one record as a JSON line.
pub fn append_context_brief(path: &Path, record: &CheckpointRecord) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())
        .map_err(Error::from)
}

// =============================================================================
// TESTS
// =============================================================================
