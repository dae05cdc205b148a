//! # Settings
//!
//! Every field has a default. Settings come from an optional JSON file and
//! are then overridden from the environment:
//!
//! | variable                        | effect                                   |
//! |---------------------------------|------------------------------------------|
//! | `POLYTIER_MONITORING_ENABLED`   | `1/true/yes/on` or `0/false/no/off`      |
//! | `POLYTIER_CONTEXT_BRIEF_PATH`   | primary context-brief path               |
//! | `POLYTIER_MONITORING_POLL_MS`   | poll interval in milliseconds            |
//!
//! Unparseable values keep the previous setting.

use crate::error::{MonitorError, MonitorResult};
use crate::monitoring::TelemetryThresholds;
use polytier_core::tier3::DEFAULT_FLUSH_THRESHOLD;
use polytier_core::{CheckpointConfig, GuardrailConfig, PromotionConfig, TierPolicy};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const ENV_MONITORING_ENABLED: &str = "POLYTIER_MONITORING_ENABLED";
pub const ENV_CONTEXT_BRIEF_PATH: &str = "POLYTIER_CONTEXT_BRIEF_PATH";
pub const ENV_MONITORING_POLL_MS: &str = "POLYTIER_MONITORING_POLL_MS";

pub const DEFAULT_CONTEXT_BRIEF_PATH: &str = "memory/coordination/context-brief.jsonl";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

// =============================================================================
// SECTIONS
// =============================================================================

/// Context-brief discovery and polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub enabled: bool,
    pub context_brief_path: PathBuf,
    pub fallback_paths: Vec<PathBuf>,
    pub create_if_missing: bool,
    pub poll_interval_ms: u64,
    /// Where the tailer persists its byte offset between runs.
    pub cursor_path: Option<PathBuf>,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            context_brief_path: PathBuf::from(DEFAULT_CONTEXT_BRIEF_PATH),
            fallback_paths: Vec::new(),
            create_if_missing: false,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            cursor_path: None,
        }
    }
}

impl MonitoringSettings {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// First existing path among the primary and the fallbacks; otherwise
    /// the primary, created empty when `create_if_missing` is set.
    pub fn resolve_context_brief_path(&self) -> MonitorResult<PathBuf> {
        let candidates = std::iter::once(&self.context_brief_path).chain(&self.fallback_paths);
        for candidate in candidates {
            if candidate.exists() {
                debug!(path = %candidate.display(), "context brief resolved");
                return Ok(candidate.clone());
            }
        }

        let target = self.context_brief_path.clone();
        if self.create_if_missing {
            if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            OpenOptions::new().create(true).append(true).open(&target)?;
            debug!(path = %target.display(), "context brief created");
        }
        Ok(target)
    }
}

/// Candidate catalog location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub path: PathBuf,
    pub candidate_flush_threshold: usize,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tier3/catalog.redb"),
            candidate_flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

/// Telemetry queue and bridge thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub queue_capacity: usize,
    pub thresholds: TelemetryThresholds,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thresholds: TelemetryThresholds::default(),
        }
    }
}

// =============================================================================
// SETTINGS
// =============================================================================

/// Complete application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub monitoring: MonitoringSettings,
    pub checkpoint: CheckpointConfig,
    pub tiers: TierPolicy,
    pub guardrails: GuardrailConfig,
    pub promotion: PromotionConfig,
    pub catalog: CatalogSettings,
    pub telemetry: TelemetrySettings,
}

impl Settings {
    /// Read `path` when given (a missing file yields defaults), then apply
    /// process environment overrides.
    pub fn load(path: Option<&Path>) -> MonitorResult<Self> {
        let mut settings = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                debug!(path = %path.display(), "settings file absent, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> MonitorResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|err| {
            MonitorError::Config(format!("invalid settings file {}: {err}", path.display()))
        })
    }

    /// Apply environment-style overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MONITORING_ENABLED) {
            match coerce_bool(&raw) {
                Some(enabled) => self.monitoring.enabled = enabled,
                None => warn!(variable = ENV_MONITORING_ENABLED, value = %raw, "ignoring override"),
            }
        }
        if let Some(raw) = lookup(ENV_CONTEXT_BRIEF_PATH).filter(|v| !v.trim().is_empty()) {
            self.monitoring.context_brief_path = PathBuf::from(raw.trim());
        }
        if let Some(raw) = lookup(ENV_MONITORING_POLL_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.monitoring.poll_interval_ms = ms,
                Err(_) => warn!(variable = ENV_MONITORING_POLL_MS, value = %raw, "ignoring override"),
            }
        }
    }
}

fn coerce_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================
