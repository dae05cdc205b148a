//! # Registry Snapshots
//!
//! Labeled, digested copies of registry state and the diff between two of
//! them. Snapshots are stored as pretty JSON:
//!
//! ```json
//! { "label": "...", "digest": "<sha256 hex>", "state": { "assemblies": { ... } } }
//! ```
//!
//! Diffs are keyed by `(namespace, identity)`.

use crate::error::{Error, Result};
use crate::registry::{RegistryState, SharedRegistry, state_digest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A labeled copy of registry state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub label: String,
    pub digest: String,
    pub state: RegistryState,
}

impl RegistrySnapshot {
    #[must_use]
    pub fn from_state(label: impl Into<String>, state: RegistryState) -> Self {
        Self {
            label: label.into(),
            digest: state_digest(&state),
            state,
        }
    }

    /// Copy the live state under one read lock.
    #[must_use]
    pub fn capture(label: impl Into<String>, registry: &SharedRegistry) -> Self {
        Self::from_state(label, registry.snapshot().as_ref().clone())
    }

    /// Number of identities across namespaces.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.state.values().map(BTreeMap::len).sum()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load and verify the stored digest against the stored state.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot: Self = serde_json::from_str(&raw)?;
        let actual = state_digest(&snapshot.state);
        if actual != snapshot.digest {
            return Err(Error::SnapshotDigestMismatch {
                path: path.display().to_string(),
                stored: snapshot.digest,
                computed: actual,
            });
        }
        Ok(snapshot)
    }

    /// What `candidate` has that differs from `self`.
    #[must_use]
    pub fn diff(&self, candidate: &Self) -> RegistryDiff {
        RegistryDiff::between(self, candidate)
    }
}

/// `(namespace, identity)`.
pub type EntryKey = (String, String);

/// Differences from a baseline snapshot to a candidate snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    pub baseline_label: String,
    pub candidate_label: String,
    /// In the baseline only: `key -> baseline symbol`.
    pub missing: BTreeMap<EntryKey, String>,
    /// In the candidate only: `key -> candidate symbol`.
    pub unexpected: BTreeMap<EntryKey, String>,
    /// In both with different symbols: `key -> (baseline, candidate)`.
    pub mismatched: BTreeMap<EntryKey, (String, String)>,
}

fn flatten(state: &RegistryState) -> BTreeMap<EntryKey, &str> {
    state
        .iter()
        .flat_map(|(ns, entries)| {
            entries
                .iter()
                .map(move |(id, sym)| ((ns.clone(), id.clone()), sym.as_str()))
        })
        .collect()
}

impl RegistryDiff {
    #[must_use]
    pub fn between(baseline: &RegistrySnapshot, candidate: &RegistrySnapshot) -> Self {
        let base = flatten(&baseline.state);
        let cand = flatten(&candidate.state);
        let mut diff = Self {
            baseline_label: baseline.label.clone(),
            candidate_label: candidate.label.clone(),
            ..Self::default()
        };
        for (key, symbol) in &base {
            match cand.get(key) {
                None => {
                    diff.missing.insert(key.clone(), (*symbol).to_string());
                }
                Some(other) if other != symbol => {
                    diff.mismatched
                        .insert(key.clone(), ((*symbol).to_string(), (*other).to_string()));
                }
                Some(_) => {}
            }
        }
        for (key, symbol) in cand {
            if !base.contains_key(&key) {
                diff.unexpected.insert(key, symbol.to_string());
            }
        }
        diff
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }

    /// Total differing entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.missing.len() + self.unexpected.len() + self.mismatched.len()
    }

    /// One line per difference, sorted by key.
    #[must_use]
    pub fn render_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.len());
        for ((ns, id), sym) in &self.missing {
            lines.push(format!("missing {ns}/{id} (baseline {sym})"));
        }
        for ((ns, id), sym) in &self.unexpected {
            lines.push(format!("unexpected {ns}/{id} (found {sym})"));
        }
        for ((ns, id), (base, cand)) in &self.mismatched {
            lines.push(format!("mismatched {ns}/{id} (baseline {base}, found {cand})"));
        }
        lines
    }
}

// =============================================================================
// TESTS
// =============================================================================
