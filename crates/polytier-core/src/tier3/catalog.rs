//! # Tier-3 Catalog
//!
//! Candidate store backed by redb.
//!
//! The whole catalog is held in memory (BTreeMap, deterministic iteration)
//! and written through to two tables:
//!
//! | table        | key            | value                       |
//! |--------------|----------------|-----------------------------|
//! | `candidates` | candidate id   | postcard `Tier3Candidate`   |
//! | `promoted`   | candidate id   | postcard `PromotedSymbol`   |
//!
//! Plain upserts are batched and flushed after `flush_threshold` mutations.
//! Status transitions are flushed immediately.

use super::{CandidateStatus, Tier3Candidate};
use crate::error::Result;
use crate::registry::Namespace;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Mutations buffered before an automatic flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 16;

const CANDIDATES: TableDefinition<&str, &[u8]> = TableDefinition::new("candidates");
const PROMOTED: TableDefinition<&str, &[u8]> = TableDefinition::new("promoted");

/// Registry symbol held by a promoted candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotedSymbol {
    pub candidate_id: String,
    pub symbol: String,
    pub namespace: Namespace,
    pub composition: String,
    pub promoted_at: f64,
}

/// Durable candidate catalog.
pub struct Tier3Catalog {
    db: Database,
    path: PathBuf,
    candidates: BTreeMap<String, Tier3Candidate>,
    promoted: BTreeMap<String, PromotedSymbol>,
    dirty_candidates: BTreeSet<String>,
    dirty_promoted: BTreeSet<String>,
    pending_mutations: usize,
    flush_threshold: usize,
    #[cfg(test)]
    fail_writes: bool,
}

impl std::fmt::Debug for Tier3Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier3Catalog")
            .field("path", &self.path)
            .field("candidates", &self.candidates.len())
            .field("promoted", &self.promoted.len())
            .field("pending_mutations", &self.pending_mutations)
            .finish()
    }
}

impl Tier3Catalog {
    /// Open or create the catalog database at `path`.
    pub fn open(path: &Path, flush_threshold: usize) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        let mut candidates = BTreeMap::new();
        let mut promoted = BTreeMap::new();
        let txn = db.begin_write()?;
        {
            let table = txn.open_table(CANDIDATES)?;
            for entry in table.iter()? {
                let (key, value) = entry?;
                match postcard::from_bytes::<Tier3Candidate>(value.value()) {
                    Ok(candidate) => {
                        candidates.insert(key.value().to_string(), candidate);
                    }
                    Err(err) => warn!(candidate = key.value(), error = %err, "skipping unreadable candidate"),
                }
            }
            let table = txn.open_table(PROMOTED)?;
            for entry in table.iter()? {
                let (key, value) = entry?;
                match postcard::from_bytes::<PromotedSymbol>(value.value()) {
                    Ok(symbol) => {
                        promoted.insert(key.value().to_string(), symbol);
                    }
                    Err(err) => warn!(candidate = key.value(), error = %err, "skipping unreadable promotion"),
                }
            }
        }
        txn.commit()?;
        debug!(
            path = %path.display(),
            candidates = candidates.len(),
            promoted = promoted.len(),
            "catalog opened"
        );

        Ok(Self {
            db,
            path: path.to_path_buf(),
            candidates,
            promoted,
            dirty_candidates: BTreeSet::new(),
            dirty_promoted: BTreeSet::new(),
            pending_mutations: 0,
            flush_threshold: flush_threshold.max(1),
            #[cfg(test)]
            fail_writes: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace a candidate.
    pub fn upsert_candidate(&mut self, candidate: Tier3Candidate) -> Result<()> {
        self.dirty_candidates.insert(candidate.candidate_id.clone());
        self.candidates
            .insert(candidate.candidate_id.clone(), candidate);
        self.pending_mutations += 1;
        if self.pending_mutations >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn get_candidate(&self, candidate_id: &str) -> Option<&Tier3Candidate> {
        self.candidates.get(candidate_id)
    }

    /// All candidates in id order.
    pub fn iter_candidates(&self) -> impl Iterator<Item = &Tier3Candidate> {
        self.candidates.values()
    }

    /// Currently promoted symbols in id order.
    pub fn iter_promoted(&self) -> impl Iterator<Item = &PromotedSymbol> {
        self.promoted.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    #[must_use]
    pub fn pending_mutations(&self) -> usize {
        self.pending_mutations
    }

    /// Apply a validated status change and flush it.
    ///
    /// `symbol` is recorded when moving to promoted; demotion drops the
    /// promoted entry but leaves the registry symbol alone. The in-memory
    /// catalog only changes once the write has committed.
    pub(crate) fn apply_transition(
        &mut self,
        candidate_id: &str,
        to: CandidateStatus,
        reason: &str,
        at: f64,
        symbol: Option<PromotedSymbol>,
    ) -> Result<CandidateStatus> {
        let mut candidate = self
            .candidates
            .get(candidate_id)
            .cloned()
            .ok_or_else(|| crate::error::Error::UnknownCandidate(candidate_id.to_string()))?;
        let from = candidate.transition(to, reason, at)?;
        let promoted = match (to, symbol) {
            (CandidateStatus::Promoted, Some(symbol)) => PromotedChange::Insert(symbol),
            (CandidateStatus::Demoted, _) => PromotedChange::Remove,
            _ => PromotedChange::Keep,
        };

        self.write_through(Some((&candidate, &promoted)))?;

        match promoted {
            PromotedChange::Insert(symbol) => {
                self.promoted.insert(candidate_id.to_string(), symbol);
            }
            PromotedChange::Remove => {
                self.promoted.remove(candidate_id);
            }
            PromotedChange::Keep => {}
        }
        self.candidates.insert(candidate_id.to_string(), candidate);
        self.mark_clean();
        Ok(from)
    }

    /// Write every buffered change in one transaction.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty_candidates.is_empty() && self.dirty_promoted.is_empty() {
            self.pending_mutations = 0;
            return Ok(());
        }
        self.write_through(None)?;
        self.mark_clean();
        Ok(())
    }

    /// Buffered rows plus an optional staged transition, committed together.
    fn write_through(&self, staged: Option<(&Tier3Candidate, &PromotedChange)>) -> Result<()> {
        #[cfg(test)]
        if self.fail_writes {
            return Err(crate::error::Error::Catalog("write rejected".into()));
        }

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CANDIDATES)?;
            for id in &self.dirty_candidates {
                if let Some(candidate) = self.candidates.get(id) {
                    let bytes = postcard::to_stdvec(candidate)?;
                    table.insert(id.as_str(), bytes.as_slice())?;
                }
            }
            if let Some((candidate, _)) = staged {
                let bytes = postcard::to_stdvec(candidate)?;
                table.insert(candidate.candidate_id.as_str(), bytes.as_slice())?;
            }

            let mut table = txn.open_table(PROMOTED)?;
            for id in &self.dirty_promoted {
                match self.promoted.get(id) {
                    Some(symbol) => {
                        let bytes = postcard::to_stdvec(symbol)?;
                        table.insert(id.as_str(), bytes.as_slice())?;
                    }
                    None => {
                        table.remove(id.as_str())?;
                    }
                }
            }
            if let Some((candidate, change)) = staged {
                let id = candidate.candidate_id.as_str();
                match change {
                    PromotedChange::Insert(symbol) => {
                        let bytes = postcard::to_stdvec(symbol)?;
                        table.insert(id, bytes.as_slice())?;
                    }
                    PromotedChange::Remove => {
                        table.remove(id)?;
                    }
                    PromotedChange::Keep => {}
                }
            }
        }
        txn.commit()?;
        debug!(
            candidates = self.dirty_candidates.len(),
            promoted = self.dirty_promoted.len(),
            transition = staged.map(|(c, _)| c.candidate_id.as_str()),
            "catalog flushed"
        );
        Ok(())
    }

    fn mark_clean(&mut self) {
        self.dirty_candidates.clear();
        self.dirty_promoted.clear();
        self.pending_mutations = 0;
    }

    /// Make every subsequent write fail before it reaches the database.
    #[cfg(test)]
    pub(crate) fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

/// What a transition does to the `promoted` table.
enum PromotedChange {
    Keep,
    Insert(PromotedSymbol),
    Remove,
}

impl Drop for Tier3Catalog {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(path = %self.path.display(), error = %err, "catalog flush on drop failed");
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
