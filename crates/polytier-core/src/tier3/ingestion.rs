//! Checkpoint → candidate extraction.

use super::{Tier3Candidate, Tier3Catalog};
use crate::checkpoint::CheckpointRecord;
use crate::digest;
use crate::error::Result;
use crate::stability::StabilityCalculator;
use crate::tier0;
use crate::workspace::{ModuleRef, PolygonRecord, Workspace};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// Side-count histogram rendered with primitive symbols, e.g. `A3x4+B2x2`.
#[must_use]
pub fn composition_signature(polygons: &[PolygonRecord]) -> String {
    let mut histogram: BTreeMap<u32, usize> = BTreeMap::new();
    for polygon in polygons {
        *histogram.entry(polygon.sides).or_insert(0) += 1;
    }
    histogram
        .iter()
        .map(|(sides, count)| match tier0::primitive_symbol(*sides) {
            Ok(symbol) => format!("{symbol}x{count}"),
            Err(_) => format!("#{sides}x{count}"),
        })
        .collect::<Vec<_>>()
        .join("+")
}

struct Seed<'a> {
    label: String,
    chunk_index: Option<usize>,
    polygons: &'a [PolygonRecord],
    module_refs: Vec<ModuleRef>,
}

impl Seed<'_> {
    fn is_trivial(&self) -> bool {
        self.polygons.is_empty() || (self.polygons.len() == 1 && self.module_refs.len() <= 1)
    }

    fn signature(&self) -> String {
        let polygons: Vec<_> = self
            .polygons
            .iter()
            .map(|p| json!([p.sides, p.orientation_index, p.rotation_count, p.delta]))
            .collect();
        let refs: Vec<_> = self
            .module_refs
            .iter()
            .map(|m| json!([m.chunk_index, m.module_id]))
            .collect();
        digest::digest_value(&json!({
            "label": self.label,
            "polygons": polygons,
            "module_refs": refs,
        }))
    }
}

/// Turns fresh checkpoints into pending candidates.
#[derive(Debug, Clone, Copy)]
pub struct Tier3IngestionPipeline {
    chunk_size: usize,
}

impl Tier3IngestionPipeline {
    /// `chunk_size` must match the checkpoint store so per-chunk candidates
    /// line up with the written chunks.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Extract candidates from `workspace` as flushed in `record` and upsert
    /// them. Returns the ids touched.
    ///
    /// One candidate covers the whole workspace; checkpoints spanning several
    /// chunks also yield one candidate per chunk. Known candidates get fresh
    /// metrics and keep their status.
    pub fn ingest_checkpoint(
        &self,
        catalog: &mut Tier3Catalog,
        record: &CheckpointRecord,
        workspace: &Workspace,
    ) -> Result<Vec<String>> {
        let polygons = workspace.polygons();
        let mut seeds = vec![Seed {
            label: record.label.clone(),
            chunk_index: None,
            polygons,
            module_refs: workspace.module_references().iter().copied().collect(),
        }];
        if record.chunk_count > 1 {
            for (index, slice) in polygons.chunks(self.chunk_size).enumerate() {
                seeds.push(Seed {
                    label: format!("{}-c{index}", record.label),
                    chunk_index: Some(index),
                    polygons: slice,
                    module_refs: workspace
                        .module_references()
                        .iter()
                        .filter(|m| m.chunk_index as usize == index)
                        .copied()
                        .collect(),
                });
            }
        }

        let mut touched = Vec::new();
        for seed in seeds {
            if seed.is_trivial() {
                debug!(label = %seed.label, "skipping trivial seed");
                continue;
            }
            let signature = seed.signature();
            let candidate_id = format!("{}-{}", seed.label, &signature[..8]);

            let observation =
                StabilityCalculator::new(!seed.module_refs.is_empty()).compute(seed.polygons);
            let mut metrics = observation.as_metrics();
            metrics.insert("polygon_count".into(), seed.polygons.len() as f64);
            metrics.insert("module_ref_count".into(), seed.module_refs.len() as f64);
            metrics.insert("timestamp".into(), record.timestamp);
            if let Some(index) = seed.chunk_index {
                metrics.insert("chunk_index".into(), index as f64);
            }

            let candidate = match catalog.get_candidate(&candidate_id) {
                Some(existing) => {
                    let mut updated = existing.clone();
                    updated.stability_score = observation.score();
                    updated.raw_metrics = metrics;
                    updated.updated_at = record.timestamp;
                    updated
                }
                None => Tier3Candidate::pending(
                    candidate_id.clone(),
                    composition_signature(seed.polygons),
                    observation.score(),
                    metrics,
                    record.timestamp,
                ),
            };
            catalog.upsert_candidate(candidate)?;
            touched.push(candidate_id);
        }
        Ok(touched)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier3::CandidateStatus;
    use crate::workspace::Token;
    use std::path::PathBuf;

    fn record(label: &str, workspace: &Workspace, chunk_count: usize) -> CheckpointRecord {
        CheckpointRecord {
            label: label.to_string(),
            path: PathBuf::from("unused"),
            polygons: workspace.polygon_count(),
            chunk_count,
            module_refs: workspace.module_references().len(),
            registry_digest: String::new(),
            timestamp: 42.0,
        }
    }

    #[test]
    fn composition_uses_primitive_symbols() {
        let polygons: Vec<PolygonRecord> = [3, 3, 4, 25]
            .into_iter()
            .filter_map(|s| PolygonRecord::new(s, 0, 0, [0; 3]).ok())
            .collect();
        assert_eq!(composition_signature(&polygons), "A3x2+B2x1+#25x1");
    }

    #[test]
    fn trivial_workspaces_are_skipped() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut catalog = Tier3Catalog::open(&dir.path().join("c.redb"), 16).expect("open");
        let pipeline = Tier3IngestionPipeline::new(10);

        let empty = Workspace::new();
        let ids = pipeline
            .ingest_checkpoint(&mut catalog, &record("cp-0", &empty, 0), &empty)
            .expect("ingest");
        assert!(ids.is_empty());

        let mut single = Workspace::new();
        single.add_polygon(4, 0, 0, [0; 3]).expect("polygon");
        single.ingest_tokens(0, [Token::Module(1)]).expect("tokens");
        let ids = pipeline
            .ingest_checkpoint(&mut catalog, &record("cp-1", &single, 1), &single)
            .expect("ingest");
        assert!(ids.is_empty());
        assert!(catalog.is_empty());
    }

    #[test]
    fn ingestion_creates_pending_candidates_with_metrics() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut catalog = Tier3Catalog::open(&dir.path().join("c.redb"), 16).expect("open");
        let pipeline = Tier3IngestionPipeline::new(2);

        let mut workspace = Workspace::new();
        for i in 0..4 {
            workspace.add_polygon(3, 0, 0, [i, 0, 0]).expect("polygon");
        }
        let ids = pipeline
            .ingest_checkpoint(&mut catalog, &record("cp-7", &workspace, 2), &workspace)
            .expect("ingest");
        assert_eq!(ids.len(), 3);
        assert!(ids[0].starts_with("cp-7-"));
        assert_eq!(ids[0].len(), "cp-7-".len() + 8);
        assert!(ids[1].starts_with("cp-7-c0-"));

        let whole = catalog.get_candidate(&ids[0]).expect("candidate");
        assert_eq!(whole.status, CandidateStatus::Pending);
        assert_eq!(whole.composition, "A3x4");
        assert_eq!(whole.raw_metrics.get("polygon_count").copied(), Some(4.0));
        assert_eq!(whole.raw_metrics.get("timestamp").copied(), Some(42.0));
        assert!(whole.raw_metrics.contains_key("stability_score"));
    }

    #[test]
    fn reingestion_keeps_status() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut catalog = Tier3Catalog::open(&dir.path().join("c.redb"), 16).expect("open");
        let pipeline = Tier3IngestionPipeline::new(10);
        let mut workspace = Workspace::new();
        workspace.add_polygon(3, 0, 0, [0; 3]).expect("polygon");
        workspace.add_polygon(4, 0, 0, [1, 0, 0]).expect("polygon");
        let cp = record("cp-1", &workspace, 1);

        let ids = pipeline.ingest_checkpoint(&mut catalog, &cp, &workspace).expect("ingest");
        catalog
            .apply_transition(&ids[0], CandidateStatus::Promoted, "manual", 50.0, None)
            .expect("promote");
        let again = pipeline.ingest_checkpoint(&mut catalog, &cp, &workspace).expect("ingest");
        assert_eq!(ids, again);
        assert_eq!(
            catalog.get_candidate(&ids[0]).map(|c| c.status),
            Some(CandidateStatus::Promoted)
        );
    }
}
