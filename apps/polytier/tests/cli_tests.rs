//! Integration tests for Polytier CLI commands.
//!
//! Uses tempfile for testing file-based operations.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use polytier::cli::{
    build_monitor, cmd_candidates, cmd_checkpoint, cmd_demote, cmd_digest, cmd_ingest,
    cmd_promote, cmd_reconcile, cmd_restore, cmd_seed, cmd_snapshot, cmd_tier0, cmd_verify,
    load_or_create_registry, save_registry,
};
use polytier::config::Settings;
use polytier::error::CliError;
use polytier_core::{CandidateStatus, Namespace, RegistrySnapshot, Tier, TierPolicy};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Create a temporary directory for tests.
fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Settings with every file under `dir`.
fn create_settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.checkpoint.chunk_dir = dir.path().join("chunks");
    settings.checkpoint.chunk_size = 2;
    settings.monitoring.context_brief_path = dir.path().join("brief.jsonl");
    settings.catalog.path = dir.path().join("tier3").join("catalog.redb");
    settings
}

/// Four identical triangles: a perfectly stable workspace.
fn create_polygon_input(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("polygons.json");
    let polygon = json!({"sides": 3, "orientation_index": 0, "rotation_count": 0, "delta": [0, 0, 0]});
    let content = json!({"polygons": [polygon, polygon, polygon, polygon]});
    std::fs::write(&path, content.to_string()).unwrap();
    path
}

fn create_identities(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("identities.txt");
    std::fs::write(&path, "# ranked\nhexagon-ring\n\ntriangle-fan\nsquare-strip\n").unwrap();
    path
}

// =============================================================================
// DIGEST / TIER-0 TESTS
// =============================================================================

#[test]
fn test_digest_ignores_key_order() {
    let temp = create_temp_dir();
    let a = temp.path().join("a.json");
    let b = temp.path().join("b.json");
    std::fs::write(&a, r#"{"x": 1, "y": {"b": 2, "a": [1, 2]}}"#).unwrap();
    std::fs::write(&b, r#"{"y": {"a": [1, 2], "b": 2}, "x": 1}"#).unwrap();

    let digest = cmd_digest(&a).unwrap();
    assert_eq!(digest.len(), 64);
    assert_eq!(digest, cmd_digest(&b).unwrap());
}

#[test]
fn test_digest_rejects_invalid_json() {
    let temp = create_temp_dir();
    let path = temp.path().join("bad.json");
    std::fs::write(&path, "{not json").unwrap();
    assert!(matches!(cmd_digest(&path), Err(CliError::Json(_))));
}

#[test]
fn test_tier0_parses_and_rejects() {
    let symbol = cmd_tier0("A47").unwrap();
    assert_eq!(symbol.series, 'A');
    assert_eq!(symbol.form.polygon_count(), 2);
    assert!(cmd_tier0("A").is_err());
    assert!(cmd_tier0("Ax").is_err());
}

// =============================================================================
// REGISTRY FILE TESTS
// =============================================================================

#[test]
fn test_load_nonexistent_creates_empty_registry() {
    let temp = create_temp_dir();
    let registry =
        load_or_create_registry(&temp.path().join("missing.json"), &TierPolicy::default())
            .unwrap();
    assert!(registry.read().is_empty());
}

#[test]
fn test_seed_persists_ranked_symbols() {
    let temp = create_temp_dir();
    let registry_path = temp.path().join("registry.json");
    let identities = create_identities(&temp);

    let seeded = cmd_seed(&registry_path, &TierPolicy::default(), "assemblies", &identities).unwrap();
    assert_eq!(seeded.len(), 3);
    assert_eq!(seeded[0].0, "hexagon-ring");
    assert!(seeded.iter().all(|(_, symbol)| symbol.tier() == Tier::Tier1));

    let reloaded = load_or_create_registry(&registry_path, &TierPolicy::default()).unwrap();
    assert_eq!(
        reloaded.read().lookup(Namespace::Assemblies, "triangle-fan"),
        Some(&seeded[1].1)
    );
}

#[test]
fn test_seed_rejects_unknown_namespace() {
    let temp = create_temp_dir();
    let identities = create_identities(&temp);
    let result = cmd_seed(
        &temp.path().join("registry.json"),
        &TierPolicy::default(),
        "galaxies",
        &identities,
    );
    assert!(matches!(result, Err(CliError::Core(_))));
}

// =============================================================================
// CHECKPOINT / RESTORE TESTS
// =============================================================================

#[test]
fn test_checkpoint_writes_file_and_context_brief() {
    let temp = create_temp_dir();
    let settings = create_settings(&temp);
    let input = create_polygon_input(&temp);

    let report = cmd_checkpoint(&settings, &temp.path().join("registry.json"), &input, None).unwrap();
    assert_eq!(report.record.polygons, 4);
    assert_eq!(report.record.chunk_count, 2);
    assert!(report.record.path.exists());

    let brief = std::fs::read_to_string(temp.path().join("brief.jsonl")).unwrap();
    assert_eq!(brief.lines().count(), 1);
    assert!(brief.contains(&report.record.registry_digest));
}

#[test]
fn test_restore_recovers_polygons_and_registry() {
    let temp = create_temp_dir();
    let settings = create_settings(&temp);
    let registry_path = temp.path().join("registry.json");
    cmd_seed(&registry_path, &settings.tiers, "assemblies", &create_identities(&temp)).unwrap();
    let record = cmd_checkpoint(&settings, &registry_path, &create_polygon_input(&temp), Some("manual"))
        .unwrap()
        .record;

    let out = temp.path().join("restored-registry.json");
    let report = cmd_restore(&settings, &record.path, Some(&out)).unwrap();
    assert_eq!(report.polygons, 4);
    assert_eq!(report.label.as_deref(), Some("manual"));
    assert_eq!(RegistrySnapshot::load(&out).unwrap().digest, record.registry_digest);
}

#[test]
fn test_checkpoint_rejects_empty_input() {
    let temp = create_temp_dir();
    let settings = create_settings(&temp);
    let input = temp.path().join("empty.json");
    std::fs::write(&input, r#"{"polygons": []}"#).unwrap();
    let result = cmd_checkpoint(&settings, &temp.path().join("registry.json"), &input, None);
    assert!(matches!(result, Err(CliError::Invalid(_))));
}

// =============================================================================
// CANDIDATE TESTS
// =============================================================================

#[test]
fn test_ingest_promote_demote_cycle() {
    let temp = create_temp_dir();
    let settings = create_settings(&temp);
    let registry_path = temp.path().join("registry.json");
    let record = cmd_checkpoint(&settings, &registry_path, &create_polygon_input(&temp), None)
        .unwrap()
        .record;

    let ids = cmd_ingest(&settings, &record.path).unwrap();
    // Whole workspace plus one per chunk.
    assert_eq!(ids.len(), 3);
    let pending = cmd_candidates(&settings, Some(CandidateStatus::Pending)).unwrap();
    assert_eq!(pending.len(), 3);

    let id = &ids[0];
    let promoted = cmd_promote(&settings, &registry_path, id, "stable").unwrap();
    assert_eq!(promoted.promotion_state, CandidateStatus::Promoted);
    let symbol = promoted.symbol.clone().unwrap();

    let registry = load_or_create_registry(&registry_path, &settings.tiers).unwrap();
    assert_eq!(
        registry
            .read()
            .lookup(Namespace::Assemblies, id)
            .map(|s| s.as_str().to_string()),
        Some(symbol.clone())
    );

    let demoted = cmd_demote(&settings, &registry_path, id, "regression").unwrap();
    assert_eq!(demoted.promotion_state, CandidateStatus::Demoted);
    assert_eq!(demoted.symbol, Some(symbol));
    assert_eq!(
        cmd_candidates(&settings, Some(CandidateStatus::Demoted)).unwrap().len(),
        1
    );
}

#[test]
fn test_demote_pending_candidate_fails() {
    let temp = create_temp_dir();
    let settings = create_settings(&temp);
    let registry_path = temp.path().join("registry.json");
    let record = cmd_checkpoint(&settings, &registry_path, &create_polygon_input(&temp), None)
        .unwrap()
        .record;
    let ids = cmd_ingest(&settings, &record.path).unwrap();
    assert!(cmd_demote(&settings, &registry_path, &ids[0], "early").is_err());
}

// =============================================================================
// SNAPSHOT / VERIFY / RECONCILE TESTS
// =============================================================================

#[test]
fn test_verify_and_reconcile_after_drift() {
    let temp = create_temp_dir();
    let settings = create_settings(&temp);
    let registry_path = temp.path().join("registry.json");
    let baseline_path = temp.path().join("baseline.json");
    cmd_seed(&registry_path, &settings.tiers, "assemblies", &create_identities(&temp)).unwrap();
    cmd_snapshot(&settings, &registry_path, "baseline", &baseline_path).unwrap();

    let (ok, diff) = cmd_verify(&settings, &registry_path, &baseline_path).unwrap();
    assert!(ok);
    assert!(diff.is_empty());

    let registry = load_or_create_registry(&registry_path, &settings.tiers).unwrap();
    registry
        .write()
        .allocate(Namespace::Megas, "rogue", json!({}), 2000)
        .unwrap();
    registry.write().remove(Namespace::Assemblies, "square-strip");
    save_registry(&registry_path, &registry).unwrap();

    let (ok, diff) = cmd_verify(&settings, &registry_path, &baseline_path).unwrap();
    assert!(!ok);
    assert_eq!(diff.len(), 2);

    let residual = cmd_reconcile(&settings, &registry_path, &baseline_path).unwrap();
    assert!(residual.is_empty());
    let (ok, _) = cmd_verify(&settings, &registry_path, &baseline_path).unwrap();
    assert!(ok);
}

// =============================================================================
// MONITOR TESTS
// =============================================================================

#[test]
fn test_monitor_session_flags_stale_checkpoint() {
    let temp = create_temp_dir();
    let settings = create_settings(&temp);
    let registry_path = temp.path().join("registry.json");
    save_registry(&registry_path, &load_or_create_registry(&registry_path, &settings.tiers).unwrap())
        .unwrap();
    cmd_checkpoint(&settings, &registry_path, &create_polygon_input(&temp), None).unwrap();

    let mut session = build_monitor(&settings, &registry_path).unwrap();
    let first = session.dispatch().unwrap();
    assert_eq!(first.refresh_results.len(), 1);
    assert!(first.refresh_results[0].registry_match);

    // Mutate the registry file, then replay the now stale record.
    cmd_seed(&registry_path, &settings.tiers, "assemblies", &create_identities(&temp)).unwrap();
    let stale_digest = first.refresh_results[0].record.registry_digest.clone();
    let brief_path = temp.path().join("brief.jsonl");
    let line = std::fs::read_to_string(&brief_path)
        .unwrap()
        .lines()
        .next()
        .unwrap()
        .to_string();
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&brief_path)
        .unwrap();
    writeln!(file, "{line}").unwrap();

    let second = session.dispatch().unwrap();
    assert_eq!(second.refresh_results.len(), 1);
    assert!(!second.refresh_results[0].registry_match);
    assert_eq!(second.refresh_results[0].record.registry_digest, stale_digest);
    session.finish();
}
