//! # Polytier Core
//!
//! Deterministic building blocks for the polygon-assembly pipeline.
//!
//! - `registry`: tiered symbol allocation per namespace, with cached views
//! - `tier0`: the fixed primitive alphabet and its parser
//! - `workspace` / `encoder`: polygon records and their compact token stream
//! - `formats`: chunked checkpoint frames on disk
//! - `checkpoint`: periodic flushing, restore, and the context brief
//! - `stability` / `guardrails`: workspace scoring and pass/fail gates
//! - `tier3`: candidate catalog, ingestion, and promotion
//! - `snapshot`: labeled registry copies and diffs
//! - `digest`: canonical JSON hashing
//!
//! Nothing here spawns threads or reads the environment; the `polytier`
//! application wires these pieces to files, watchers, and workers.

pub mod checkpoint;
pub mod digest;
pub mod encoder;
pub mod error;
pub mod formats;
pub mod guardrails;
pub mod registry;
pub mod snapshot;
pub mod stability;
pub mod tier0;
pub mod tier3;
pub mod workspace;

pub use checkpoint::{
    CheckpointConfig, CheckpointEngine, CheckpointRecord, RestoreReport, TickOutcome,
    append_context_brief, unix_timestamp,
};
pub use digest::{compute_digest, digest_value};
pub use error::{Error, Result};
pub use guardrails::{GuardrailConfig, GuardrailStatus, evaluate_guardrails};
pub use registry::{
    Namespace, RegistryState, SharedRegistry, Symbol, SymbolRegistry, Tier, TierPolicy, TierStats,
    state_digest,
};
pub use snapshot::{RegistryDiff, RegistrySnapshot};
pub use stability::{StabilityCalculator, StabilityObservation};
pub use tier0::Tier0Symbol;
pub use tier3::{
    CandidateStatus, PromotionConfig, PromotionEvent, PromotionService, Tier3Candidate,
    Tier3Catalog, Tier3IngestionPipeline,
};
pub use workspace::{Dimension, ModuleRef, PolygonRecord, Token, Workspace};
