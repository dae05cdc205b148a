//! # Error Types
//!
//! One error enum for the whole core crate. Guardrail breaches carry the
//! complete status so callers can inspect every violated rule.

use crate::guardrails::GuardrailStatus;
use crate::registry::{Namespace, Tier};
use crate::tier3::CandidateStatus;
use thiserror::Error;

/// Errors produced by polytier-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Allocation frequency must be strictly positive.
    #[error("frequency must be positive, got {0}")]
    InvalidFrequency(i64),

    /// Every code point of a fixed-size tier range is taken.
    #[error("{tier} range exhausted in namespace {namespace}")]
    RangeExhausted { namespace: Namespace, tier: Tier },

    /// Namespace name is not one of clusters, assemblies, megas.
    #[error("unknown namespace: {0}")]
    UnknownNamespace(String),

    /// Two identities share one symbol inside a namespace.
    #[error("symbol {symbol} assigned twice in namespace {namespace}")]
    DuplicateSymbol { namespace: Namespace, symbol: String },

    /// Polygon failed validation.
    #[error("invalid polygon: {0}")]
    InvalidPolygon(String),

    /// Tier-0 symbol does not follow the primitive grammar.
    #[error("invalid tier-0 symbol {symbol:?}: {reason}")]
    InvalidTier0Symbol { symbol: String, reason: String },

    /// No primitive symbol exists for this side count.
    #[error("no primitive symbol for {0} sides")]
    UnsupportedSides(u32),

    /// Encoded payload could not be decoded.
    #[error("malformed payload at offset {offset}: {reason}")]
    MalformedPayload { offset: usize, reason: String },

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Chunk store header or framing is unusable.
    #[error("corrupt chunk store {path}: {reason}")]
    CorruptChunkStore { path: String, reason: String },

    /// Stored snapshot digest does not match its content.
    #[error("snapshot {path} digest mismatch: stored {stored}, computed {computed}")]
    SnapshotDigestMismatch {
        path: String,
        stored: String,
        computed: String,
    },

    /// JSON conversion failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary conversion failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] postcard::Error),

    /// Candidate catalog database failure.
    #[error("catalog storage error: {0}")]
    Catalog(String),

    /// No candidate with this id.
    #[error("unknown candidate: {0}")]
    UnknownCandidate(String),

    /// Status change outside the transition table.
    #[error("invalid transition for {candidate_id}: {from} -> {to}")]
    InvalidTransition {
        candidate_id: String,
        from: CandidateStatus,
        to: CandidateStatus,
    },

    /// Stability score below the promotion threshold.
    #[error("candidate {candidate_id} rejected: score {score:.3} < threshold {threshold:.3}")]
    PromotionRejected {
        candidate_id: String,
        score: f64,
        threshold: f64,
    },

    /// Guardrail evaluation failed with `raise_on_breach` set.
    #[error("guardrail breach: {}", .0.breaches.join(", "))]
    GuardrailBreach(Box<GuardrailStatus>),
}

impl From<redb::Error> for Error {
    fn from(err: redb::Error) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(err: redb::TransactionError) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<redb::TableError> for Error {
    fn from(err: redb::TableError) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<redb::StorageError> for Error {
    fn from(err: redb::StorageError) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<redb::CommitError> for Error {
    fn from(err: redb::CommitError) -> Self {
        Self::Catalog(err.to_string())
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
