//! # Tier-3 Candidates
//!
//! Provisionally discovered assemblies and their promotion lifecycle.
//!
//! ```text
//!   pending ──promote──▶ promoted ──demote──▶ demoted
//!                           ▲                    │
//!                           └──────promote───────┘
//! ```
//!
//! Candidates are never deleted; a status transition is the only terminal
//! operation, and a demoted candidate may be promoted again.

mod catalog;
mod ingestion;
mod promotion;

pub use catalog::{PromotedSymbol, Tier3Catalog, DEFAULT_FLUSH_THRESHOLD};
pub use ingestion::{Tier3IngestionPipeline, composition_signature};
pub use promotion::{
    NotificationHook, PromotionConfig, PromotionEvent, PromotionService, TelemetryHook,
};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Pending,
    Promoted,
    Demoted,
}

impl CandidateStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Promoted => "promoted",
            Self::Demoted => "demoted",
        }
    }

    /// True for exactly pending→promoted, promoted→demoted, demoted→promoted.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Promoted)
                | (Self::Promoted, Self::Demoted)
                | (Self::Demoted, Self::Promoted)
        )
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub from: CandidateStatus,
    pub to: CandidateStatus,
    pub at: f64,
    pub reason: String,
}

/// A provisional assembly awaiting promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier3Candidate {
    pub candidate_id: String,
    pub composition: String,
    pub stability_score: f64,
    pub raw_metrics: BTreeMap<String, f64>,
    pub status: CandidateStatus,
    pub created_at: f64,
    pub updated_at: f64,
    pub notes: Option<String>,
    pub decisions: Vec<Decision>,
}

impl Tier3Candidate {
    /// New pending candidate.
    #[must_use]
    pub fn pending(
        candidate_id: impl Into<String>,
        composition: impl Into<String>,
        stability_score: f64,
        raw_metrics: BTreeMap<String, f64>,
        at: f64,
    ) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            composition: composition.into(),
            stability_score: stability_score.clamp(0.0, 1.0),
            raw_metrics,
            status: CandidateStatus::Pending,
            created_at: at,
            updated_at: at,
            notes: None,
            decisions: Vec::new(),
        }
    }

    /// Move to `to`, appending a decision. Rejects transitions outside the table.
    pub fn transition(&mut self, to: CandidateStatus, reason: &str, at: f64) -> Result<CandidateStatus> {
        let from = self.status;
        if !from.can_transition(to) {
            return Err(Error::InvalidTransition {
                candidate_id: self.candidate_id.clone(),
                from,
                to,
            });
        }
        self.status = to;
        self.updated_at = at;
        self.decisions.push(Decision {
            from,
            to,
            at,
            reason: reason.to_string(),
        });
        Ok(from)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use CandidateStatus::{Demoted, Pending, Promoted};

    #[test]
    fn transition_table_is_exhaustive() {
        let all = [Pending, Promoted, Demoted];
        let allowed: Vec<(CandidateStatus, CandidateStatus)> = all
            .iter()
            .flat_map(|from| all.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition(*to))
            .collect();
        assert_eq!(
            allowed,
            vec![(Pending, Promoted), (Promoted, Demoted), (Demoted, Promoted)]
        );
    }

    #[test]
    fn transition_records_decisions() {
        let mut candidate = Tier3Candidate::pending("c-1", "A3x2", 0.9, BTreeMap::new(), 1.0);
        assert_eq!(candidate.transition(Promoted, "threshold met", 2.0).ok(), Some(Pending));
        assert!(matches!(
            candidate.transition(Pending, "nope", 3.0),
            Err(Error::InvalidTransition { .. })
        ));
        assert_eq!(candidate.status, Promoted);
        assert_eq!(candidate.decisions.len(), 1);
        assert_eq!(candidate.updated_at, 2.0);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&Demoted).unwrap_or_default();
        assert_eq!(json, "\"demoted\"");
    }
}
