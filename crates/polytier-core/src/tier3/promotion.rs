//! # Promotion Service
//!
//! Drives candidates through the promotion state machine and keeps the live
//! registry in step.
//!
//! Every transition runs in this order:
//!
//! 1. registry write lock taken; symbol bound (promotion only)
//! 2. catalog update, committed
//! 3. cache invalidation, lock released
//! 4. event appended to the ring buffer
//! 5. telemetry hook, then simulation notification hook
//!
//! If the catalog commit fails the symbol binding is undone before the lock
//! is released, and nothing is invalidated, recorded or announced.
//! Invalidation always lands before anyone hears about the transition.

use super::{CandidateStatus, PromotedSymbol, Tier3Candidate, Tier3Catalog};
use crate::checkpoint::unix_timestamp;
use crate::error::{Error, Result};
use crate::guardrails::GuardrailStatus;
use crate::registry::{Namespace, SharedRegistry};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{info, warn};

/// Receives every promotion event.
pub type TelemetryHook = Box<dyn Fn(&PromotionEvent) + Send + Sync>;

/// Receives `(candidate_id, new_status)` for the simulation side.
pub type NotificationHook = Box<dyn Fn(&str, CandidateStatus) + Send + Sync>;

/// Thresholds and buffer sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    pub promotion_threshold: f64,
    pub demotion_threshold: f64,
    pub telemetry_buffer_size: usize,
    /// Namespace promoted candidates are allocated in.
    pub namespace: Namespace,
    /// Allocation frequency when a candidate carries no `frequency` metric.
    pub default_frequency: i64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: 0.8,
            demotion_threshold: 0.5,
            telemetry_buffer_size: 128,
            namespace: Namespace::Assemblies,
            default_frequency: 250,
        }
    }
}

/// One applied transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionEvent {
    pub candidate_id: String,
    pub composition: String,
    pub promotion_state: CandidateStatus,
    pub previous_state: CandidateStatus,
    pub stability_score: f64,
    pub symbol: Option<String>,
    pub reason: String,
    pub timestamp: f64,
}

/// Promotion/demotion driver bound to one live registry.
pub struct PromotionService {
    registry: SharedRegistry,
    config: PromotionConfig,
    telemetry: Option<TelemetryHook>,
    notify: Option<NotificationHook>,
    events: VecDeque<PromotionEvent>,
}

impl std::fmt::Debug for PromotionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromotionService")
            .field("config", &self.config)
            .field("events", &self.events.len())
            .field("telemetry", &self.telemetry.is_some())
            .field("notify", &self.notify.is_some())
            .finish()
    }
}

impl PromotionService {
    #[must_use]
    pub fn new(registry: SharedRegistry, config: PromotionConfig) -> Self {
        Self {
            registry,
            config,
            telemetry: None,
            notify: None,
            events: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn with_telemetry(mut self, hook: TelemetryHook) -> Self {
        self.telemetry = Some(hook);
        self
    }

    #[must_use]
    pub fn with_notifications(mut self, hook: NotificationHook) -> Self {
        self.notify = Some(hook);
        self
    }

    #[must_use]
    pub fn config(&self) -> &PromotionConfig {
        &self.config
    }

    fn candidate<'a>(catalog: &'a Tier3Catalog, candidate_id: &str) -> Result<&'a Tier3Candidate> {
        catalog
            .get_candidate(candidate_id)
            .ok_or_else(|| Error::UnknownCandidate(candidate_id.to_string()))
    }

    fn frequency_for(&self, candidate: &Tier3Candidate) -> i64 {
        candidate
            .raw_metrics
            .get("frequency")
            .map(|f| *f as i64)
            .filter(|f| *f > 0)
            .unwrap_or(self.config.default_frequency)
    }

    /// Promote when the score reaches `promotion_threshold`.
    pub fn promote(
        &mut self,
        catalog: &mut Tier3Catalog,
        candidate_id: &str,
        reason: &str,
    ) -> Result<PromotionEvent> {
        let candidate = Self::candidate(catalog, candidate_id)?.clone();
        if !candidate.status.can_transition(CandidateStatus::Promoted) {
            return Err(Error::InvalidTransition {
                candidate_id: candidate_id.to_string(),
                from: candidate.status,
                to: CandidateStatus::Promoted,
            });
        }
        if candidate.stability_score < self.config.promotion_threshold {
            return Err(Error::PromotionRejected {
                candidate_id: candidate_id.to_string(),
                score: candidate.stability_score,
                threshold: self.config.promotion_threshold,
            });
        }

        let namespace = self.config.namespace;
        let frequency = self.frequency_for(&candidate);
        let at = unix_timestamp();

        let mut registry = self.registry.write();
        let previous = registry.lookup(namespace, candidate_id).cloned();
        let symbol = registry.promote(namespace, candidate_id, frequency)?;
        let promoted = PromotedSymbol {
            candidate_id: candidate_id.to_string(),
            symbol: symbol.to_string(),
            namespace,
            composition: candidate.composition.clone(),
            promoted_at: at,
        };
        let from = match catalog.apply_transition(
            candidate_id,
            CandidateStatus::Promoted,
            reason,
            at,
            Some(promoted),
        ) {
            Ok(from) => from,
            Err(err) => {
                if previous.as_ref() != Some(&symbol) {
                    let restored = match &previous {
                        Some(old) => registry.insert_entry(namespace, candidate_id, old.as_str()),
                        None => {
                            registry.remove(namespace, candidate_id);
                            Ok(())
                        }
                    };
                    if let Err(restore_err) = restored {
                        warn!(candidate = candidate_id, error = %restore_err, "registry rollback failed");
                    }
                }
                warn!(candidate = candidate_id, error = %err, "promotion not recorded");
                return Err(err);
            }
        };
        registry.invalidate();
        drop(registry);

        Ok(self.publish(PromotionEvent {
            candidate_id: candidate_id.to_string(),
            composition: candidate.composition,
            promotion_state: CandidateStatus::Promoted,
            previous_state: from,
            stability_score: candidate.stability_score,
            symbol: Some(symbol.to_string()),
            reason: reason.to_string(),
            timestamp: at,
        }))
    }

    /// Promote only if the guardrail status also passed.
    pub fn promote_with_guardrails(
        &mut self,
        catalog: &mut Tier3Catalog,
        candidate_id: &str,
        guardrails: &GuardrailStatus,
        reason: &str,
    ) -> Result<PromotionEvent> {
        if !guardrails.passed {
            return Err(Error::GuardrailBreach(Box::new(guardrails.clone())));
        }
        self.promote(catalog, candidate_id, reason)
    }

    /// Demote a promoted candidate. The registry symbol stays allocated.
    pub fn demote(
        &mut self,
        catalog: &mut Tier3Catalog,
        candidate_id: &str,
        reason: &str,
    ) -> Result<PromotionEvent> {
        let candidate = Self::candidate(catalog, candidate_id)?.clone();
        if !candidate.status.can_transition(CandidateStatus::Demoted) {
            return Err(Error::InvalidTransition {
                candidate_id: candidate_id.to_string(),
                from: candidate.status,
                to: CandidateStatus::Demoted,
            });
        }

        let at = unix_timestamp();
        let mut registry = self.registry.write();
        let symbol = registry
            .lookup(self.config.namespace, candidate_id)
            .map(ToString::to_string);
        let from =
            catalog.apply_transition(candidate_id, CandidateStatus::Demoted, reason, at, None)?;
        registry.invalidate();
        drop(registry);

        Ok(self.publish(PromotionEvent {
            candidate_id: candidate_id.to_string(),
            composition: candidate.composition,
            promotion_state: CandidateStatus::Demoted,
            previous_state: from,
            stability_score: candidate.stability_score,
            symbol,
            reason: reason.to_string(),
            timestamp: at,
        }))
    }

    /// Apply whichever threshold the candidate's current score crosses.
    pub fn reevaluate(
        &mut self,
        catalog: &mut Tier3Catalog,
        candidate_id: &str,
    ) -> Result<Option<PromotionEvent>> {
        let candidate = Self::candidate(catalog, candidate_id)?;
        let score = candidate.stability_score;
        match candidate.status {
            CandidateStatus::Promoted if score < self.config.demotion_threshold => self
                .demote(catalog, candidate_id, "stability below demotion threshold")
                .map(Some),
            CandidateStatus::Pending | CandidateStatus::Demoted
                if score >= self.config.promotion_threshold =>
            {
                self.promote(catalog, candidate_id, "stability meets promotion threshold")
                    .map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Re-evaluate every candidate in id order.
    pub fn reevaluate_all(&mut self, catalog: &mut Tier3Catalog) -> Result<Vec<PromotionEvent>> {
        let ids: Vec<String> = catalog
            .iter_candidates()
            .map(|c| c.candidate_id.clone())
            .collect();
        let mut events = Vec::new();
        for id in ids {
            if let Some(event) = self.reevaluate(catalog, &id)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Up to `limit` most recent events, oldest first.
    #[must_use]
    pub fn recent_events(&self, limit: usize) -> Vec<PromotionEvent> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    fn publish(&mut self, event: PromotionEvent) -> PromotionEvent {
        info!(
            candidate = %event.candidate_id,
            state = %event.promotion_state,
            symbol = ?event.symbol,
            "candidate transition"
        );
        let capacity = self.config.telemetry_buffer_size.max(1);
        while self.events.len() >= capacity {
            self.events.pop_front();
        }
        self.events.push_back(event.clone());
        if let Some(hook) = &self.telemetry {
            hook(&event);
        }
        if let Some(hook) = &self.notify {
            hook(&event.candidate_id, event.promotion_state);
        }
        event
    }
}

// =============================================================================
// TESTS
// =============================================================================
