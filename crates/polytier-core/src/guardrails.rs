//! # Guardrail Evaluator
//!
//! Pass/fail quality gate run on each checkpoint tick.
//!
//! Rules:
//! - `stability`: dispersion stability must reach `stability_threshold`.
//! - `closure`: module references per polygon must reach
//!   `closure_threshold`. Only spatial (3d) workspaces are held to it.

use crate::error::{Error, Result};
use crate::stability;
use crate::workspace::{Dimension, Workspace};
use serde::{Deserialize, Serialize};

/// Rule name recorded when stability falls short.
pub const RULE_STABILITY: &str = "stability";

/// Rule name recorded when closure falls short.
pub const RULE_CLOSURE: &str = "closure";

/// Warning attached to every planar evaluation.
pub const PLANAR_EXEMPTION_WARNING: &str =
    "2d workspace: no module references recorded, closure guardrail exempt";

/// Thresholds and escalation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    pub stability_threshold: f64,
    pub closure_threshold: f64,
    pub raise_on_breach: bool,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            stability_threshold: 0.85,
            closure_threshold: 0.30,
            raise_on_breach: false,
        }
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailStatus {
    pub passed: bool,
    pub breaches: Vec<String>,
    pub warnings: Vec<String>,
    pub stability_score: f64,
    pub closure_ratio: f64,
    pub dimension: Dimension,
}

/// Evaluate `workspace` against `config`.
///
/// The stability rule applies in both dimensions: a 2D workspace below
/// `stability_threshold` is a `stability` breach, not an advisory warning.
/// Only the closure rule is 3D-only.
///
/// With `raise_on_breach` a failing status comes back as
/// [`Error::GuardrailBreach`] instead of `Ok`.
pub fn evaluate_guardrails(workspace: &Workspace, config: &GuardrailConfig) -> Result<GuardrailStatus> {
    let dimension = workspace.dimension();
    let polygons = workspace.polygon_count();
    let stability_score =
        stability::symmetry(workspace.polygons(), dimension == Dimension::ThreeD);

    let mut breaches = Vec::new();
    let mut warnings = Vec::new();

    if stability_score < config.stability_threshold {
        breaches.push(RULE_STABILITY.to_string());
        warnings.push(format!(
            "stability {stability_score:.3} < {:.3}",
            config.stability_threshold
        ));
    }

    let closure_ratio = match dimension {
        Dimension::TwoD => {
            warnings.push(PLANAR_EXEMPTION_WARNING.to_string());
            0.0
        }
        Dimension::ThreeD => {
            let ratio = if polygons == 0 {
                1.0
            } else {
                (workspace.module_references().len() as f64 / polygons as f64).clamp(0.0, 1.0)
            };
            if ratio < config.closure_threshold {
                breaches.push(RULE_CLOSURE.to_string());
                warnings.push(format!(
                    "closure {ratio:.3} < {:.3}",
                    config.closure_threshold
                ));
            }
            ratio
        }
    };

    let status = GuardrailStatus {
        passed: breaches.is_empty(),
        breaches,
        warnings,
        stability_score,
        closure_ratio,
        dimension,
    };

    if !status.passed && config.raise_on_breach {
        return Err(Error::GuardrailBreach(Box::new(status)));
    }
    Ok(status)
}

// =============================================================================
// TESTS
// =============================================================================
