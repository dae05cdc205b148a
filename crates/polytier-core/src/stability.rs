//! # Stability Calculator
//!
//! Scores a polygon assembly on three components:
//!
//! - **symmetry**: `1 / (1 + var(d))` where `d` is each delta's distance from
//!   the centroid of all deltas. Planar layouts pay a 25% dispersion penalty
//!   when two axes are required.
//! - **fold penalty**: mean of the normalized rotation load and the share of
//!   polygons outside the dominant orientation.
//! - **edge balance**: rarest side count over the most common one.
//!
//! `score = clamp(symmetry * (1 - fold_penalty) * edge_balance)`.

use crate::workspace::PolygonRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Extra dispersion applied to planar layouts when two axes are required.
pub const PLANAR_DISPERSION_PENALTY: f64 = 1.25;

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Result of one stability computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilityObservation {
    pub symmetry: f64,
    pub fold_penalty: f64,
    pub edge_balance: f64,
}

impl StabilityObservation {
    /// Combined score in `[0, 1]`.
    #[must_use]
    pub fn score(&self) -> f64 {
        clamp_unit(self.symmetry * (1.0 - self.fold_penalty) * self.edge_balance)
    }

    /// Flat metrics map, as attached to candidates and telemetry.
    #[must_use]
    pub fn as_metrics(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("stability_symmetry".to_string(), self.symmetry),
            ("stability_fold_penalty".to_string(), self.fold_penalty),
            ("stability_edge_balance".to_string(), self.edge_balance),
            ("stability_score".to_string(), self.score()),
        ])
    }
}

/// Stateless calculator; `require_two_axes` enables the planar penalty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StabilityCalculator {
    pub require_two_axes: bool,
}

impl StabilityCalculator {
    #[must_use]
    pub fn new(require_two_axes: bool) -> Self {
        Self { require_two_axes }
    }

    #[must_use]
    pub fn compute(&self, polygons: &[PolygonRecord]) -> StabilityObservation {
        StabilityObservation {
            symmetry: symmetry(polygons, self.require_two_axes),
            fold_penalty: fold_penalty(polygons),
            edge_balance: edge_balance(polygons),
        }
    }
}

/// Dispersion-based symmetry component. `1.0` for zero or one polygon.
#[must_use]
pub fn symmetry(polygons: &[PolygonRecord], require_two_axes: bool) -> f64 {
    if polygons.len() <= 1 {
        return 1.0;
    }
    let n = polygons.len() as f64;
    let mut centroid = [0.0f64; 3];
    for polygon in polygons {
        for (axis, component) in polygon.delta.iter().enumerate() {
            centroid[axis] += *component as f64 / n;
        }
    }

    let distances: Vec<f64> = polygons
        .iter()
        .map(|p| {
            p.delta
                .iter()
                .zip(centroid)
                .map(|(c, m)| (*c as f64 - m).powi(2))
                .sum::<f64>()
                .sqrt()
        })
        .collect();
    let mean = distances.iter().sum::<f64>() / n;
    let mut variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;

    let planar = polygons.iter().all(|p| p.delta[2] == polygons[0].delta[2]);
    if require_two_axes && planar {
        variance *= PLANAR_DISPERSION_PENALTY;
    }
    clamp_unit(1.0 / (1.0 + variance))
}

/// Rotation and orientation spread. `0.0` for an empty slice.
#[must_use]
pub fn fold_penalty(polygons: &[PolygonRecord]) -> f64 {
    if polygons.is_empty() {
        return 0.0;
    }
    let n = polygons.len() as f64;
    let rotations: Vec<f64> = polygons
        .iter()
        .map(|p| f64::from(p.rotation_count.unsigned_abs()))
        .collect();
    let max_rotation = rotations.iter().copied().fold(0.0, f64::max);
    let rotation_load = if max_rotation == 0.0 {
        0.0
    } else {
        (rotations.iter().sum::<f64>() / n) / max_rotation
    };

    let mut orientations: BTreeMap<u32, usize> = BTreeMap::new();
    for polygon in polygons {
        *orientations.entry(polygon.orientation_index).or_insert(0) += 1;
    }
    let dominant = orientations.values().copied().max().unwrap_or(0) as f64;
    let orientation_spread = 1.0 - dominant / n;

    clamp_unit((rotation_load + orientation_spread) / 2.0)
}

/// `min / max` of the side-count histogram. `0.0` for an empty slice.
#[must_use]
pub fn edge_balance(polygons: &[PolygonRecord]) -> f64 {
    let mut histogram: BTreeMap<u32, usize> = BTreeMap::new();
    for polygon in polygons {
        *histogram.entry(polygon.sides).or_insert(0) += 1;
    }
    match (histogram.values().min(), histogram.values().max()) {
        (Some(min), Some(max)) if *max > 0 => *min as f64 / *max as f64,
        _ => 0.0,
    }
}

// =============================================================================
// TESTS
// =============================================================================
