//! # Checkpoint Workspace
//!
//! In-memory accumulation of encoded polygons between checkpoint flushes.
//! Append-only: polygons are never removed except by a full reset.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Smallest polygon the workspace accepts.
pub const MIN_SIDES: u32 = 3;

/// One placed polygon, as produced by the geometry layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolygonRecord {
    pub sides: u32,
    pub orientation_index: u32,
    pub rotation_count: i32,
    /// Offset from the previous placement.
    pub delta: [i64; 3],
}

impl PolygonRecord {
    /// Build a record, rejecting anything with fewer than three sides.
    pub fn new(
        sides: u32,
        orientation_index: u32,
        rotation_count: i32,
        delta: [i64; 3],
    ) -> Result<Self> {
        if sides < MIN_SIDES {
            return Err(Error::InvalidPolygon(format!(
                "polygon needs at least {MIN_SIDES} sides, got {sides}"
            )));
        }
        Ok(Self {
            sides,
            orientation_index,
            rotation_count,
            delta,
        })
    }
}

/// Cross-reference into another registry namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleRef {
    pub chunk_index: u32,
    pub module_id: u64,
}

/// Decoded payload token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Polygon(PolygonRecord),
    Module(u64),
}

/// Planar workspaces carry no module references; spatial ones do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimension {
    #[serde(rename = "2d")]
    TwoD,
    #[serde(rename = "3d")]
    ThreeD,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TwoD => "2d",
            Self::ThreeD => "3d",
        })
    }
}

/// Ordered polygons plus the set of module references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workspace {
    polygons: Vec<PolygonRecord>,
    module_refs: BTreeSet<ModuleRef>,
}

impl Workspace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a polygon.
    pub fn add_polygon(
        &mut self,
        sides: u32,
        orientation_index: u32,
        rotation_count: i32,
        delta: [i64; 3],
    ) -> Result<()> {
        let record = PolygonRecord::new(sides, orientation_index, rotation_count, delta)?;
        self.polygons.push(record);
        Ok(())
    }

    /// Append an already-built record.
    pub fn push(&mut self, record: PolygonRecord) -> Result<()> {
        if record.sides < MIN_SIDES {
            return Err(Error::InvalidPolygon(format!(
                "polygon needs at least {MIN_SIDES} sides, got {}",
                record.sides
            )));
        }
        self.polygons.push(record);
        Ok(())
    }

    /// Record decoded tokens that belong to chunk `chunk_index`.
    pub fn ingest_tokens<I>(&mut self, chunk_index: u32, tokens: I) -> Result<()>
    where
        I: IntoIterator<Item = Token>,
    {
        for token in tokens {
            match token {
                Token::Polygon(record) => self.push(record)?,
                Token::Module(module_id) => {
                    self.module_refs.insert(ModuleRef {
                        chunk_index,
                        module_id,
                    });
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    #[must_use]
    pub fn polygons(&self) -> &[PolygonRecord] {
        &self.polygons
    }

    #[must_use]
    pub fn module_references(&self) -> &BTreeSet<ModuleRef> {
        &self.module_refs
    }

    #[must_use]
    pub fn dimension(&self) -> Dimension {
        if self.module_refs.is_empty() {
            Dimension::TwoD
        } else {
            Dimension::ThreeD
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty() && self.module_refs.is_empty()
    }

    /// Full reset.
    pub fn clear(&mut self) {
        self.polygons.clear();
        self.module_refs.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================
