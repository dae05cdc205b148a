//! # Tier-0 Primitive Alphabet
//!
//! Fixed symbols shared with the geometry layer. A tier-0 symbol is a series
//! letter followed by a numeric subscript:
//!
//! | subscript | meaning                                                        |
//! |-----------|----------------------------------------------------------------|
//! | 1 digit   | single primitive, digit = 1-indexed position in the series     |
//! | 2 digits  | two-polygon attachment onto series `B`                         |
//! | 3 digits  | three-polygon attachment; hundreds digit picks `C` or `D`,      |
//! |           | tens digit references it, ones digit is the tertiary reference |
//!
//! The primitive alphabet itself (`A1`..`A9`, `B1`..`B9`) names the regular
//! polygons with 3..=20 sides.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// PRIMITIVE ALPHABET
// =============================================================================

/// Primitive symbols and the side count each one names.
pub const PRIMITIVES: [(&str, u32); 18] = [
    ("A1", 11),
    ("A2", 13),
    ("A3", 3),
    ("A4", 15),
    ("A5", 5),
    ("A6", 17),
    ("A7", 7),
    ("A8", 19),
    ("A9", 9),
    ("B1", 20),
    ("B2", 4),
    ("B3", 6),
    ("B4", 8),
    ("B5", 10),
    ("B6", 12),
    ("B7", 14),
    ("B8", 16),
    ("B9", 18),
];

/// Primitive symbol for a regular polygon with `sides` sides.
pub fn primitive_symbol(sides: u32) -> Result<&'static str> {
    PRIMITIVES
        .iter()
        .find(|(_, s)| *s == sides)
        .map(|(symbol, _)| *symbol)
        .ok_or(Error::UnsupportedSides(sides))
}

/// Side count named by a primitive symbol (case-insensitive).
pub fn primitive_sides(symbol: &str) -> Result<u32> {
    PRIMITIVES
        .iter()
        .find(|(s, _)| s.eq_ignore_ascii_case(symbol))
        .map(|(_, sides)| *sides)
        .ok_or_else(|| Error::InvalidTier0Symbol {
            symbol: symbol.to_string(),
            reason: "not a primitive symbol".to_string(),
        })
}

// =============================================================================
// GRAMMAR
// =============================================================================

/// Structure encoded by the subscript length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum Tier0Form {
    /// One polygon at `position` in the base series.
    Primitive { position: u8 },
    /// Base polygon plus one polygon from series `B`.
    Pair { position: u8, second_position: u8 },
    /// Base polygon, a secondary from `C`/`D`, and a tertiary reference.
    Triple {
        secondary_series: char,
        variant: u8,
        secondary_position: u8,
        tertiary_reference: u8,
    },
}

impl Tier0Form {
    /// Number of polygons in the attachment.
    #[must_use]
    pub fn polygon_count(&self) -> usize {
        match self {
            Self::Primitive { .. } => 1,
            Self::Pair { .. } => 2,
            Self::Triple { .. } => 3,
        }
    }
}

/// A parsed tier-0 symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier0Symbol {
    /// Base series letter, uppercased.
    pub series: char,
    /// Raw subscript digits.
    pub subscript: String,
    /// Decoded structure.
    #[serde(flatten)]
    pub form: Tier0Form,
}

fn invalid(symbol: &str, reason: impl Into<String>) -> Error {
    Error::InvalidTier0Symbol {
        symbol: symbol.to_string(),
        reason: reason.into(),
    }
}

/// Parse a tier-0 symbol such as `A3`, `A47` or `B312`.
pub fn parse(symbol: &str) -> Result<Tier0Symbol> {
    let mut chars = symbol.chars();
    let series = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
        Some(_) => return Err(invalid(symbol, "series must be an ASCII letter")),
        None => return Err(invalid(symbol, "empty symbol")),
    };

    let subscript = chars.as_str();
    if subscript.is_empty() {
        return Err(invalid(symbol, "empty subscript"));
    }
    if !subscript.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(symbol, "subscript must be numeric"));
    }
    let digits: Vec<u8> = subscript.bytes().map(|b| b - b'0').collect();

    let form = match digits.as_slice() {
        [position] => {
            if *position == 0 {
                return Err(invalid(symbol, "positions are 1-indexed"));
            }
            Tier0Form::Primitive {
                position: *position,
            }
        }
        [position, second_position] => Tier0Form::Pair {
            position: *position,
            second_position: *second_position,
        },
        [hundreds, tens, ones] => {
            let secondary_series = match hundreds {
                1 | 3 | 5 => 'C',
                2 | 4 | 6 => 'D',
                other => {
                    return Err(invalid(
                        symbol,
                        format!("unsupported hundreds digit {other}"),
                    ));
                }
            };
            Tier0Form::Triple {
                secondary_series,
                variant: hundreds.div_ceil(2),
                secondary_position: *tens,
                tertiary_reference: *ones,
            }
        }
        _ => return Err(invalid(symbol, "subscript longer than 3 digits")),
    };

    Ok(Tier0Symbol {
        series,
        subscript: subscript.to_string(),
        form,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_lookup_both_ways() {
        for (symbol, sides) in PRIMITIVES {
            assert_eq!(primitive_symbol(sides).ok(), Some(symbol));
            assert_eq!(primitive_sides(symbol).ok(), Some(sides));
        }
        assert_eq!(primitive_sides("b2").ok(), Some(4));
    }

    #[test]
    fn primitives_cover_three_to_twenty() {
        let mut sides: Vec<u32> = PRIMITIVES.iter().map(|(_, s)| *s).collect();
        sides.sort_unstable();
        assert_eq!(sides, (3..=20).collect::<Vec<_>>());
        assert!(primitive_symbol(21).is_err());
        assert!(primitive_symbol(2).is_err());
    }

    #[test]
    fn parse_single_primitive() {
        let parsed = parse("a3").ok();
        assert_eq!(
            parsed.map(|p| (p.series, p.form)),
            Some(('A', Tier0Form::Primitive { position: 3 }))
        );
    }

    #[test]
    fn parse_pair_attaches_to_b() {
        let parsed = parse("A47").map(|p| p.form).ok();
        assert_eq!(
            parsed,
            Some(Tier0Form::Pair {
                position: 4,
                second_position: 7
            })
        );
        assert_eq!(parsed.map(|f| f.polygon_count()), Some(2));
    }

    #[test]
    fn parse_triple_selects_secondary_series() {
        let c = parse("A312").map(|p| p.form).ok();
        assert_eq!(
            c,
            Some(Tier0Form::Triple {
                secondary_series: 'C',
                variant: 2,
                secondary_position: 1,
                tertiary_reference: 2
            })
        );
        let d = parse("B245").map(|p| p.form).ok();
        assert!(matches!(
            d,
            Some(Tier0Form::Triple {
                secondary_series: 'D',
                variant: 1,
                ..
            })
        ));
    }

    #[test]
    fn parse_rejects_bad_symbols() {
        for bad in ["", "A", "7", "Ax", "A1b", "A012", "A712", "A1234", "A0"] {
            assert!(
                matches!(parse(bad), Err(Error::InvalidTier0Symbol { .. })),
                "expected rejection for {bad:?}"
            );
        }
    }

    #[test]
    fn error_message_names_the_problem() {
        let message = parse("A912").err().map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("unsupported hundreds digit 9"));
    }
}
