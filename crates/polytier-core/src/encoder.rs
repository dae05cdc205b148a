//! # Polygon Payload Encoder
//!
//! Compact printable encoding for chunk payloads.
//!
//! ```text
//! polygon : 'P' sides orientation rotation dx dy dz
//! sides   : primitive symbol (A1..B9)  |  '#' varint
//! module  : 'M' varint
//! ```
//!
//! Varints are little-endian 6-bit groups, each mapped onto one code point of
//! the private-use block at U+E000; bit 6 marks a continuation. Signed values
//! are zig-zag encoded first.

use crate::error::{Error, Result};
use crate::tier0;
use crate::workspace::{PolygonRecord, Token};

const VARINT_BASE: u32 = 0xE000;
const CONTINUATION: u32 = 0x40;
const GROUP_MASK: u64 = 0x3F;

const POLYGON_MARKER: char = 'P';
const MODULE_MARKER: char = 'M';
const RAW_SIDES_MARKER: char = '#';

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn push_varint(out: &mut String, mut value: u64) {
    loop {
        let group = (value & GROUP_MASK) as u32;
        value >>= 6;
        let point = if value == 0 {
            VARINT_BASE + group
        } else {
            VARINT_BASE + (group | CONTINUATION)
        };
        if let Some(c) = char::from_u32(point) {
            out.push(c);
        }
        if value == 0 {
            break;
        }
    }
}

/// Append one polygon token.
pub fn encode_polygon(out: &mut String, record: &PolygonRecord) {
    out.push(POLYGON_MARKER);
    match tier0::primitive_symbol(record.sides) {
        Ok(symbol) => out.push_str(symbol),
        Err(_) => {
            out.push(RAW_SIDES_MARKER);
            push_varint(out, u64::from(record.sides));
        }
    }
    push_varint(out, u64::from(record.orientation_index));
    push_varint(out, zigzag(i64::from(record.rotation_count)));
    for component in record.delta {
        push_varint(out, zigzag(component));
    }
}

/// Append one module reference token.
pub fn encode_module(out: &mut String, module_id: u64) {
    out.push(MODULE_MARKER);
    push_varint(out, module_id);
}

/// Encode a run of polygons.
#[must_use]
pub fn encode_polygons(records: &[PolygonRecord]) -> String {
    let mut out = String::new();
    for record in records {
        encode_polygon(&mut out, record);
    }
    out
}

// =============================================================================
// DECODING
// =============================================================================

struct Cursor<'a> {
    chars: &'a [char],
    pos: usize,
}

impl Cursor<'_> {
    fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::MalformedPayload {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn next_char(&mut self) -> Result<char> {
        let c = self
            .chars
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.malformed("unexpected end of payload"))?;
        self.pos += 1;
        Ok(c)
    }

    fn varint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let c = self.next_char()?;
            let raw = u32::from(c)
                .checked_sub(VARINT_BASE)
                .filter(|r| *r < 0x80)
                .ok_or_else(|| self.malformed(format!("{c:?} is not a varint digit")))?;
            if shift >= 64 {
                return Err(self.malformed("varint too long"));
            }
            value |= (u64::from(raw) & GROUP_MASK) << shift;
            if raw & CONTINUATION == 0 {
                return Ok(value);
            }
            shift += 6;
        }
    }

    fn narrow<T: TryFrom<u64>>(&self, value: u64, what: &str) -> Result<T> {
        T::try_from(value).map_err(|_| self.malformed(format!("{what} out of range")))
    }

    fn polygon(&mut self) -> Result<PolygonRecord> {
        let sides = match self.next_char()? {
            RAW_SIDES_MARKER => {
                let raw = self.varint()?;
                self.narrow::<u32>(raw, "side count")?
            }
            series => {
                let digit = self.next_char()?;
                let symbol: String = [series, digit].iter().collect();
                tier0::primitive_sides(&symbol).map_err(|_| {
                    self.malformed(format!("unknown primitive symbol {symbol:?}"))
                })?
            }
        };
        let orientation = self.varint()?;
        let orientation_index = self.narrow::<u32>(orientation, "orientation")?;
        let rotation = unzigzag(self.varint()?);
        let rotation_count = i32::try_from(rotation)
            .map_err(|_| self.malformed("rotation out of range"))?;
        let mut delta = [0i64; 3];
        for slot in &mut delta {
            *slot = unzigzag(self.varint()?);
        }
        PolygonRecord::new(sides, orientation_index, rotation_count, delta)
    }
}

/// Decode a payload back into tokens.
pub fn decode(payload: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = payload.chars().collect();
    let mut cursor = Cursor {
        chars: &chars,
        pos: 0,
    };
    let mut tokens = Vec::new();
    while cursor.pos < chars.len() {
        match cursor.next_char()? {
            POLYGON_MARKER => tokens.push(Token::Polygon(cursor.polygon()?)),
            MODULE_MARKER => tokens.push(Token::Module(cursor.varint()?)),
            other => return Err(cursor.malformed(format!("unknown token marker {other:?}"))),
        }
    }
    Ok(tokens)
}

// =============================================================================
// TESTS
// =============================================================================
