//! # Formats Module
//!
//! On-disk formats for checkpoint data.
//!
//! This module contains:
//! - Chunked checkpoint store (header + length-prefixed postcard frames)
//!
//! Polygon payloads inside the frames use [`crate::encoder`].

mod chunks;

pub use chunks::*;
