//! # Polytier Library
//!
//! This library exposes the Polytier application modules for testing and
//! integration.
//!
//! The main binary uses these modules through the `main.rs` entry point.

pub mod cli;
pub mod config;
pub mod error;
pub mod monitoring;

// Re-export polytier_core for convenience
pub use polytier_core;
