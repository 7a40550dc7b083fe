//! # Machi Common Library
//!
//! Shared code for the machi services:
//! - Error types
//! - TOML configuration loading and resolution
//! - Event types (MachiEvent) and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
