//! # Sitecheck Common Library
//!
//! Shared code for the sitecheck services:
//! - Error type and result alias
//! - TOML configuration loading and resolution
//! - Pipeline event types and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
