//! # subacq common library
//!
//! Shared code for the subtitle acquisition engine:
//! - Error types (`Error`, `Result`)
//! - TOML configuration loading and validation
//! - Logging initialisation
//! - Broadcast event bus
//! - Time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
