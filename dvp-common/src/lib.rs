//! # DVP Common Library
//!
//! Shared code for the delegate voting-power importer:
//! - Error type and result alias
//! - Configuration resolution (command line, environment, TOML, defaults)
//! - SQLite database bootstrap

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
