//! # Codeframe Common Library
//!
//! Shared code for the codeframe services including:
//! - Error and result types
//! - Configuration loading (TOML file, root folder resolution)
//! - Database initialization for the shared answer corpus tables
//! - Event types (CodeframeEvent enum) and the EventBus

pub mod config;
pub mod db;
pub mod error;
pub mod events;

pub use error::{Error, Result};
