//! logmeta Common - Shared types and utilities
//!
//! This crate provides the identifiers, error definitions and configuration
//! used by the metadata service and its storage layer.

pub mod config;
pub mod error;
pub mod types;

pub use config::MetaConfig;
pub use error::{Error, Result};
pub use types::*;
