//! Manifest loading and validation
//!
//! This module handles parsing of runbook manifests, resolution of their
//! imports and validation of their structure.

pub mod import;
pub mod parse;
pub mod schema;
pub mod step;
pub mod types;

// Re-export main types
pub use import::{DefaultFetcher, ImportFetcher, ImportSource};
pub use parse::*;
pub use schema::*;
pub use step::*;
pub use types::*;
