//! Runbook - a declarative YAML task runner
//!
//! A manifest names tasks, each a sequence of steps: shell commands,
//! references to other tasks, container runs and embedded scripts. Manifests
//! may import tasks from local files, URLs and git repositories, and tasks may
//! pull secrets from vaults, which are masked in everything shown.

// Public modules
pub mod cli;
pub mod error;
pub mod manifest;
pub mod runner;
pub mod secrets;
pub mod settings;

// Re-export commonly used types
pub use error::{Result, RunbookError};
pub use manifest::{load_manifest, Manifest, ManifestLoader};
pub use runner::Executor;
pub use settings::Settings;

/// Current version of Runbook
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
