//! User settings
//!
//! Settings are layered, later wins:
//! 1. Built-in defaults
//! 2. `settings.yml` in the user configuration directory
//! 3. `.env` in the working directory
//! 4. `RUNBOOK_*` environment variables
//! 5. Command line flags

use crate::error::{Result, RunbookError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings shared by the executor and interpreters
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Shell invocation prefix for shell steps
    pub shell: Vec<String>,

    /// Container runtime binary
    pub container_runtime: String,

    /// Timeout applied to steps that do not set their own
    pub default_timeout_secs: Option<u64>,

    /// Placeholder shown in place of secret values
    pub mask: String,

    /// Bound on nested variable resolution
    pub max_substitution_depth: usize,

    /// Timeout for fetching HTTP imports
    pub http_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            shell: vec!["sh".to_string(), "-c".to_string()],
            container_runtime: "docker".to_string(),
            default_timeout_secs: None,
            mask: "<<SENSITIVE>>".to_string(),
            max_substitution_depth: 32,
            http_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load settings from every layer except command line flags
    pub fn load() -> Result<Self> {
        let mut settings = match Self::user_file() {
            Some(path) if path.is_file() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        if let Err(e) = dotenvy::from_path(".env") {
            if !e.not_found() {
                tracing::warn!(error = %e, "ignoring unreadable .env file");
            }
        }

        settings.apply_env(|key| env::var(key).ok())?;
        Ok(settings)
    }

    /// Location of the user settings file
    pub fn user_file() -> Option<PathBuf> {
        ProjectDirs::from("", "", "runbook").map(|dirs| dirs.config_dir().join("settings.yml"))
    }

    /// Read settings from a YAML file, defaulting missing fields
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| RunbookError::Settings(format!("{}: {}", path.display(), e)))
    }

    /// Apply `RUNBOOK_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(shell) = lookup("RUNBOOK_SHELL") {
            let words = shell_words::split(&shell)
                .map_err(|e| RunbookError::Settings(format!("RUNBOOK_SHELL: {}", e)))?;
            if words.is_empty() {
                return Err(RunbookError::Settings("RUNBOOK_SHELL is empty".to_string()));
            }
            self.shell = words;
        }

        if let Some(timeout) = lookup("RUNBOOK_TIMEOUT") {
            let secs = timeout.trim().parse::<u64>().map_err(|_| {
                RunbookError::Settings(format!("RUNBOOK_TIMEOUT is not a number: {}", timeout))
            })?;
            self.set_timeout(secs);
        }

        if let Some(runtime) = lookup("RUNBOOK_CONTAINER_RUNTIME") {
            self.container_runtime = runtime;
        }

        if let Some(mask) = lookup("RUNBOOK_MASK") {
            self.mask = mask;
        }

        Ok(())
    }

    /// Set the default step timeout. Zero disables it.
    pub fn set_timeout(&mut self, secs: u64) {
        self.default_timeout_secs = if secs == 0 { None } else { Some(secs) };
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
