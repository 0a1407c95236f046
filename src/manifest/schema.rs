//! Manifest validation
//!
//! This module checks environment maps and task declarations before a
//! manifest is handed to the executor.

use crate::error::{EnvironmentError, ManifestError, ManifestResult};
use crate::manifest::types::{Manifest, Task};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

/// Names that a manifest may not override
const RESERVED_NAMES: &[&str] = &[
    "PATH", "HOME", "USER", "SHELL", "PWD", "OLDPWD", "TERM", "LANG", "LC_ALL", "TZ", "EDITOR",
    "VISUAL", "PAGER", "MANPATH",
];

/// Validates environment variable names and values
pub struct EnvValidator {
    name_regex: Regex,
}

impl EnvValidator {
    pub fn new() -> Self {
        EnvValidator {
            // POSIX portable names
            name_regex: Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid name pattern"),
        }
    }

    /// Validate a variable name
    pub fn validate_name(&self, name: &str) -> Result<(), EnvironmentError> {
        if name.is_empty() {
            return Err(invalid(name, "name cannot be empty"));
        }

        if !self.name_regex.is_match(name) {
            return Err(invalid(
                name,
                "name must start with a letter or underscore and contain only letters, numbers, and underscores",
            ));
        }

        let upper = name.to_ascii_uppercase();
        if RESERVED_NAMES.contains(&upper.as_str()) {
            return Err(invalid(name, "name is reserved and cannot be overridden"));
        }

        Ok(())
    }

    /// Validate a variable value
    pub fn validate_value(&self, name: &str, value: &str) -> Result<(), EnvironmentError> {
        if value.contains('\0') {
            return Err(invalid(name, "value cannot contain null bytes"));
        }
        Ok(())
    }

    /// Validate every entry of an environment map
    pub fn validate_map(&self, env: &BTreeMap<String, String>) -> Result<(), EnvironmentError> {
        for (name, value) in env {
            self.validate_name(name)?;
            self.validate_value(name, value)?;
        }
        Ok(())
    }
}

impl Default for EnvValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(name: &str, reason: &str) -> EnvironmentError {
    EnvironmentError {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Validate a complete manifest (imports are validated when they are loaded)
pub fn validate_manifest(manifest: &Manifest) -> ManifestResult<()> {
    let validator = EnvValidator::new();

    validator.validate_map(&manifest.environment)?;

    for vault in &manifest.vaults {
        if vault.vault.is_empty() {
            return Err(ManifestError::Invalid(format!(
                "{} vault is missing its identifier",
                vault.provider
            )));
        }
        for target in vault.secrets.keys() {
            validator.validate_name(target)?;
        }
    }

    for (name, task) in &manifest.tasks {
        validate_task(name, task, &validator)?;
    }

    Ok(())
}

/// Validate a single task
pub fn validate_task(name: &str, task: &Task, validator: &EnvValidator) -> ManifestResult<()> {
    if name.trim().is_empty() {
        return Err(ManifestError::Invalid("task names cannot be empty".to_string()));
    }

    validator.validate_map(&task.environment)?;

    let mut seen = HashSet::new();
    for arg in &task.args {
        if arg.name.trim().is_empty() {
            return Err(ManifestError::Invalid(format!(
                "task '{}' declares an argument without a name",
                name
            )));
        }
        if !seen.insert(arg.name.as_str()) {
            return Err(ManifestError::Invalid(format!(
                "task '{}' declares argument '{}' more than once",
                name, arg.name
            )));
        }
        if arg.required && arg.default.is_some() {
            return Err(ManifestError::Invalid(format!(
                "argument '{}' of task '{}' is required and cannot have a default",
                arg.name, name
            )));
        }
        if let Some(default) = arg.default_string() {
            if !arg.arg_type.accepts(&default) {
                return Err(ManifestError::Invalid(format!(
                    "default '{}' of argument '{}' in task '{}' is not a valid {}",
                    default,
                    arg.name,
                    name,
                    arg.arg_type.as_str()
                )));
            }
        }
    }

    Ok(())
}
