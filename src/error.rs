//! Error types for Runbook

use crate::manifest::StepKind;
use crate::secrets::Masker;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Runbook operations
pub type Result<T> = std::result::Result<T, RunbookError>;

/// Main error type for Runbook
#[derive(Error, Debug)]
pub enum RunbookError {
    /// Manifest loading and validation errors
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Import resolution errors
    #[error(transparent)]
    Import(#[from] ImportError),

    /// Task argument errors
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    /// Variable substitution errors
    #[error(transparent)]
    Substitution(#[from] SubstitutionError),

    /// Task reference cycles
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// Step dispatch errors
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Step execution errors
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Secret provider errors
    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("Task '{0}' not found")]
    TaskNotFound(String),

    /// Context wrapper naming the task and step an error surfaced from
    #[error("task '{task}' failed at step {step}")]
    Step {
        task: String,
        step: String,
        #[source]
        source: Box<RunbookError>,
    },

    #[error("Invalid settings: {0}")]
    Settings(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl RunbookError {
    /// The innermost error, skipping step context wrappers.
    pub fn root(&self) -> &RunbookError {
        match self {
            RunbookError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Attach task/step context unless the error already carries it.
    pub fn in_step(self, task: &str, step: &str) -> Self {
        match self {
            wrapped @ RunbookError::Step { .. } => wrapped,
            other => RunbookError::Step {
                task: task.to_string(),
                step: step.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Replace every registered secret in the text this error carries.
    ///
    /// Covers the errors a task run can produce. Load-time errors are
    /// returned unchanged.
    pub fn masked(self, masker: &Masker) -> Self {
        if masker.is_empty() {
            return self;
        }
        let m = |text: String| masker.mask(&text);

        match self {
            RunbookError::Step { task, step, source } => RunbookError::Step {
                task: m(task),
                step,
                source: Box::new(source.masked(masker)),
            },
            RunbookError::TaskNotFound(name) => RunbookError::TaskNotFound(m(name)),
            RunbookError::Argument(err) => RunbookError::Argument(match err {
                ArgumentError::MissingRequired { task, name } => ArgumentError::MissingRequired {
                    task: m(task),
                    name: m(name),
                },
                ArgumentError::InvalidValue {
                    name,
                    expected,
                    value,
                } => ArgumentError::InvalidValue {
                    name: m(name),
                    expected,
                    value: m(value),
                },
            }),
            RunbookError::Substitution(err) => RunbookError::Substitution(match err {
                SubstitutionError::UndefinedVariable(name) => {
                    SubstitutionError::UndefinedVariable(m(name))
                }
                SubstitutionError::Cycle(name) => SubstitutionError::Cycle(m(name)),
            }),
            RunbookError::Cycle(CycleError::CircularReference { task, chain }) => {
                RunbookError::Cycle(CycleError::CircularReference {
                    task: m(task),
                    chain: m(chain),
                })
            }
            RunbookError::Execution(err) => RunbookError::Execution(match err {
                ExecutionError::Launch { program, reason } => ExecutionError::Launch {
                    program: m(program),
                    reason: m(reason),
                },
                ExecutionError::InvalidStep(reason) => ExecutionError::InvalidStep(m(reason)),
                other => other,
            }),
            RunbookError::Secret(err) => RunbookError::Secret(match err {
                SecretError::Fetch {
                    provider,
                    vault,
                    reason,
                } => SecretError::Fetch {
                    provider: m(provider),
                    vault: m(vault),
                    reason: m(reason),
                },
                SecretError::UnknownProvider(kind) => SecretError::UnknownProvider(m(kind)),
            }),
            RunbookError::Settings(reason) => RunbookError::Settings(m(reason)),
            other => other,
        }
    }
}

/// Manifest parsing and validation errors
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Manifest not found: {0}")]
    NotFound(PathBuf),

    #[error("No manifest found (searched: {0})")]
    NotDiscovered(String),

    #[error("Multiple manifests found, choose one with --file: {}", .0.join(", "))]
    Ambiguous(Vec<String>),

    #[error("Failed to parse manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error(transparent)]
    InvalidEnvironment(#[from] EnvironmentError),

    #[error("Invalid manifest: {0}")]
    Invalid(String),
}

/// Environment variable validation error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid environment variable '{name}': {reason}")]
pub struct EnvironmentError {
    pub name: String,
    pub reason: String,
}

/// Import resolution errors
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to fetch import '{source_ref}': {reason}")]
    Fetch { source_ref: String, reason: String },

    #[error("File '{path}' not found in import '{source_ref}'")]
    FileMissing { source_ref: String, path: String },

    #[error("Import cycle detected at '{0}'")]
    Cycle(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// Task argument errors
#[derive(Error, Debug)]
pub enum ArgumentError {
    #[error("Missing required argument '{name}' for task '{task}'")]
    MissingRequired { task: String, name: String },

    #[error("Invalid value '{value}' for {expected} argument '{name}'")]
    InvalidValue {
        name: String,
        expected: String,
        value: String,
    },
}

/// Variable substitution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubstitutionError {
    #[error("Variable '{0}' is not defined")]
    UndefinedVariable(String),

    #[error("Substitution of '{0}' does not converge")]
    Cycle(String),
}

/// Circular task references on the live call stack
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Circular reference detected at task '{task}' ({chain})")]
    CircularReference { task: String, chain: String },
}

/// Step dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No interpreter registered for step kind '{0}'")]
    NoInterpreterForKind(StepKind),

    #[error("Interpreter '{interpreter}' cannot run a {kind} step")]
    UnsupportedStep {
        interpreter: String,
        kind: StepKind,
    },
}

/// Step execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command failed with exit code {0:?}")]
    CommandFailed(Option<i32>),

    #[error("Failed to launch '{program}': {reason}")]
    Launch { program: String, reason: String },

    #[error("Step timed out after {0:?}")]
    Timeout(Duration),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Invalid step: {0}")]
    InvalidStep(String),
}

/// Secret provider errors
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Failed to fetch secrets from {provider} vault '{vault}': {reason}")]
    Fetch {
        provider: String,
        vault: String,
        reason: String,
    },

    #[error("No secret provider registered for vault kind '{0}'")]
    UnknownProvider(String),
}

/// Specialized result type for manifest operations
pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Specialized result type for substitution operations
pub type SubstitutionResult<T> = std::result::Result<T, SubstitutionError>;

/// Specialized result type for secret operations
pub type SecretResult<T> = std::result::Result<T, SecretError>;
