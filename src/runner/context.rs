//! Execution context for task running
//!
//! A `TaskContext` holds the namespaces of one task invocation. An
//! `Invocation` holds the state shared by every task of one root run.

use crate::secrets::Masker;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Prefix selecting the secrets namespace in `${secrets.NAME}`
pub const SECRETS_PREFIX: &str = "secrets.";

/// Variables available to one task invocation
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    /// Name of the task this context belongs to
    pub task: String,

    /// Merged environment (global, inherited, task-local, then secrets), unexpanded
    pub environment: BTreeMap<String, String>,

    /// Secrets fetched for this invocation
    pub secrets: BTreeMap<String, String>,

    /// Arguments, stringified
    pub args: BTreeMap<String, String>,

    /// Environment after substitution, injected into launched processes
    pub exported: BTreeMap<String, String>,

    /// Directory steps run in
    pub working_dir: PathBuf,
}

impl TaskContext {
    pub fn new(task: impl Into<String>) -> Self {
        TaskContext {
            task: task.into(),
            working_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            ..Default::default()
        }
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    /// Resolve a variable name: environment, then secrets, then arguments.
    ///
    /// `secrets.NAME` only looks in the secrets namespace.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        if let Some(secret) = name.strip_prefix(SECRETS_PREFIX) {
            return self.secrets.get(secret).map(String::as_str);
        }

        self.environment
            .get(name)
            .or_else(|| self.secrets.get(name))
            .or_else(|| self.args.get(name))
            .map(String::as_str)
    }

    /// Whether `name` resolves to a value supplied by a secret provider.
    ///
    /// Secrets overlay the environment, so a plain name that is also a
    /// secret target always resolves to the secret.
    pub fn is_secret(&self, name: &str) -> bool {
        let name = name.strip_prefix(SECRETS_PREFIX).unwrap_or(name);
        self.secrets.contains_key(name)
    }
}

/// The live call stack of one root invocation, as task names
#[derive(Debug, Clone, Default)]
pub struct FramePath {
    frames: Vec<String>,
}

impl FramePath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a task is on the stack
    pub fn contains(&self, task: &str) -> bool {
        self.frames.iter().any(|f| f == task)
    }

    pub fn push(&mut self, task: impl Into<String>) {
        self.frames.push(task.into());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The stack rendered as `a -> b -> c`, optionally closed by `next`
    pub fn chain(&self, next: Option<&str>) -> String {
        let mut names: Vec<&str> = self.frames.iter().map(String::as_str).collect();
        names.extend(next);
        names.join(" -> ")
    }
}

/// Shared flag used to abort a running invocation
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State scoped to one root invocation
#[derive(Debug)]
pub struct Invocation {
    pub frames: FramePath,
    pub masker: Masker,
    pub cancel: CancelFlag,
}

impl Invocation {
    pub fn new(masker: Masker, cancel: CancelFlag) -> Self {
        Invocation {
            frames: FramePath::new(),
            masker,
            cancel,
        }
    }
}
