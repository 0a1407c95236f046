//! Step interpreters
//!
//! An interpreter runs the steps of one or more kinds. The registry resolves a
//! step kind to the first registered interpreter that handles it.

pub mod container;
pub mod script;
pub mod shell;
pub mod subtask;

pub use container::ContainerInterpreter;
pub use script::ScriptInterpreter;
pub use shell::ShellInterpreter;
pub use subtask::SubTaskInterpreter;

use crate::error::{DispatchError, ExecutionResult, Result};
use crate::manifest::{Step, StepKind};
use crate::runner::command::{LaunchSpec, ProcessLauncher};
use crate::runner::context::{Invocation, TaskContext};
use crate::runner::executor::TaskDispatch;
use crate::runner::report::Reporter;
use crate::settings::Settings;
use std::sync::Arc;
use std::time::Duration;

/// Result of running one step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub success: bool,

    /// Captured output, masked
    pub output: String,

    pub exit_code: Option<i32>,
}

impl StepOutput {
    /// A successful step with no output of its own
    pub fn ok() -> Self {
        StepOutput {
            success: true,
            ..Default::default()
        }
    }
}

/// What an interpreter may use while running a step
pub struct StepScope<'a> {
    /// Entry point back into the executor, for task references
    pub tasks: &'a dyn TaskDispatch,
    pub invocation: &'a mut Invocation,
    pub reporter: &'a dyn Reporter,

    /// Hierarchical position of the step
    pub path: Vec<usize>,
    pub label: String,

    /// Timeout for steps without their own
    pub default_timeout: Option<Duration>,
}

impl StepScope<'_> {
    /// Report a line of output, masked
    pub fn emit(&self, line: &str) {
        self.reporter.output(&self.invocation.masker.mask(line));
    }

    /// Timeout that applies to `step`
    pub fn timeout_for(&self, step: &Step) -> Option<Duration> {
        step.timeout().or(self.default_timeout)
    }

    /// Run a process, streaming masked lines to the reporter
    pub fn launch(
        &self,
        launcher: &dyn ProcessLauncher,
        spec: &LaunchSpec,
    ) -> ExecutionResult<StepOutput> {
        let masker = &self.invocation.masker;
        let reporter = self.reporter;
        tracing::debug!(program = %spec.program, step = %self.label, "launching process");

        let outcome = launcher.launch(spec, &self.invocation.cancel, &mut |line| {
            reporter.output(&masker.mask(line))
        })?;

        Ok(StepOutput {
            success: outcome.success(),
            output: masker.mask(&outcome.output),
            exit_code: outcome.exit_code,
        })
    }
}

/// Runs steps of the kinds it handles
pub trait Interpreter {
    fn name(&self) -> &str;

    fn can_handle(&self, kind: StepKind) -> bool;

    /// Run `step`, already substituted, in `ctx`
    fn execute(
        &self,
        step: &Step,
        ctx: &TaskContext,
        scope: &mut StepScope<'_>,
    ) -> Result<StepOutput>;
}

/// Interpreters in registration order
#[derive(Default)]
pub struct InterpreterRegistry {
    interpreters: Vec<Box<dyn Interpreter>>,
}

impl InterpreterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The builtin interpreters, launching processes through `launcher`
    pub fn with_builtins(settings: &Settings, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SubTaskInterpreter));
        registry.register(Box::new(ShellInterpreter::new(
            settings.shell.clone(),
            launcher.clone(),
        )));
        registry.register(Box::new(ContainerInterpreter::new(
            settings.container_runtime.clone(),
            launcher.clone(),
        )));
        registry.register(Box::new(ScriptInterpreter::new(launcher)));
        registry
    }

    /// Append an interpreter. Earlier registrations win on overlap.
    pub fn register(&mut self, interpreter: Box<dyn Interpreter>) {
        self.interpreters.push(interpreter);
    }

    /// The first interpreter that handles `kind`
    pub fn resolve(&self, kind: StepKind) -> std::result::Result<&dyn Interpreter, DispatchError> {
        self.interpreters
            .iter()
            .find(|i| i.can_handle(kind))
            .map(|i| i.as_ref())
            .ok_or(DispatchError::NoInterpreterForKind(kind))
    }

    pub fn len(&self) -> usize {
        self.interpreters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interpreters.is_empty()
    }
}

/// Error for a step handed to an interpreter that does not run it
pub(crate) fn unsupported(interpreter: &dyn Interpreter, step: &Step) -> DispatchError {
    DispatchError::UnsupportedStep {
        interpreter: interpreter.name().to_string(),
        kind: step.kind(),
    }
}
