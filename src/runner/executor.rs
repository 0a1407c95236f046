//! Task graph execution
//!
//! The executor walks a task's steps in order. Task references recurse back
//! into `execute_task` with the caller's arguments and environment; the live
//! call stack lives in the root `Invocation`, so a task may run any number of
//! times as long as it is never its own ancestor.

use crate::error::{ArgumentError, CycleError, ExecutionError, Result, RunbookError};
use crate::manifest::{Manifest, Step, Task};
use crate::runner::command::{ProcessLauncher, SystemLauncher};
use crate::runner::context::{CancelFlag, Invocation, TaskContext};
use crate::runner::interpolate::Substitutor;
use crate::runner::interpreter::{InterpreterRegistry, StepScope};
use crate::runner::report::{ConsoleReporter, Reporter};
use crate::secrets::{Masker, SecretRegistry};
use crate::settings::Settings;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

/// A request to run one task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCall {
    pub name: String,

    /// Arguments given by the caller, overriding inherited ones
    pub supplied_args: BTreeMap<String, String>,

    /// Arguments of the calling task
    pub inherited_args: BTreeMap<String, String>,

    /// Environment of the calling task
    pub inherited_env: BTreeMap<String, String>,

    /// Position of the step that made the call
    pub step_path: Vec<usize>,
}

impl TaskCall {
    /// A call from outside any task
    pub fn root(name: impl Into<String>, args: BTreeMap<String, String>) -> Self {
        TaskCall {
            name: name.into(),
            supplied_args: args,
            ..Default::default()
        }
    }
}

/// Runs tasks by name. Implemented by the executor for task reference steps.
pub trait TaskDispatch {
    fn execute_task(&self, call: TaskCall, invocation: &mut Invocation) -> Result<()>;
}

/// Executes tasks of one manifest
pub struct Executor {
    manifest: Manifest,
    settings: Settings,
    interpreters: InterpreterRegistry,
    secrets: SecretRegistry,
    reporter: Box<dyn Reporter>,
    working_dir: PathBuf,
    cancel: CancelFlag,
}

impl Executor {
    /// An executor with the builtin interpreters, secret providers and
    /// console output
    pub fn new(manifest: Manifest, settings: Settings) -> Self {
        let interpreters = InterpreterRegistry::with_builtins(&settings, Arc::new(SystemLauncher));
        Executor {
            manifest,
            settings,
            interpreters,
            secrets: SecretRegistry::with_builtins(),
            reporter: Box::new(ConsoleReporter::default()),
            working_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            cancel: CancelFlag::new(),
        }
    }

    /// Rebuild the builtin interpreters around another process launcher
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.interpreters = InterpreterRegistry::with_builtins(&self.settings, launcher);
        self
    }

    pub fn with_interpreters(mut self, interpreters: InterpreterRegistry) -> Self {
        self.interpreters = interpreters;
        self
    }

    pub fn with_secrets(mut self, secrets: SecretRegistry) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that aborts the running invocation when set
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run `task` as a new root invocation.
    ///
    /// Every secret fetched during the run is masked in the returned error.
    pub fn run(&self, task: &str, args: BTreeMap<String, String>) -> Result<()> {
        let mut invocation =
            Invocation::new(Masker::new(self.settings.mask.as_str()), self.cancel.clone());
        self.execute_task(TaskCall::root(task, args), &mut invocation)
            .map_err(|e| e.masked(&invocation.masker))
    }

    fn substitutor<'a>(&self, ctx: &'a TaskContext) -> Substitutor<'a> {
        Substitutor::with_max_depth(ctx, self.settings.max_substitution_depth)
    }

    /// Build the context of a task invocation
    fn prepare(&self, call: &TaskCall, task: &Task, invocation: &mut Invocation) -> Result<TaskContext> {
        let mut ctx = TaskContext::new(call.name.as_str()).with_working_dir(self.working_dir.clone());
        ctx.args = merge_args(&call.name, task, &call.inherited_args, &call.supplied_args)?;

        // Later wins: global, inherited, task-local
        ctx.environment = self.manifest.environment.clone();
        ctx.environment.extend(call.inherited_env.clone());
        ctx.environment.extend(task.environment.clone());

        let secrets = self.secrets.fetch_all(&self.manifest.vaults, &ctx)?;
        invocation.masker.add_all(secrets.values().map(String::as_str));
        ctx.environment.extend(secrets.clone());
        ctx.secrets = secrets;

        // Provider values are exported exactly as fetched
        let plain: BTreeMap<String, String> = ctx
            .environment
            .iter()
            .filter(|(name, _)| !ctx.is_secret(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let mut exported = self.substitutor(&ctx).substitute_map(&plain)?;
        exported.extend(ctx.secrets.clone());
        ctx.exported = exported;
        Ok(ctx)
    }

    fn run_steps(
        &self,
        task: &Task,
        ctx: &TaskContext,
        parent_path: &[usize],
        invocation: &mut Invocation,
    ) -> Result<()> {
        let total = task.cmds.len();

        for (index, step) in task.cmds.iter().enumerate() {
            let mut path = parent_path.to_vec();
            path.push(index + 1);
            let label = step_label(&path, total);

            self.run_step(step, ctx, path, &label, invocation)
                .map_err(|e| e.in_step(&ctx.task, &label))?;
        }

        Ok(())
    }

    fn run_step(
        &self,
        step: &Step,
        ctx: &TaskContext,
        path: Vec<usize>,
        label: &str,
        invocation: &mut Invocation,
    ) -> Result<()> {
        if invocation.cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled.into());
        }

        let step = self.substitutor(ctx).substitute_step(step)?;
        self.reporter
            .step(label, &invocation.masker.mask(&describe(&step)));

        let interpreter = self.interpreters.resolve(step.kind())?;
        tracing::debug!(task = %ctx.task, step = label, interpreter = interpreter.name(), "dispatching step");

        let mut scope = StepScope {
            tasks: self,
            invocation,
            reporter: self.reporter.as_ref(),
            path,
            label: label.to_string(),
            default_timeout: self.settings.default_timeout(),
        };
        let output = interpreter.execute(&step, ctx, &mut scope)?;

        if !output.success {
            return Err(ExecutionError::CommandFailed(output.exit_code).into());
        }
        Ok(())
    }
}

impl TaskDispatch for Executor {
    fn execute_task(&self, call: TaskCall, invocation: &mut Invocation) -> Result<()> {
        if invocation.frames.contains(&call.name) {
            return Err(CycleError::CircularReference {
                chain: invocation.frames.chain(Some(call.name.as_str())),
                task: call.name,
            }
            .into());
        }

        let task = self
            .manifest
            .task(&call.name)
            .ok_or_else(|| RunbookError::TaskNotFound(call.name.clone()))?;

        tracing::debug!(task = %call.name, depth = invocation.frames.depth(), "entering task");
        let ctx = self.prepare(&call, task, invocation)?;

        self.reporter
            .task_started(&call.name, &invocation.masker.mask(&task.desc));

        invocation.frames.push(call.name.as_str());
        let result = self.run_steps(task, &ctx, &call.step_path, invocation);
        invocation.frames.pop();
        result?;

        self.reporter.task_finished(&call.name);
        Ok(())
    }
}

/// Merge caller arguments over inherited ones and fill declared defaults
pub fn merge_args(
    task_name: &str,
    task: &Task,
    inherited: &BTreeMap<String, String>,
    supplied: &BTreeMap<String, String>,
) -> std::result::Result<BTreeMap<String, String>, ArgumentError> {
    let mut args = inherited.clone();
    args.extend(supplied.clone());

    for decl in &task.args {
        match args.get(&decl.name) {
            Some(value) => {
                if !decl.arg_type.accepts(value) {
                    return Err(ArgumentError::InvalidValue {
                        name: decl.name.clone(),
                        expected: decl.arg_type.as_str().to_string(),
                        value: value.clone(),
                    });
                }
            }
            None => match decl.default_string() {
                Some(default) => {
                    args.insert(decl.name.clone(), default);
                }
                None => {
                    return Err(ArgumentError::MissingRequired {
                        task: task_name.to_string(),
                        name: decl.name.clone(),
                    })
                }
            },
        }
    }

    Ok(args)
}

/// Step label such as `2.1/3`
fn step_label(path: &[usize], total: usize) -> String {
    let position: Vec<String> = path.iter().map(|i| i.to_string()).collect();
    format!("{}/{}", position.join("."), total)
}

/// Progress line for a step
fn describe(step: &Step) -> String {
    match step {
        Step::Shell(shell) => format!("$ {}", shell.command),
        Step::SubTask { name } | Step::UsesSubTask { name, .. } => format!("> task: {}", name),
        Step::Container(container) => format!("> container: {}", container.image),
        Step::Script(script) => format!("> script: {}", script.runtime),
    }
}
