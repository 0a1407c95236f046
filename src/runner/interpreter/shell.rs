//! Shell steps

use crate::error::{ExecutionError, Result};
use crate::manifest::{Step, StepKind};
use crate::runner::command::{LaunchSpec, ProcessLauncher};
use crate::runner::context::TaskContext;
use crate::runner::interpreter::{unsupported, Interpreter, StepOutput, StepScope};
use std::sync::Arc;

/// Runs command text through a shell, e.g. `sh -c <command>`
pub struct ShellInterpreter {
    shell: Vec<String>,
    launcher: Arc<dyn ProcessLauncher>,
}

impl ShellInterpreter {
    pub fn new(shell: Vec<String>, launcher: Arc<dyn ProcessLauncher>) -> Self {
        ShellInterpreter { shell, launcher }
    }
}

impl Interpreter for ShellInterpreter {
    fn name(&self) -> &str {
        "shell"
    }

    fn can_handle(&self, kind: StepKind) -> bool {
        kind == StepKind::Shell
    }

    fn execute(
        &self,
        step: &Step,
        ctx: &TaskContext,
        scope: &mut StepScope<'_>,
    ) -> Result<StepOutput> {
        let shell_step = match step {
            Step::Shell(shell_step) => shell_step,
            other => return Err(unsupported(self, other).into()),
        };

        let (program, prefix) = self
            .shell
            .split_first()
            .ok_or_else(|| ExecutionError::InvalidStep("no shell configured".to_string()))?;

        let cwd = match &shell_step.dir {
            Some(dir) => ctx.working_dir.join(dir),
            None => ctx.working_dir.clone(),
        };

        let spec = LaunchSpec::new(program.as_str())
            .args(prefix.iter().cloned())
            .arg(shell_step.command.as_str())
            .envs(&ctx.exported)
            .cwd(cwd)
            .timeout(scope.timeout_for(step));

        Ok(scope.launch(self.launcher.as_ref(), &spec)?)
    }
}
