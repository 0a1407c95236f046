//! Task reference steps
//!
//! The executor is reached through the step scope, so the registry never
//! holds a reference to it.

use crate::error::Result;
use crate::manifest::{Step, StepKind};
use crate::runner::context::TaskContext;
use crate::runner::executor::TaskCall;
use crate::runner::interpreter::{unsupported, Interpreter, StepOutput, StepScope};

pub struct SubTaskInterpreter;

impl Interpreter for SubTaskInterpreter {
    fn name(&self) -> &str {
        "subtask"
    }

    fn can_handle(&self, kind: StepKind) -> bool {
        matches!(kind, StepKind::SubTask | StepKind::UsesSubTask)
    }

    fn execute(
        &self,
        step: &Step,
        ctx: &TaskContext,
        scope: &mut StepScope<'_>,
    ) -> Result<StepOutput> {
        let (name, supplied_args) = match step {
            // Everything this task has is passed on
            Step::SubTask { name } => (name, ctx.args.clone()),
            Step::UsesSubTask { name, args } => (name, args.clone()),
            other => return Err(unsupported(self, other).into()),
        };

        let call = TaskCall {
            name: name.clone(),
            supplied_args,
            inherited_args: ctx.args.clone(),
            inherited_env: ctx.environment.clone(),
            step_path: scope.path.clone(),
        };

        scope.tasks.execute_task(call, &mut *scope.invocation)?;
        Ok(StepOutput::ok())
    }
}
