//! Embedded script steps

use crate::error::{ExecutionError, Result};
use crate::manifest::{Step, StepKind};
use crate::runner::command::{LaunchSpec, ProcessLauncher};
use crate::runner::context::TaskContext;
use crate::runner::interpreter::{unsupported, Interpreter, StepOutput, StepScope};
use std::path::Path;
use std::sync::Arc;

/// Runs inline source with `<runtime> <flag> <body> args...`
pub struct ScriptInterpreter {
    launcher: Arc<dyn ProcessLauncher>,
}

impl ScriptInterpreter {
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        ScriptInterpreter { launcher }
    }
}

/// Flag that makes `runtime` evaluate its next argument as source
pub fn inline_flag(runtime: &str) -> &'static str {
    let name = Path::new(runtime)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(runtime);

    if name.starts_with("node") || name.starts_with("ruby") || name.starts_with("perl") {
        "-e"
    } else {
        "-c"
    }
}

impl Interpreter for ScriptInterpreter {
    fn name(&self) -> &str {
        "script"
    }

    fn can_handle(&self, kind: StepKind) -> bool {
        kind == StepKind::Script
    }

    fn execute(
        &self,
        step: &Step,
        ctx: &TaskContext,
        scope: &mut StepScope<'_>,
    ) -> Result<StepOutput> {
        let script = match step {
            Step::Script(script) => script,
            other => return Err(unsupported(self, other).into()),
        };

        if script.runtime.trim().is_empty() {
            return Err(ExecutionError::InvalidStep("script runtime is required".to_string()).into());
        }

        let spec = LaunchSpec::new(script.runtime.as_str())
            .arg(inline_flag(&script.runtime))
            .arg(script.body.as_str())
            .args(script.args.iter().cloned())
            .envs(&ctx.exported)
            .cwd(ctx.working_dir.clone())
            .timeout(scope.timeout_for(step));

        Ok(scope.launch(self.launcher.as_ref(), &spec)?)
    }
}
