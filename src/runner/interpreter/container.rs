//! Container steps
//!
//! A step becomes `<runtime> run --rm --name N -e NAME... -v host:target...
//! --network n image command...`. Variables are forwarded by name only; their
//! values travel in the runtime's own environment so they never appear in argv.
//! A step that times out or is cancelled has its container removed by name.

use crate::error::{ExecutionError, Result};
use crate::manifest::{Step, StepKind};
use crate::runner::command::{LaunchSpec, ProcessLauncher};
use crate::runner::context::{CancelFlag, TaskContext};
use crate::runner::interpreter::{unsupported, Interpreter, StepOutput, StepScope};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on the cleanup of an abandoned container
const REMOVE_TIMEOUT: Duration = Duration::from_secs(30);

static CONTAINER_SEQ: AtomicUsize = AtomicUsize::new(0);

/// A container name unique to this process
fn container_name() -> String {
    let seq = CONTAINER_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("runbook-{}-{}", process::id(), seq)
}

pub struct ContainerInterpreter {
    runtime: String,
    launcher: Arc<dyn ProcessLauncher>,
}

impl ContainerInterpreter {
    pub fn new(runtime: impl Into<String>, launcher: Arc<dyn ProcessLauncher>) -> Self {
        ContainerInterpreter {
            runtime: runtime.into(),
            launcher,
        }
    }
}

impl Interpreter for ContainerInterpreter {
    fn name(&self) -> &str {
        "container"
    }

    fn can_handle(&self, kind: StepKind) -> bool {
        kind == StepKind::Container
    }

    fn execute(
        &self,
        step: &Step,
        ctx: &TaskContext,
        scope: &mut StepScope<'_>,
    ) -> Result<StepOutput> {
        let container = match step {
            Step::Container(container) => container,
            other => return Err(unsupported(self, other).into()),
        };

        if container.image.trim().is_empty() {
            return Err(ExecutionError::InvalidStep("container image is required".to_string()).into());
        }

        // Step variables override task variables
        let mut env = ctx.exported.clone();
        env.extend(container.env.clone());

        let name = container_name();
        let mut spec = LaunchSpec::new(self.runtime.as_str())
            .args(["run", "--rm", "--name", name.as_str()])
            .cwd(ctx.working_dir.clone())
            .timeout(scope.timeout_for(step));

        for name in env.keys() {
            spec = spec.arg("-e").arg(name.as_str());
        }
        for (host, target) in &container.volumes {
            spec = spec.arg("-v").arg(format!("{}:{}", host, target));
        }
        if let Some(network) = &container.network {
            spec = spec.arg("--network").arg(network.as_str());
        }

        let spec = spec
            .arg(container.image.as_str())
            .args(container.command.iter().cloned())
            .envs(&env);

        match scope.launch(self.launcher.as_ref(), &spec) {
            Err(err @ (ExecutionError::Timeout(_) | ExecutionError::Cancelled)) => {
                self.remove(&name);
                Err(err.into())
            }
            result => Ok(result?),
        }
    }
}

impl ContainerInterpreter {
    /// Stop and remove a container whose client was killed
    fn remove(&self, name: &str) {
        tracing::warn!(container = name, "removing abandoned container");
        let spec = LaunchSpec::new(self.runtime.as_str())
            .args(["rm", "-f", name])
            .timeout(Some(REMOVE_TIMEOUT));
        if let Err(e) = self.launcher.launch(&spec, &CancelFlag::new(), &mut |_| {}) {
            tracing::warn!(container = name, error = %e, "failed to remove container");
        }
    }
}
