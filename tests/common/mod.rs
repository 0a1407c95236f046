//! Common test utilities
#![allow(dead_code)]

use runbook::error::{ExecutionError, ExecutionResult, SecretError, SecretResult};
use runbook::manifest::{parse_manifest, Manifest, VaultConfig};
use runbook::runner::{
    CancelFlag, Executor, LaunchOutcome, LaunchSpec, ProcessLauncher, RecordingReporter,
    TaskContext,
};
use runbook::secrets::{SecretProvider, SecretRegistry};
use runbook::Settings;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Create a temporary directory with a runbook.yml file
pub fn create_test_manifest(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let manifest_path = temp_dir.path().join("runbook.yml");
    fs::write(&manifest_path, content).unwrap();
    (temp_dir, manifest_path)
}

/// Write a file below `dir`, creating parent directories
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Parse a manifest from a string
pub fn manifest(yaml: &str) -> Manifest {
    parse_manifest(yaml, Path::new("test.runbook.yml")).unwrap()
}

/// What the fake launcher does for a matching command
#[derive(Debug, Clone)]
enum Response {
    Exit(i32, Vec<String>),
    Timeout,
}

#[derive(Default)]
struct FakeState {
    launched: Vec<LaunchSpec>,
    responses: Vec<(String, Response)>,
}

/// Records launches instead of spawning processes. Clones share state.
///
/// Unmatched commands succeed silently.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<FakeState>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands containing `needle` print `lines` and exit with `code`
    pub fn respond(&self, needle: &str, code: i32, lines: &[&str]) {
        self.state.lock().unwrap().responses.push((
            needle.to_string(),
            Response::Exit(code, lines.iter().map(|l| l.to_string()).collect()),
        ));
    }

    /// Commands containing `needle` time out
    pub fn time_out(&self, needle: &str) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push((needle.to_string(), Response::Timeout));
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.state.lock().unwrap().launched.clone()
    }

    /// Last argument of every launch, which is the command text for shell steps
    pub fn commands(&self) -> Vec<String> {
        self.launched()
            .iter()
            .map(|spec| spec.args.last().cloned().unwrap_or_default())
            .collect()
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(
        &self,
        spec: &LaunchSpec,
        cancel: &CancelFlag,
        on_line: &mut dyn FnMut(&str),
    ) -> ExecutionResult<LaunchOutcome> {
        let response = {
            let mut state = self.state.lock().unwrap();
            state.launched.push(spec.clone());
            let joined = spec.args.join(" ");
            state
                .responses
                .iter()
                .find(|(needle, _)| joined.contains(needle.as_str()))
                .map(|(_, response)| response.clone())
        };

        if cancel.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }

        match response {
            Some(Response::Exit(code, lines)) => {
                let mut output = String::new();
                for line in &lines {
                    on_line(line);
                    output.push_str(line);
                    output.push('\n');
                }
                Ok(LaunchOutcome {
                    exit_code: Some(code),
                    output,
                })
            }
            Some(Response::Timeout) => Err(ExecutionError::Timeout(
                spec.timeout.unwrap_or_default(),
            )),
            None => Ok(LaunchOutcome {
                exit_code: Some(0),
                output: String::new(),
            }),
        }
    }
}

/// Secret provider serving a fixed map
pub struct FixedSecrets {
    kind: String,
    values: BTreeMap<String, String>,
}

impl FixedSecrets {
    pub fn new(kind: &str, values: &[(&str, &str)]) -> Self {
        FixedSecrets {
            kind: kind.to_string(),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl SecretProvider for FixedSecrets {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn get_secrets(
        &self,
        _vault: &VaultConfig,
        _ctx: &TaskContext,
    ) -> SecretResult<BTreeMap<String, String>> {
        Ok(self.values.clone())
    }
}

/// Secret provider that always fails
pub struct FailingSecrets(pub &'static str);

impl SecretProvider for FailingSecrets {
    fn kind(&self) -> &str {
        self.0
    }

    fn get_secrets(
        &self,
        vault: &VaultConfig,
        _ctx: &TaskContext,
    ) -> SecretResult<BTreeMap<String, String>> {
        Err(SecretError::Fetch {
            provider: self.0.to_string(),
            vault: vault.vault.clone(),
            reason: "access denied".to_string(),
        })
    }
}

/// An executor over `yaml` with a fake launcher and a recording reporter
pub fn fake_executor(yaml: &str) -> (Executor, FakeLauncher, RecordingReporter) {
    fake_executor_with_secrets(yaml, SecretRegistry::with_builtins())
}

pub fn fake_executor_with_secrets(
    yaml: &str,
    secrets: SecretRegistry,
) -> (Executor, FakeLauncher, RecordingReporter) {
    let launcher = FakeLauncher::new();
    let reporter = RecordingReporter::new();
    let executor = Executor::new(manifest(yaml), Settings::default())
        .with_launcher(Arc::new(launcher.clone()))
        .with_secrets(secrets)
        .with_reporter(reporter.clone());
    (executor, launcher, reporter)
}

/// Build an argument map
pub fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
