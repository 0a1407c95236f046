//! Task steps
//!
//! A step is written either as a bare string (a shell command) or as a mapping:
//! `{task: name}`, `{uses: name, args: {...}}`, or an explicit
//! `{type: ..., content: {...}}` pair for shell, container and script steps.

use crate::manifest::types::value_to_string;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// One unit of work within a task
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A command run through the shell
    Shell(ShellStep),

    /// Run another task with this task's arguments
    SubTask { name: String },

    /// Run another task with explicit argument overrides
    UsesSubTask {
        name: String,
        args: BTreeMap<String, String>,
    },

    /// A container invocation
    Container(ContainerStep),

    /// Inline source run by a language runtime
    Script(ScriptStep),
}

/// The kind of a step, used to pick an interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Shell,
    SubTask,
    UsesSubTask,
    Container,
    Script,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Shell => "shell",
            StepKind::SubTask => "task",
            StepKind::UsesSubTask => "uses",
            StepKind::Container => "container",
            StepKind::Script => "script",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shell command details
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ShellStep {
    pub command: String,

    /// Timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Working directory for the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl ShellStep {
    pub fn new(command: impl Into<String>) -> Self {
        ShellStep {
            command: command.into(),
            timeout: None,
            dir: None,
        }
    }
}

/// Container invocation details
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ContainerStep {
    pub image: String,

    /// Command and arguments passed after the image
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_command"
    )]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Host path -> container path
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Embedded script details
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScriptStep {
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Inline source
    #[serde(alias = "script")]
    pub body: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

fn default_runtime() -> String {
    "python3".to_string()
}

impl Step {
    /// Shorthand for a plain shell step
    pub fn shell(command: impl Into<String>) -> Self {
        Step::Shell(ShellStep::new(command))
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Step::Shell(_) => StepKind::Shell,
            Step::SubTask { .. } => StepKind::SubTask,
            Step::UsesSubTask { .. } => StepKind::UsesSubTask,
            Step::Container(_) => StepKind::Container,
            Step::Script(_) => StepKind::Script,
        }
    }

    /// Per-step timeout, if declared
    pub fn timeout(&self) -> Option<Duration> {
        let secs = match self {
            Step::Shell(shell) => shell.timeout,
            Step::Container(container) => container.timeout,
            Step::Script(script) => script.timeout,
            Step::SubTask { .. } | Step::UsesSubTask { .. } => None,
        };
        secs.map(Duration::from_secs)
    }

    /// Build a step from its document form
    pub fn from_value(value: Value) -> Result<Step, String> {
        match value {
            Value::String(command) => Ok(Step::shell(command)),
            Value::Mapping(mapping) => Self::from_mapping(mapping),
            other => Err(format!(
                "step must be a string or a mapping, found {}",
                describe_value(&other)
            )),
        }
    }

    fn from_mapping(mapping: Mapping) -> Result<Step, String> {
        if let Some(name) = mapping.get("task") {
            let name = name
                .as_str()
                .ok_or_else(|| "'task' must name a task".to_string())?;
            return Ok(Step::SubTask {
                name: name.to_string(),
            });
        }

        if let Some(name) = mapping.get("uses") {
            let name = name
                .as_str()
                .ok_or_else(|| "'uses' must name a task".to_string())?;
            let args = match mapping.get("args") {
                None | Some(Value::Null) => BTreeMap::new(),
                Some(Value::Mapping(args)) => args
                    .iter()
                    .map(|(k, v)| (value_to_string(k), value_to_string(v)))
                    .collect(),
                Some(_) => return Err(format!("'args' of uses: {name} must be a mapping")),
            };
            return Ok(Step::UsesSubTask {
                name: name.to_string(),
                args,
            });
        }

        let step_type = mapping
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| "step mapping needs 'task', 'uses' or 'type'".to_string())?;
        let content = mapping.get("content").cloned().unwrap_or(Value::Null);

        match step_type {
            "shell" | "bash" => serde_yaml::from_value(content)
                .map(Step::Shell)
                .map_err(|e| format!("invalid shell step: {}", e)),
            "container" | "docker" => serde_yaml::from_value(content)
                .map(Step::Container)
                .map_err(|e| format!("invalid container step: {}", e)),
            "script" | "python" => serde_yaml::from_value(content)
                .map(Step::Script)
                .map_err(|e| format!("invalid script step: {}", e)),
            other => Err(format!("unknown step type '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Step::from_value(value).map_err(D::Error::custom)
    }
}

impl Serialize for Step {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Step::Shell(shell) if shell.timeout.is_none() && shell.dir.is_none() => {
                serializer.serialize_str(&shell.command)
            }
            Step::Shell(shell) => typed(serializer, "shell", shell),
            Step::SubTask { name } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("task", name)?;
                map.end()
            }
            Step::UsesSubTask { name, args } => {
                let len = if args.is_empty() { 1 } else { 2 };
                let mut map = serializer.serialize_map(Some(len))?;
                map.serialize_entry("uses", name)?;
                if !args.is_empty() {
                    map.serialize_entry("args", args)?;
                }
                map.end()
            }
            Step::Container(container) => typed(serializer, "container", container),
            Step::Script(script) => typed(serializer, "script", script),
        }
    }
}

fn typed<S, T>(serializer: S, step_type: &str, content: &T) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    let mut map = serializer.serialize_map(Some(2))?;
    map.serialize_entry("type", step_type)?;
    map.serialize_entry("content", content)?;
    map.end()
}

/// Container commands may be a list or a single shell-quoted string
fn deserialize_command<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;

    match value {
        Value::String(s) => shell_words::split(&s).map_err(D::Error::custom),
        Value::Sequence(items) => Ok(items.iter().map(value_to_string).collect()),
        Value::Null => Ok(Vec::new()),
        _ => Err(D::Error::custom("command must be a string or a list")),
    }
}

fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
