//! Core manifest types
//!
//! This module defines the data structures that represent a runbook manifest.

use crate::manifest::step::Step;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Top-level manifest structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Manifest {
    /// Document format version
    #[serde(default)]
    pub version: String,

    /// Other manifests whose tasks are merged into this one, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,

    /// Global environment shared by every task
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Secret vaults, in declaration order
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_vaults",
        serialize_with = "serialize_vaults"
    )]
    pub vaults: Vec<VaultConfig>,

    /// Tasks defined in the manifest
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
}

impl Manifest {
    /// Look up a task by name
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// Merge tasks from an imported manifest. Names already present win.
    ///
    /// Returns the names of the tasks that were added.
    pub fn merge_imported(&mut self, imported: Manifest) -> Vec<String> {
        let mut added = Vec::new();
        for (name, task) in imported.tasks {
            if !self.tasks.contains_key(&name) {
                added.push(name.clone());
                self.tasks.insert(name, task);
            }
        }
        added
    }
}

/// A task definition
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Task {
    /// Description for listings and progress output
    #[serde(default, alias = "description")]
    pub desc: String,

    /// Declared arguments, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<TaskArg>,

    /// Task-local environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Steps to execute, in order
    #[serde(default)]
    pub cmds: Vec<Step>,
}

/// A declared task argument
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaskArg {
    pub name: String,

    /// Argument type tag
    #[serde(rename = "type", default)]
    pub arg_type: ArgType,

    /// Default value, used when neither the caller nor a calling task supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// The caller must supply a value
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
}

impl TaskArg {
    /// The default value rendered as a string
    pub fn default_string(&self) -> Option<String> {
        self.default.as_ref().map(value_to_string)
    }
}

/// Argument type tags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    #[default]
    String,
    Number,
    Bool,
    #[serde(alias = "[]")]
    List,
}

impl ArgType {
    /// Check that a supplied string is acceptable for this type
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            ArgType::String | ArgType::List => true,
            ArgType::Number => value.trim().parse::<f64>().is_ok(),
            ArgType::Bool => matches!(value, "true" | "false"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Number => "number",
            ArgType::Bool => "bool",
            ArgType::List => "list",
        }
    }
}

/// A configured secret vault
#[derive(Debug, Clone, PartialEq)]
pub struct VaultConfig {
    /// Provider kind (the key under `vaults`)
    pub provider: String,

    /// Vault identifier understood by the provider
    pub vault: String,

    /// Target environment variable name -> remote secret name
    pub secrets: BTreeMap<String, String>,
}

/// Body of a vault entry as written in the document
#[derive(Debug, Clone, Deserialize, Serialize)]
struct VaultEntry {
    #[serde(alias = "keyvault_name")]
    vault: String,

    #[serde(default)]
    secrets: BTreeMap<String, String>,
}

/// One vault entry or a list of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VaultEntries {
    One(VaultEntry),
    Many(Vec<VaultEntry>),
}

/// Deserialize vaults keeping the declaration order of the document
fn deserialize_vaults<'de, D>(deserializer: D) -> Result<Vec<VaultConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;

    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        Value::Null => return Ok(Vec::new()),
        _ => return Err(D::Error::custom("vaults must be a mapping of provider to config")),
    };

    let mut vaults = Vec::new();
    for (key, entries) in mapping {
        let provider = key
            .as_str()
            .ok_or_else(|| D::Error::custom("vault provider names must be strings"))?
            .to_string();

        let entries = match VaultEntries::deserialize(entries).map_err(D::Error::custom)? {
            VaultEntries::One(entry) => vec![entry],
            VaultEntries::Many(entries) => entries,
        };

        for entry in entries {
            vaults.push(VaultConfig {
                provider: provider.clone(),
                vault: entry.vault,
                secrets: entry.secrets,
            });
        }
    }
    Ok(vaults)
}

/// Serialize vaults grouped by provider, in order of first appearance
fn serialize_vaults<S>(vaults: &[VaultConfig], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut groups: Vec<(&str, Vec<VaultEntry>)> = Vec::new();
    for vault in vaults {
        let entry = VaultEntry {
            vault: vault.vault.clone(),
            secrets: vault.secrets.clone(),
        };
        match groups.iter().position(|(provider, _)| *provider == vault.provider) {
            Some(index) => groups[index].1.push(entry),
            None => groups.push((vault.provider.as_str(), vec![entry])),
        }
    }

    let mut map = serializer.serialize_map(Some(groups.len()))?;
    for (provider, entries) in &groups {
        map.serialize_entry(provider, entries)?;
    }
    map.end()
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Render a YAML scalar (or collection) as the string handed to substitution
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Sequence(items) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Tagged(tagged) => value_to_string(&tagged.value),
        Value::Mapping(_) => serde_yaml::to_string(value)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
