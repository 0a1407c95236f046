//! Variable substitution
//!
//! `${NAME}` resolves against a task context (environment, then secrets, then
//! arguments). `$${NAME}` yields the literal text `${NAME}`. Resolved values
//! are themselves expanded, so `${A}` with `A="${B}"` yields the value of `B`.
//! Values from secret providers are opaque and never expanded.

use crate::error::{SubstitutionError, SubstitutionResult};
use crate::manifest::{ContainerStep, ScriptStep, ShellStep, Step};
use crate::runner::context::TaskContext;
use std::collections::{BTreeMap, HashMap};

/// Default bound on nested resolution
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// A piece of parsed text
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    /// Text produced by `$${...}`, emitted without its leading `$`
    Escaped(&'a str),
    Variable(&'a str),
}

/// Split text into literal runs, escapes and variable references
fn parse(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find('$') {
        let after = &rest[start..];

        if let Some(body) = after.strip_prefix("$${") {
            if let Some(end) = body.find('}') {
                segments.push(Segment::Literal(&rest[..start]));
                // `${NAME}` without the escaping dollar
                segments.push(Segment::Escaped(&after[1..end + 4]));
                rest = &body[end + 1..];
                continue;
            }
        } else if let Some(body) = after.strip_prefix("${") {
            if let Some(end) = body.find('}') {
                let name = &body[..end];
                if !name.is_empty() {
                    segments.push(Segment::Literal(&rest[..start]));
                    segments.push(Segment::Variable(name));
                    rest = &body[end + 1..];
                    continue;
                }
            }
        }

        // A lone `$` (or an unterminated or empty reference) is literal
        let skip = if after.starts_with("$$") { 2 } else { 1 };
        segments.push(Segment::Literal(&rest[..start + skip]));
        rest = &rest[start + skip..];
    }

    segments.push(Segment::Literal(rest));
    segments.retain(|s| !matches!(s, Segment::Literal("")));
    segments
}

/// Expands variable references against one task context
pub struct Substitutor<'a> {
    ctx: &'a TaskContext,
    max_depth: usize,
}

/// Working state of one expansion
#[derive(Default)]
struct Expansion {
    in_progress: Vec<String>,
    resolved: HashMap<String, String>,
    first_missing: Option<String>,
}

impl<'a> Substitutor<'a> {
    pub fn new(ctx: &'a TaskContext) -> Self {
        Self::with_max_depth(ctx, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(ctx: &'a TaskContext, max_depth: usize) -> Self {
        Substitutor { ctx, max_depth }
    }

    /// Expand every reference in `text`
    pub fn substitute(&self, text: &str) -> SubstitutionResult<String> {
        let mut state = Expansion::default();
        let output = self.expand(text, &mut state)?;

        match state.first_missing {
            Some(name) => Err(SubstitutionError::UndefinedVariable(name)),
            None => Ok(output),
        }
    }

    /// Expand every value of a map independently
    pub fn substitute_map(
        &self,
        map: &BTreeMap<String, String>,
    ) -> SubstitutionResult<BTreeMap<String, String>> {
        map.iter()
            .map(|(name, value)| Ok((name.clone(), self.substitute(value)?)))
            .collect()
    }

    /// Expand a list of strings
    pub fn substitute_list(&self, list: &[String]) -> SubstitutionResult<Vec<String>> {
        list.iter().map(|s| self.substitute(s)).collect()
    }

    /// Expand every text field of a step. Task references are left as written.
    pub fn substitute_step(&self, step: &Step) -> SubstitutionResult<Step> {
        Ok(match step {
            Step::Shell(shell) => Step::Shell(ShellStep {
                command: self.substitute(&shell.command)?,
                timeout: shell.timeout,
                dir: shell
                    .dir
                    .as_deref()
                    .map(|d| self.substitute(d))
                    .transpose()?,
            }),
            Step::SubTask { name } => Step::SubTask { name: name.clone() },
            Step::UsesSubTask { name, args } => Step::UsesSubTask {
                name: name.clone(),
                args: self.substitute_map(args)?,
            },
            Step::Container(container) => Step::Container(ContainerStep {
                image: self.substitute(&container.image)?,
                command: self.substitute_list(&container.command)?,
                env: self.substitute_map(&container.env)?,
                volumes: container
                    .volumes
                    .iter()
                    .map(|(host, target)| Ok((self.substitute(host)?, self.substitute(target)?)))
                    .collect::<SubstitutionResult<_>>()?,
                network: container
                    .network
                    .as_deref()
                    .map(|n| self.substitute(n))
                    .transpose()?,
                timeout: container.timeout,
            }),
            Step::Script(script) => Step::Script(ScriptStep {
                runtime: self.substitute(&script.runtime)?,
                body: self.substitute(&script.body)?,
                args: self.substitute_list(&script.args)?,
                timeout: script.timeout,
            }),
        })
    }

    fn expand(&self, text: &str, state: &mut Expansion) -> SubstitutionResult<String> {
        let mut output = String::with_capacity(text.len());
        for segment in parse(text) {
            match segment {
                Segment::Literal(s) | Segment::Escaped(s) => output.push_str(s),
                Segment::Variable(name) => output.push_str(&self.resolve(name, state)?),
            }
        }
        Ok(output)
    }

    fn resolve(&self, name: &str, state: &mut Expansion) -> SubstitutionResult<String> {
        if let Some(value) = state.resolved.get(name) {
            return Ok(value.clone());
        }

        if state.in_progress.iter().any(|n| n == name) || state.in_progress.len() >= self.max_depth
        {
            return Err(SubstitutionError::Cycle(name.to_string()));
        }

        let raw = match self.ctx.lookup(name) {
            Some(raw) => raw,
            None => {
                state.first_missing.get_or_insert_with(|| name.to_string());
                return Ok(format!("${{{}}}", name));
            }
        };

        if self.ctx.is_secret(name) {
            return Ok(raw.to_string());
        }

        state.in_progress.push(name.to_string());
        let value = self.expand(raw, state);
        state.in_progress.pop();

        let value = value?;
        state.resolved.insert(name.to_string(), value.clone());
        Ok(value)
    }
}

/// Expand `text` against `ctx` with the default depth bound
pub fn substitute(text: &str, ctx: &TaskContext) -> SubstitutionResult<String> {
    Substitutor::new(ctx).substitute(text)
}

/// Expand every value of `map` against `ctx`
pub fn substitute_map(
    map: &BTreeMap<String, String>,
    ctx: &TaskContext,
) -> SubstitutionResult<BTreeMap<String, String>> {
    Substitutor::new(ctx).substitute_map(map)
}
