//! Progress reporting
//!
//! The executor reports through a `Reporter`. Everything it passes in has
//! already been masked.

use colored::Colorize;
use std::sync::{Arc, Mutex};

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    Silent = 0,
    Quiet = 1,
    #[default]
    Normal = 2,
    Verbose = 3,
}

/// Receives progress events from the executor
pub trait Reporter {
    /// A task was entered
    fn task_started(&self, name: &str, desc: &str);

    /// A step is about to run, e.g. `[2.1/3] $ make`
    fn step(&self, label: &str, line: &str);

    /// One line of process output
    fn output(&self, line: &str);

    /// A task completed successfully
    fn task_finished(&self, name: &str);
}

/// Writes progress to stderr and process output to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter {
    verbosity: Verbosity,
}

impl ConsoleReporter {
    pub fn new(verbosity: Verbosity) -> Self {
        ConsoleReporter { verbosity }
    }
}

impl Reporter for ConsoleReporter {
    fn task_started(&self, name: &str, desc: &str) {
        if self.verbosity >= Verbosity::Verbose {
            if desc.is_empty() {
                eprintln!("{} {}", "Running task:".bold(), name.cyan());
            } else {
                eprintln!("{} {} ({})", "Running task:".bold(), name.cyan(), desc.dimmed());
            }
        }
    }

    fn step(&self, label: &str, line: &str) {
        if self.verbosity >= Verbosity::Normal {
            eprintln!("{} {}", format!("[{}]", label).green(), line);
        }
    }

    fn output(&self, line: &str) {
        if self.verbosity >= Verbosity::Quiet {
            println!("{}", line);
        }
    }

    fn task_finished(&self, name: &str) {
        if self.verbosity >= Verbosity::Verbose {
            eprintln!("{} {}", "Finished task:".bold(), name.cyan());
        }
    }
}

/// An event seen by a `RecordingReporter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TaskStarted(String),
    Step { label: String, line: String },
    Output(String),
    TaskFinished(String),
}

/// Keeps every event in memory. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Output lines only
    pub fn output(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Output(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    /// Step lines as `[label] line`
    pub fn steps(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Step { label, line } => Some(format!("[{}] {}", label, line)),
                _ => None,
            })
            .collect()
    }

    /// Names of tasks in the order they were entered
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::TaskStarted(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Reporter for RecordingReporter {
    fn task_started(&self, name: &str, _desc: &str) {
        self.record(Event::TaskStarted(name.to_string()));
    }

    fn step(&self, label: &str, line: &str) {
        self.record(Event::Step {
            label: label.to_string(),
            line: line.to_string(),
        });
    }

    fn output(&self, line: &str) {
        self.record(Event::Output(line.to_string()));
    }

    fn task_finished(&self, name: &str) {
        self.record(Event::TaskFinished(name.to_string()));
    }
}
