//! Task execution engine
//!
//! This module handles the execution of tasks: context merging, variable
//! substitution, step dispatch and process launching.

pub mod command;
pub mod context;
pub mod executor;
pub mod interpolate;
pub mod interpreter;
pub mod report;

// Re-export main types
pub use command::{LaunchOutcome, LaunchSpec, ProcessLauncher, SystemLauncher};
pub use context::*;
pub use executor::{merge_args, Executor, TaskCall, TaskDispatch};
pub use interpolate::{substitute, substitute_map, Substitutor};
pub use interpreter::{Interpreter, InterpreterRegistry, StepOutput, StepScope};
pub use report::{ConsoleReporter, Event, RecordingReporter, Reporter, Verbosity};
