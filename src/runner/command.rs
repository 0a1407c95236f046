//! Process launching
//!
//! Interpreters describe the process they need as a `LaunchSpec`; a
//! `ProcessLauncher` runs it, streaming output one line at a time.

use crate::error::{ExecutionError, ExecutionResult};
use crate::runner::context::CancelFlag;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command as StdCommand, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// How often the launcher checks for cancellation and timeouts
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A process to run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,

    /// Variables added to the inherited process environment
    pub env: BTreeMap<String, String>,

    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        LaunchSpec {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn cwd(mut self, dir: PathBuf) -> Self {
        self.cwd = Some(dir);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Exit code, absent when the process was killed by a signal
    pub exit_code: Option<i32>,

    /// Combined stdout and stderr, in arrival order
    pub output: String,
}

impl LaunchOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs processes on behalf of interpreters
pub trait ProcessLauncher {
    /// Run `spec` to completion, calling `on_line` for each output line.
    ///
    /// Fails with `Timeout` or `Cancelled` after killing the process.
    fn launch(
        &self,
        spec: &LaunchSpec,
        cancel: &CancelFlag,
        on_line: &mut dyn FnMut(&str),
    ) -> ExecutionResult<LaunchOutcome>;
}

/// Launches real processes with piped output
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(
        &self,
        spec: &LaunchSpec,
        cancel: &CancelFlag,
        on_line: &mut dyn FnMut(&str),
    ) -> ExecutionResult<LaunchOutcome> {
        let mut command = StdCommand::new(&spec.program);
        command.args(&spec.args);
        command.envs(&spec.env);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group, so a kill reaches every descendant
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| ExecutionError::Launch {
            program: spec.program.clone(),
            reason: e.to_string(),
        })?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let started = Instant::now();
        let mut output = String::new();
        let mut pipes_open = true;

        // The child may close its pipes long before it exits
        let status: ExitStatus = loop {
            if pipes_open {
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(line) => {
                        on_line(&line);
                        output.push_str(&line);
                        output.push('\n');
                    }
                    Err(RecvTimeoutError::Disconnected) => pipes_open = false,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            } else {
                match child.try_wait() {
                    Ok(Some(status)) => break status,
                    Ok(None) => thread::sleep(POLL_INTERVAL),
                    Err(e) => {
                        kill(&mut child, &spec.program);
                        return Err(ExecutionError::Launch {
                            program: spec.program.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            if cancel.is_cancelled() {
                kill(&mut child, &spec.program);
                return Err(ExecutionError::Cancelled);
            }

            if let Some(limit) = spec.timeout {
                if started.elapsed() >= limit {
                    kill(&mut child, &spec.program);
                    return Err(ExecutionError::Timeout(limit));
                }
            }
        };

        for reader in readers {
            let _ = reader.join();
        }

        Ok(LaunchOutcome {
            exit_code: status.code(),
            output,
        })
    }
}

/// Forward lines of a pipe to `tx` until it closes
fn forward_lines<R>(pipe: R, tx: mpsc::Sender<String>) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Kill the child and every process in its group, then reap it
fn kill(child: &mut Child, program: &str) {
    tracing::warn!(program, pid = child.id(), "killing child process group");
    #[cfg(unix)]
    {
        // SAFETY: killpg only sends a signal; the group id is the child's pid
        unsafe {
            libc::killpg(child.id() as libc::pid_t, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}
