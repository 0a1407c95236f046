//! Main CLI application

use crate::manifest::{find_manifest, DefaultFetcher, Manifest, ManifestLoader};
use crate::runner::{ConsoleReporter, Executor, Verbosity};
use crate::settings::Settings;
use anyhow::{bail, Context as _};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use colored::Colorize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("runbook")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A declarative YAML task runner")
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the manifest (default: discovered from the working directory)")
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only print command output and errors")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Print no output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECS")
                .value_parser(value_parser!(u64))
                .help("Default step timeout in seconds (0 disables)")
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Run a task")
                .arg(
                    Arg::new("task")
                        .value_name("TASK")
                        .required(true)
                        .help("Name of the task to run"),
                )
                .arg(
                    Arg::new("args")
                        .value_name("KEY=VALUE")
                        .num_args(0..)
                        .help("Task arguments"),
                ),
        )
        .subcommand(Command::new("list").about("List the tasks of the manifest"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(
                    Arg::new("shell")
                        .value_name("SHELL")
                        .required(true)
                        .value_parser(value_parser!(Shell)),
                ),
        )
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

/// Initialise logging to stderr.
///
/// `RUNBOOK_LOG` (then `RUST_LOG`) selects the filter; `--verbose` forces debug.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("runbook=debug")
    } else {
        EnvFilter::try_from_env("RUNBOOK_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("runbook=warn"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

/// Parse `key=value` task arguments
pub fn parse_task_args<S: AsRef<str>>(values: &[S]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut args = BTreeMap::new();
    for value in values {
        let value = value.as_ref();
        match value.split_once('=') {
            Some((key, val)) if !key.trim().is_empty() => {
                args.insert(key.trim().to_string(), val.to_string());
            }
            _ => bail!("Invalid task argument '{}', expected KEY=VALUE", value),
        }
    }
    Ok(args)
}

/// Load the manifest named by `--file`, or discover one
fn load_manifest(matches: &ArgMatches, settings: &Settings) -> anyhow::Result<(Manifest, PathBuf)> {
    let path = match matches.get_one::<PathBuf>("file") {
        Some(path) => path.clone(),
        None => find_manifest()?,
    };

    let loader = ManifestLoader::with_fetcher(DefaultFetcher::new(settings.http_timeout())?);
    let manifest = loader
        .load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    Ok((manifest, path))
}

/// Cancel `cancel` on the first SIGINT.
///
/// Steps run in their own process group, so the terminal's interrupt only
/// reaches runbook; the launcher then kills the running group.
#[cfg(unix)]
fn cancel_on_interrupt(cancel: crate::runner::CancelFlag) {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    static INTERRUPTED: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_interrupt(_signal: libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    // SAFETY: the handler only stores to an atomic
    unsafe {
        libc::signal(
            libc::SIGINT,
            on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }

    thread::spawn(move || {
        while !INTERRUPTED.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(50));
        }
        tracing::debug!("interrupted, cancelling run");
        cancel.cancel();
    });
}

fn list_tasks(manifest: &Manifest) {
    let width = manifest.tasks.keys().map(|n| n.len()).max().unwrap_or(0);
    for (name, task) in &manifest.tasks {
        if task.desc.is_empty() {
            println!("{}", name.bold());
        } else {
            let padded = format!("{:width$}", name, width = width);
            println!("{}  {}", padded.bold(), task.desc);
        }
    }
}

/// Run the CLI application with process arguments
pub fn run() -> anyhow::Result<()> {
    run_from(std::env::args_os())
}

/// Run the CLI application with provided arguments
pub fn run_from<I, T>(args: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut command = build_command();
    let matches = command.clone().get_matches_from(args);

    let verbosity = get_verbosity(&matches);
    init_tracing(verbosity == Verbosity::Verbose);

    let (name, sub_matches) = match matches.subcommand() {
        Some(subcommand) => subcommand,
        None => {
            command.print_help()?;
            println!();
            return Ok(());
        }
    };

    if name == "completions" {
        if let Some(shell) = sub_matches.get_one::<Shell>("shell") {
            clap_complete::generate(*shell, &mut command, "runbook", &mut io::stdout());
        }
        return Ok(());
    }

    let mut settings = Settings::load()?;
    if let Some(secs) = matches.get_one::<u64>("timeout") {
        settings.set_timeout(*secs);
    }

    let (manifest, path) = load_manifest(&matches, &settings)?;
    tracing::debug!(manifest = %path.display(), tasks = manifest.tasks.len(), "manifest loaded");

    match name {
        "list" => {
            list_tasks(&manifest);
            Ok(())
        }
        "run" => {
            let task = sub_matches
                .get_one::<String>("task")
                .context("No task given")?;
            let values: Vec<String> = sub_matches
                .get_many::<String>("args")
                .map(|values| values.cloned().collect())
                .unwrap_or_default();
            let args = parse_task_args(&values)?;

            let executor = Executor::new(manifest, settings)
                .with_reporter(ConsoleReporter::new(verbosity));
            #[cfg(unix)]
            cancel_on_interrupt(executor.cancel_flag());
            executor.run(task, args)?;
            Ok(())
        }
        other => bail!("Unknown command '{}'", other),
    }
}
