//! Main CLI application

use crate::error::{is_cancellation, CastError};
use crate::project::Project;
use crate::runner::{exit_code, Runtime, EXIT_CANCELLED, EXIT_FAILURE, EXIT_SUCCESS};
use crate::ui::{Printer, Verbosity};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use clap_complete::Shell;
use colored::Colorize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("cast")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run tasks and jobs from a castfile")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Path to the castfile")
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
        .subcommand(
            Command::new("run")
                .about("Run one or more tasks and everything they need")
                .arg(
                    Arg::new("targets")
                        .value_name("TASK")
                        .required(true)
                        .num_args(1..),
                )
                .arg(context_arg())
                .arg(
                    Arg::new("args")
                        .value_name("ARGS")
                        .help("Extra arguments passed to the task handlers")
                        .num_args(0..)
                        .last(true),
                ),
        )
        .subcommand(
            Command::new("job")
                .about("Run a job")
                .arg(Arg::new("job").value_name("JOB").required(true))
                .arg(
                    Arg::new("downstream")
                        .long("downstream")
                        .help("Also run every job that needs this one")
                        .action(ArgAction::SetTrue),
                )
                .arg(context_arg()),
        )
        .subcommand(Command::new("list").about("List tasks and jobs"))
        .subcommand(
            Command::new("completion")
                .about("Generate shell completions")
                .arg(
                    Arg::new("shell")
                        .value_name("SHELL")
                        .required(true)
                        .value_parser(value_parser!(Shell)),
                ),
        )
}

fn context_arg() -> Arg {
    Arg::new("context")
        .short('c')
        .long("context")
        .value_name("CONTEXT")
        .help("Execution context (defaults to $CAST_CONTEXT or 'default')")
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

/// Install the tracing subscriber; `RUST_LOG` wins over verbosity
fn init_tracing(verbosity: Verbosity) {
    let default = match verbosity {
        Verbosity::Verbose => "cast=debug",
        _ => "cast=warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Load `.env` from the working directory; a missing file is fine
fn load_dotenv(printer: Printer) {
    if let Err(e) = dotenvy::dotenv() {
        if !is_missing_file(&e) {
            printer.warn(&format!("failed to load .env: {}", e));
        }
    }
}

fn is_missing_file(err: &dotenvy::Error) -> bool {
    matches!(err, dotenvy::Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
}

fn load_project(matches: &ArgMatches, printer: Printer) -> Result<Project, CastError> {
    let project = match matches.get_one::<PathBuf>("file") {
        Some(path) => Project::load(path)?,
        None => Project::discover(&std::env::current_dir()?)?,
    };
    Ok(project.with_runtime(Arc::new(Runtime::new(printer))))
}

fn strings(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn run_command(matches: &ArgMatches, printer: Printer) -> Result<i32, CastError> {
    let targets = strings(matches, "targets");
    let args = strings(matches, "args");

    let mut project = load_project(matches, printer)?;
    if let Some(context) = matches.get_one::<String>("context") {
        project = project.with_context(context.clone());
    }

    let results = project.run_tasks(&targets, &args)?;
    Ok(exit_code(&results))
}

fn job_command(matches: &ArgMatches, printer: Printer) -> Result<i32, CastError> {
    let id = matches
        .get_one::<String>("job")
        .cloned()
        .unwrap_or_default();
    let downstream = matches.get_flag("downstream");

    let mut project = load_project(matches, printer)?;
    if let Some(context) = matches.get_one::<String>("context") {
        project = project.with_context(context.clone());
    }

    match project.run_job(&id, downstream) {
        Ok(results) => Ok(exit_code(&results)),
        Err(CastError::Execution(e)) => {
            printer.error(&e.to_string());
            Ok(if is_cancellation(&e) {
                EXIT_CANCELLED
            } else {
                EXIT_FAILURE
            })
        }
        Err(e) => Err(e),
    }
}

fn list_command(matches: &ArgMatches, printer: Printer) -> Result<i32, CastError> {
    let project = load_project(matches, printer)?;

    let width = project
        .tasks()
        .iter()
        .map(|t| t.id.len())
        .chain(project.jobs().iter().map(|j| j.id.len()))
        .max()
        .unwrap_or(0);

    println!("{}", "Tasks:".bold());
    for task in project.tasks().iter() {
        println!(
            "  {:width$}  {}",
            task.id,
            task.desc.as_deref().unwrap_or_default(),
            width = width
        );
    }

    if !project.jobs().is_empty() {
        println!("{}", "Jobs:".bold());
        for job in project.jobs().iter() {
            println!(
                "  {:width$}  {}",
                job.id,
                job.desc.as_deref().unwrap_or_default(),
                width = width
            );
        }
    }

    Ok(EXIT_SUCCESS)
}

fn completion_command(matches: &ArgMatches) -> i32 {
    if let Some(shell) = matches.get_one::<Shell>("shell").copied() {
        let mut cmd = build_command();
        clap_complete::generate(shell, &mut cmd, "cast", &mut io::stdout());
    }
    EXIT_SUCCESS
}

/// Run the CLI with the process arguments and return the exit code
pub fn run() -> anyhow::Result<i32> {
    run_from(std::env::args_os())
}

/// Run the CLI with explicit arguments
pub fn run_from<I, T>(args: I) -> anyhow::Result<i32>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = build_command().try_get_matches_from(args)?;
    let verbosity = get_verbosity(&matches);
    let printer = Printer::new(verbosity);
    load_dotenv(printer);
    init_tracing(verbosity);

    let code = match matches.subcommand() {
        Some(("run", sub)) => run_command(sub, printer)?,
        Some(("job", sub)) => job_command(sub, printer)?,
        Some(("list", sub)) => list_command(sub, printer)?,
        Some(("completion", sub)) => completion_command(sub),
        _ => EXIT_SUCCESS,
    };

    Ok(code)
}
