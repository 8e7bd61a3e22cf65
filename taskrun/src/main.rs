//! A command-line tool to run a task package's programs against its tests,
//! show the results live and compare the scores to the expected ones.
//!
//! Run it from a package directory (one with a `config.yml`, programs in
//! `prog/`, inputs in `in/` and answers in `out/`).

#![allow(clippy::needless_return)]
#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

mod run;
mod show;

use std::path::PathBuf;

use clap::Parser;
use log::{error, LevelFilter};
use taskjudge::prelude::*;

/// Everything went fine.
const EXIT_OK: i32 = 0;
/// Configuration, checker or I/O trouble.
const EXIT_ERROR: i32 = 1;
/// The scores differ from the expected ones.
const EXIT_MISMATCH: i32 = 2;
/// Some program didn't compile.
const EXIT_COMPILE: i32 = 3;
/// The sandbox reported something it shouldn't have.
const EXIT_SANDBOX: i32 = 4;
/// The user stopped the run.
const EXIT_INTERRUPTED: i32 = 130;

/// The arguments passed to the runner.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
struct Cli {
  /// Output extra/debug info while running.
  #[arg(short = 'v', long = "verbose-log")]
  verbose_log: bool,
  /// The package directory.
  #[arg(short = 'd', long = "package", default_value = ".")]
  package: PathBuf,
  /// Programs to run, as paths or names within prog/. Can be specified more
  /// than once, or comma-separated. If absent, all programs are run.
  #[arg(short = 'p', long = "programs", num_args = 0.., value_delimiter = ',')]
  programs: Vec<PathBuf>,
  /// Tests to run, as paths or names within in/. Can be specified more than
  /// once, or comma-separated. If absent, all tests are run.
  #[arg(short = 't', long = "tests", num_args = 0.., value_delimiter = ',')]
  tests: Vec<PathBuf>,
  /// Overrides the time limit, in seconds.
  #[arg(long = "tl")]
  tl: Option<f64>,
  /// Overrides the memory limit, in megabytes.
  #[arg(long = "ml")]
  ml: Option<f64>,
  /// Number of executions to run at once. Zero means all cores.
  #[arg(short = 'c', long = "cpus")]
  cpus: Option<usize>,
  /// The tool that measures executions.
  #[arg(long = "time-tool", default_value = "sandbox")]
  time_tool: TimeTool,
  /// Path to the time tool's binary, if not the usual one.
  #[arg(long = "sandbox")]
  sandbox: Option<PathBuf>,
  /// The checker, as a source or an executable. If absent, the package's
  /// checker is used if it has one.
  #[arg(long = "checker")]
  checker: Option<PathBuf>,
  /// Where to save the final table. Defaults to cache/run_report.txt.
  #[arg(long = "report")]
  report: Option<PathBuf>,
  /// Saves the computed scores as the expected ones.
  #[arg(short = 'a', long = "apply-suggestions")]
  apply_suggestions: bool,
  /// Shows the result of every test.
  #[arg(long = "verbose")]
  verbose: bool,
  /// Shows the memory of every test (with --verbose).
  #[arg(long = "show-memory")]
  show_memory: bool,
  /// Overrides the contest type of the package.
  #[arg(long = "contest-type")]
  contest_type: Option<ContestType>,
  /// Only validates the subtasks of config.yml, without running the
  /// programs.
  #[arg(long = "validate-subtasks", conflicts_with = "validate_programs")]
  validate_subtasks: bool,
  /// Only runs the programs, without validating the subtasks.
  #[arg(long = "validate-programs")]
  validate_programs: bool,
  /// Where to save the table of the subtask validators.
  #[arg(long = "subtask-report")]
  subtask_report: Option<PathBuf>,
}

fn main() {
  // init cli stuff
  let args = Cli::parse();
  let log_level = if args.verbose_log {
    LevelFilter::Debug
  } else {
    LevelFilter::Info
  };
  env_logger::builder().filter_level(log_level).init();
  let code = match run::run(&args) {
    Ok(code) => code,
    Err(JudgeError::Interrupted) => {
      error!("Stopped by the user.");
      EXIT_INTERRUPTED
    },
    Err(e) => {
      error!("{}", e);
      EXIT_ERROR
    },
  };
  std::process::exit(code);
}
