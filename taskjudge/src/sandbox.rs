//! This module implements the sandbox adapters: they run one program on one
//! test under a hard deadline, through an external measuring tool, and turn
//! what the tool reports into an `ExecutionResult`.
//!
//! The adapters don't judge output correctness; that's the checker's job, and
//! only happens if the result here is still OK.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::context::Limits;
use crate::errors::JudgeError;
use crate::interrupt::CancelToken;
use crate::process::*;
use crate::util::{parse_memory_kb, parse_time_ms};
use crate::verdict::{ExecutionResult, Status};

/// The raw wait status a timeout wrapper's SIGKILL shows up as (exit code
/// 137, shifted). Always means a timeout.
pub const TIMEOUT_WAIT_STATUS: u32 = 35072;

/// The hard deadline is this many times the time limit.
pub const HARD_DEADLINE_FACTOR: u64 = 2;

/// Computes the hard kill deadline for a time limit in milliseconds.
pub fn hard_deadline(time_limit: u64) -> Duration {
  return Duration::from_millis(HARD_DEADLINE_FACTOR.saturating_mul(time_limit));
}

/// One execution to perform.
#[derive(Clone, Debug)]
pub struct RunRequest<'a> {
  /// The program's executable.
  pub executable: &'a Path,
  /// The test's input, fed to standard input.
  pub input: &'a Path,
  /// Where the program's standard output goes.
  pub output: &'a Path,
  /// Where the measuring tool's report goes. The reporting sandbox also
  /// writes the program's stderr here.
  pub report: &'a Path,
  /// The limits to run under.
  pub limits: Limits,
}

/// Something that can run a program in a measured, limited environment.
pub trait Sandbox: Send + Sync {
  /// Runs a program on a test. Only errors out if the run can't go on (e.g.
  /// cancellation); everything the program does wrong is in the result.
  fn run(
    &self,
    request: &RunRequest,
    cancel: &CancelToken,
  ) -> Result<ExecutionResult, JudgeError>;
}

/// How a sandboxed process ended, as far as the adapter can tell.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SandboxExit {
  /// The sandbox exited; its raw wait status if known.
  Finished(Option<u32>),
  /// The hard deadline passed and the process group was killed.
  DeadlineExceeded,
}

impl From<WaitOutcome> for SandboxExit {
  fn from(value: WaitOutcome) -> Self {
    return match value {
      WaitOutcome::Exited(status) => Self::Finished(raw_wait_status(&status)),
      WaitOutcome::DeadlineExceeded => Self::DeadlineExceeded,
    };
  }
}

impl SandboxExit {
  /// Whether this exit means the program ran out of time.
  pub fn is_timeout(&self) -> bool {
    return match self {
      Self::Finished(raw) => *raw == Some(TIMEOUT_WAIT_STATUS),
      Self::DeadlineExceeded => true,
    };
  }
}

/// Parses a `key: value` report, one pair per line. Lines without the
/// separator are ignored; later keys win.
pub fn parse_report(text: &str) -> BTreeMap<String, String> {
  return text
    .lines()
    .filter_map(|line| line.trim().split_once(": "))
    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
    .collect();
}

/// Downgrades an OK result to TL or ML when the measurements exceed the
/// limits, whether or not the measuring tool noticed.
pub fn apply_limits(mut result: ExecutionResult, limits: Limits) -> ExecutionResult {
  if result.status != Status::Accepted {
    return result;
  }
  if result.time.is_some_and(|t| t > limits.time_limit) {
    result.status = Status::TimeLimit;
  } else if result.memory.is_some_and(|m| m > limits.memory_limit) {
    result.status = Status::MemoryLimit;
  }
  return result;
}

/// Maps the status field of a sandbox report to a status. Only the first two
/// letters matter ("TLE" is TL). Anything unknown is a runtime error.
fn status_from_report(raw: &str) -> Status {
  let code: String = raw.chars().take(2).collect();
  return match code.parse::<Status>() {
    Ok(
      st @ (Status::Accepted
      | Status::TimeLimit
      | Status::MemoryLimit
      | Status::RuntimeError),
    ) => st,
    _ => Status::RuntimeError,
  };
}

/// Turns a sandbox's exit and its report into a result. OK is provisional:
/// the measurements are checked against the limits.
pub fn interpret_report(
  exit: SandboxExit,
  report: &BTreeMap<String, String>,
  limits: Limits,
) -> ExecutionResult {
  if exit.is_timeout() {
    return ExecutionResult::with_status(Status::TimeLimit);
  }
  let mut result = ExecutionResult::with_status(Status::RuntimeError);
  result.time = report.get("Time").and_then(|t| parse_time_ms(t));
  result.memory = report.get("Memory").and_then(|m| parse_memory_kb(m));
  match report.get("Status") {
    None => {
      return result.with_error("the sandbox reported no status");
    },
    Some(raw) => {
      result.status = status_from_report(raw);
      if result.status == Status::RuntimeError && !raw.starts_with("RE") {
        result.error = Some(format!("the sandbox reported status {}", raw));
      }
    },
  };
  return apply_limits(result, limits);
}

/// Parses the output of GNU time with format "%U\n%M\n%x": user seconds,
/// peak resident kilobytes and exit code. Anything time prints before those
/// (like "Command exited with non-zero status") is skipped.
pub fn parse_time_output(text: &str) -> Option<(u64, u64, i32)> {
  let lines: Vec<&str> = text
    .lines()
    .map(|l| l.trim())
    .filter(|l| !l.is_empty())
    .collect();
  if lines.len() < 3 {
    return None;
  }
  let last = &lines[lines.len() - 3..];
  let seconds: f64 = last[0].parse().ok()?;
  let memory: u64 = last[1].parse().ok()?;
  let code: i32 = last[2].parse().ok()?;
  return Some(((seconds * 1000.0).round() as u64, memory, code));
}

/// What GNU time writes before its format when the command dies by a signal.
const TERMINATED_BY_SIGNAL: &str = "Command terminated by signal";

/// Turns GNU time's exit and output into a result. `%x` is 0 for a command
/// killed by a signal, so the signal line and time's own exit status count
/// too.
pub fn interpret_time_output(
  exit: SandboxExit,
  text: &str,
  limits: Limits,
) -> ExecutionResult {
  if exit.is_timeout() {
    return ExecutionResult::with_status(Status::TimeLimit);
  }
  let (time, memory, code) = match parse_time_output(text) {
    Some(parsed) => parsed,
    None => {
      return ExecutionResult::with_status(Status::RuntimeError)
        .with_error("could not parse the output of time");
    },
  };
  let signalled = text
    .lines()
    .any(|l| l.trim_start().starts_with(TERMINATED_BY_SIGNAL));
  let wrapper = match exit {
    SandboxExit::Finished(Some(raw)) => raw,
    _ => 0,
  };
  let mut result = ExecutionResult::with_status(Status::Accepted);
  result.time = Some(time);
  result.memory = Some(memory);
  if code != 0 || signalled {
    result.status = Status::RuntimeError;
  } else if wrapper != 0 {
    result.status = Status::RuntimeError;
    result.error = Some(format!(
      "time exited with wait status {} but reported exit code 0",
      wrapper
    ));
  }
  return apply_limits(result, limits);
}

/// Opens the files of a request for a child's standard streams.
fn open_streams(request: &RunRequest) -> Result<(File, File, File), JudgeError> {
  return Ok((
    File::open(request.input)?,
    File::create(request.output)?,
    File::create(request.report)?,
  ));
}

/// Reads a report file, tolerating garbage bytes.
fn read_report(path: &Path) -> Result<String, JudgeError> {
  let bytes = std::fs::read(path)?;
  return Ok(String::from_utf8_lossy(&bytes).into_owned());
}

/// A sandbox binary that wraps the program and writes a `key: value` report
/// to its standard error. It's told the memory limit through `MEM_LIMIT`.
#[derive(Clone, Debug)]
pub struct ReportingSandbox {
  /// The command that starts the sandbox; the executable is appended.
  pub command: Vec<OsString>,
}

impl ReportingSandbox {
  /// A sandbox started by running the given binary directly.
  pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
    return Self { command: vec![binary.into().into_os_string()] };
  }
}

impl Sandbox for ReportingSandbox {
  fn run(
    &self,
    request: &RunRequest,
    cancel: &CancelToken,
  ) -> Result<ExecutionResult, JudgeError> {
    let (stdin, stdout, stderr) = open_streams(request)?;
    let mut argv = self.command.clone();
    argv.push(request.executable.as_os_str().to_owned());
    let env = vec![
      (
        OsString::from("MEM_LIMIT"),
        OsString::from(format!("{}K", request.limits.memory_limit)),
      ),
      (OsString::from("MEASURE_MEM"), OsString::from("true")),
    ];
    let invocation = Invocation { argv, env, stdin, stdout, stderr };
    let deadline = hard_deadline(request.limits.time_limit);
    let exit: SandboxExit =
      run_with_deadline(invocation, deadline, cancel)?.into();
    let report = parse_report(&read_report(request.report)?);
    debug!(
      "Sandbox exit {:?} for {}: {:?}",
      exit,
      request.executable.display(),
      report
    );
    return Ok(interpret_report(exit, &report, request.limits));
  }
}

/// Measures with GNU time, limiting memory through the shell's `ulimit -v`.
#[derive(Clone, Debug)]
pub struct TimeSandbox {
  /// Path to GNU time.
  pub time_binary: PathBuf,
}

impl Sandbox for TimeSandbox {
  fn run(
    &self,
    request: &RunRequest,
    cancel: &CancelToken,
  ) -> Result<ExecutionResult, JudgeError> {
    let stdin = File::open(request.input)?;
    let stdout = File::create(request.output)?;
    // time reopens the report itself; the program's stderr goes elsewhere
    let stderr = File::create(request.report.with_extension("err"))?;
    File::create(request.report)?;
    let script = format!("ulimit -v {}; exec \"$@\"", request.limits.memory_limit);
    let argv: Vec<OsString> = vec![
      "sh".into(),
      "-c".into(),
      script.into(),
      "sh".into(),
      self.time_binary.as_os_str().to_owned(),
      "-f".into(),
      "%U\n%M\n%x".into(),
      "-o".into(),
      request.report.as_os_str().to_owned(),
      request.executable.as_os_str().to_owned(),
    ];
    let invocation = Invocation { argv, env: Vec::new(), stdin, stdout, stderr };
    let deadline = hard_deadline(request.limits.time_limit);
    let exit: SandboxExit =
      run_with_deadline(invocation, deadline, cancel)?.into();
    let text = read_report(request.report)?;
    return Ok(interpret_time_output(exit, &text, request.limits));
  }
}

/// The tools that can measure executions.
#[derive(
  Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize
)]
#[serde(rename_all = "lowercase")]
pub enum TimeTool {
  /// A sandbox binary writing a `key: value` report.
  #[default]
  Sandbox,
  /// GNU time.
  Time,
}

impl ValueEnum for TimeTool {
  fn value_variants<'a>() -> &'a [Self] {
    return Self::all();
  }

  fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
    return Some(self.small_lc_name().into());
  }
}

impl TimeTool {
  /// Returns all variants.
  pub const fn all() -> &'static [Self] {
    return &[Self::Sandbox, Self::Time];
  }

  /// Returns a small name for the variant (lower-case).
  pub const fn small_lc_name(&self) -> &'static str {
    return match self {
      Self::Sandbox => "sandbox",
      Self::Time => "time",
    };
  }

  /// Instantiates the adapter for this tool, given the tool's binary.
  pub fn adapter(&self, binary: PathBuf) -> Box<dyn Sandbox> {
    return match self {
      Self::Sandbox => Box::new(ReportingSandbox::new(binary)),
      Self::Time => Box::new(TimeSandbox { time_binary: binary }),
    };
  }

  /// The binary used when the user doesn't name one.
  pub fn default_binary(&self) -> PathBuf {
    return match self {
      Self::Sandbox => {
        let home = std::env::var_os("HOME").unwrap_or_default();
        PathBuf::from(home).join(".local/bin/oiejq")
      },
      Self::Time => PathBuf::from("/usr/bin/time"),
    };
  }
}
