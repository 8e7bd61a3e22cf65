//! This module implements the shared vocabulary of a run: the canonical
//! statuses of an execution and the result record of a single execution.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The canonical outcome of one execution of a program on a test.
#[derive(
  Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize
)]
pub enum Status {
  /// Not finished yet. Only ever a placeholder, never merged.
  #[serde(rename = "PENDING")]
  Pending,
  /// Correct answer within the limits.
  #[serde(rename = "OK")]
  Accepted,
  /// Wrong answer.
  #[serde(rename = "WA")]
  WrongAnswer,
  /// Time limit exceeded.
  #[serde(rename = "TL")]
  TimeLimit,
  /// Memory limit exceeded.
  #[serde(rename = "ML")]
  MemoryLimit,
  /// Runtime error, or anything the sandbox could not explain.
  #[serde(rename = "RE")]
  RuntimeError,
  /// The program did not compile.
  #[serde(rename = "CE")]
  CompileError,
}

impl Status {
  /// Returns all statuses.
  pub const fn all() -> &'static [Self] {
    return &[
      Self::Pending,
      Self::Accepted,
      Self::WrongAnswer,
      Self::TimeLimit,
      Self::MemoryLimit,
      Self::RuntimeError,
      Self::CompileError,
    ];
  }

  /// Returns the short code for this status, as used in reports and in the
  /// expected scores.
  pub const fn code(&self) -> &'static str {
    return match self {
      Self::Pending => "PENDING",
      Self::Accepted => "OK",
      Self::WrongAnswer => "WA",
      Self::TimeLimit => "TL",
      Self::MemoryLimit => "ML",
      Self::RuntimeError => "RE",
      Self::CompileError => "CE",
    };
  }

  /// Returns the severity of this status when merging; higher is more
  /// severe. `Pending` has none.
  pub const fn severity(&self) -> Option<u8> {
    return match self {
      Self::Pending => None,
      Self::Accepted => Some(0),
      Self::WrongAnswer => Some(1),
      Self::RuntimeError => Some(2),
      Self::MemoryLimit => Some(3),
      Self::TimeLimit => Some(4),
      Self::CompileError => Some(5),
    };
  }

  /// Whether this status is strictly more severe than another one. Nothing is
  /// more severe than `Pending` and `Pending` is more severe than nothing.
  pub fn is_more_severe_than(&self, other: &Self) -> bool {
    return match (self.severity(), other.severity()) {
      (Some(a), Some(b)) => a > b,
      (Some(_), None) => true,
      (None, _) => false,
    };
  }

  /// Whether this is the OK status.
  pub const fn is_ok(&self) -> bool {
    return matches!(self, Self::Accepted);
  }
}

/// Merges a new status into the current status of a group: the new one only
/// replaces the current one if it is strictly more severe.
pub fn update_group_status(current: Status, new: Status) -> Status {
  if new.is_more_severe_than(&current) {
    return new;
  } else {
    return current;
  }
}

/// Merges a sequence of statuses into a single group status. Yields `Pending`
/// for an empty sequence (or one with only pending statuses).
pub fn merge_statuses<I: IntoIterator<Item = Status>>(statuses: I) -> Status {
  return statuses.into_iter().fold(Status::Pending, update_group_status);
}

impl Display for Status {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    return f.pad(self.code());
  }
}

impl FromStr for Status {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    return Self::all()
      .iter()
      .copied()
      .find(|st| s.eq_ignore_ascii_case(st.code()))
      .ok_or(());
  }
}

/// The result of running one program on one test.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
  /// The verdict.
  pub status: Status,
  /// CPU time used, in milliseconds, if it was measured.
  pub time: Option<u64>,
  /// Peak memory used, in kilobytes, if it was measured.
  pub memory: Option<u64>,
  /// Partial credit within the test, 0 to 100. Only meaningful for OK and WA.
  pub points: u32,
  /// Diagnostic for unusual results (e.g. garbage in the sandbox report).
  pub error: Option<String>,
}

impl Default for ExecutionResult {
  fn default() -> Self {
    return Self::pending();
  }
}

impl ExecutionResult {
  /// A result with only a status and nothing measured.
  pub fn with_status(status: Status) -> Self {
    return Self {
      status,
      time: None,
      memory: None,
      points: 0,
      error: None,
    };
  }

  /// The placeholder result for an execution that hasn't finished.
  pub fn pending() -> Self {
    return Self::with_status(Status::Pending);
  }

  /// The result for every test of a program that didn't compile.
  pub fn compile_error() -> Self {
    return Self::with_status(Status::CompileError);
  }

  /// Whether the execution finished.
  pub fn is_finished(&self) -> bool {
    return self.status != Status::Pending;
  }

  /// Sets a diagnostic message.
  pub fn with_error<S: Into<String>>(mut self, error: S) -> Self {
    self.error = Some(error.into());
    return self;
  }
}

/// The outcome of a whole group: its merged status and awarded points.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOutcome {
  /// The merged status.
  pub status: Status,
  /// The points awarded for the group.
  pub points: u32,
}

impl Display for GroupOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    return write!(f, "{} ({} pts)", self.status, self.points);
  }
}
