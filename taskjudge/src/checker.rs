//! This module implements output checking: deciding whether what a program
//! printed is a correct answer, either by comparing it to the expected output
//! or by asking the package's checker program.

use std::path::{Path, PathBuf};

use log::debug;
use subprocess::{Exec, Redirection};

use crate::errors::JudgeError;

/// What a checker decided about an output.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CheckOutcome {
  /// Whether the answer is correct.
  pub correct: bool,
  /// Partial credit, 0 to 100.
  pub points: u32,
}

impl CheckOutcome {
  /// A fully correct answer.
  pub const fn accepted() -> Self {
    return Self { correct: true, points: 100 };
  }

  /// A wrong answer.
  pub const fn wrong() -> Self {
    return Self { correct: false, points: 0 };
  }
}

/// Compares two outputs line by line, ignoring trailing whitespace on each
/// line and trailing blank lines.
pub fn compare_lines(output: &str, expected: &str) -> bool {
  /// Lines without trailing whitespace, minus the blank ones at the end.
  fn significant(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().map(|l| l.trim_end()).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
      lines.pop();
    }
    return lines;
  }
  return significant(output) == significant(expected);
}

/// Parses a checker's standard output: "OK" on the first line means correct,
/// and an optional third line carries the points. Anything else on the first
/// line is a wrong answer. Errors out (with a reason) on empty output or bad
/// points.
pub fn parse_checker_output(text: &str) -> Result<CheckOutcome, String> {
  let lines: Vec<&str> = text.lines().map(|l| l.trim()).collect();
  let first = match lines.first() {
    Some(l) if !l.is_empty() => *l,
    _ => return Err("checker printed nothing".to_string()),
  };
  if first != "OK" {
    return Ok(CheckOutcome::wrong());
  }
  return match lines.get(2).filter(|l| !l.is_empty()) {
    None => Ok(CheckOutcome::accepted()),
    Some(raw) => match raw.parse::<u32>() {
      Ok(points) if points <= 100 => Ok(CheckOutcome { correct: true, points }),
      _ => Err(format!("checker printed bad points: {:?}", raw)),
    },
  };
}

/// How outputs are checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputChecker {
  /// Line-by-line comparison with the expected output.
  Exact,
  /// An external checker, called as `checker input output answer`.
  External(PathBuf),
}

impl OutputChecker {
  /// Checks one output. Checker malfunctions come back as a reason, for the
  /// caller to attach the program and test to.
  pub fn check(
    &self,
    input: &Path,
    output: &Path,
    answer: &Path,
  ) -> Result<CheckOutcome, String> {
    return match self {
      Self::Exact => {
        let out = read_lossy(output)?;
        let ans = read_lossy(answer)?;
        if compare_lines(&out, &ans) {
          Ok(CheckOutcome::accepted())
        } else {
          Ok(CheckOutcome::wrong())
        }
      },
      Self::External(checker) => {
        let captured = Exec::cmd(checker)
          .arg(input)
          .arg(output)
          .arg(answer)
          .stdin(Redirection::None)
          .stdout(Redirection::Pipe)
          .stderr(Redirection::Pipe)
          .capture()
          .map_err(|e| format!("could not run {}: {}", checker.display(), e))?;
        debug!(
          "Checker said {:?} about {}.",
          captured.stdout_str(),
          output.display()
        );
        parse_checker_output(&captured.stdout_str())
      },
    };
  }

  /// Like `check`, but wraps malfunctions into a run-stopping error.
  pub fn check_execution(
    &self,
    program: &str,
    test: &str,
    input: &Path,
    output: &Path,
    answer: &Path,
  ) -> Result<CheckOutcome, JudgeError> {
    return self.check(input, output, answer).map_err(|reason| {
      JudgeError::CheckerOutput {
        program: program.to_string(),
        test: test.to_string(),
        reason,
      }
    });
  }
}

/// Reads a file as text, tolerating garbage bytes.
fn read_lossy(path: &Path) -> Result<String, String> {
  let bytes = std::fs::read(path)
    .map_err(|e| format!("could not read {}: {}", path.display(), e))?;
  return Ok(String::from_utf8_lossy(&bytes).into_owned());
}
