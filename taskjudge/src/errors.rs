//! This module contains the errors that abort a whole run. Failures of single
//! executions (wrong answers, timeouts, crashes) are never errors: they are
//! recorded as data in an `ExecutionResult`.

use std::error::Error;
use std::fmt::Display;
use std::io;

use derive_more::From;

/// Errors that stop a run.
#[derive(Debug, From)]
pub enum JudgeError {
  /// The package configuration is missing something or is inconsistent.
  #[from(ignore)]
  Configuration(String),
  /// A checker malfunctioned: it produced no output or garbage.
  #[from(ignore)]
  CheckerOutput {
    /// Name of the program whose output was being checked.
    program: String,
    /// ID of the test being checked.
    test: String,
    /// What was wrong with the checker's output.
    reason: String,
  },
  /// The user interrupted the run.
  #[from(ignore)]
  Interrupted,
  /// A worker thread died before delivering all of its results.
  #[from(ignore)]
  WorkerLost,
  /// Could not install or restore a signal handler, or signal a process.
  Signal(nix::Error),
  /// Some file could not be read or written.
  Io(io::Error),
  /// A YAML document could not be parsed or generated.
  Yaml(serde_yaml::Error),
  /// A child process could not be spawned or waited upon.
  Spawn(subprocess::PopenError),
}

impl Display for JudgeError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    return match self {
      JudgeError::Configuration(msg) => {
        write!(f, "configuration error: {}", msg)
      },
      JudgeError::CheckerOutput { program, test, reason } => write!(
        f,
        "checker failed while checking {} on test {}: {}",
        program,
        test,
        reason
      ),
      JudgeError::Interrupted => write!(f, "stopped by the user"),
      JudgeError::WorkerLost => write!(f, "a worker thread died"),
      JudgeError::Signal(e) => write!(f, "signal handling failed: {}", e),
      JudgeError::Io(e) => write!(f, "I/O error: {}", e),
      JudgeError::Yaml(e) => write!(f, "YAML error: {}", e),
      JudgeError::Spawn(e) => write!(f, "could not run a process: {}", e),
    };
  }
}

impl Error for JudgeError {}

impl JudgeError {
  /// Shorthand for a configuration error.
  pub fn config<S: Into<String>>(msg: S) -> Self {
    return Self::Configuration(msg.into());
  }
}
