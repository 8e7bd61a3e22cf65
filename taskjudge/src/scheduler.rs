//! This module implements the execution scheduler: a pool of worker threads
//! that drain a queue of (program, test) pairs, run each one in the sandbox,
//! check its output and hand the results back as they complete.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::checker::OutputChecker;
use crate::context::Limits;
use crate::errors::JudgeError;
use crate::interrupt::{CancelToken, SignalGuard};
use crate::package::{Program, TestCase};
use crate::sandbox::{RunRequest, Sandbox};
use crate::verdict::{ExecutionResult, Status};

/// How often the consumer of a schedule looks at the cancellation flag.
const RECV_INTERVAL: Duration = Duration::from_millis(50);

/// What a program compiled to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Executable {
  /// An executable at this path.
  Compiled(PathBuf),
  /// Nothing: compilation failed.
  Failed,
}

/// One execution to perform.
#[derive(Clone, Debug)]
pub struct WorkUnit {
  /// The program to run.
  pub program: Program,
  /// What it compiled to.
  pub executable: Executable,
  /// The test to run it on.
  pub test: TestCase,
  /// The limits of the test's group.
  pub limits: Limits,
}

impl WorkUnit {
  /// Where the program's output goes (`<program>/<test>.out`).
  pub fn output_path(&self, executions_dir: &Path) -> PathBuf {
    return self.cache_path(executions_dir, "out");
  }

  /// Where the sandbox report goes (`<program>/<test>.res`).
  pub fn report_path(&self, executions_dir: &Path) -> PathBuf {
    return self.cache_path(executions_dir, "res");
  }

  /// A file for this unit in the program's execution directory.
  fn cache_path(&self, executions_dir: &Path, ext: &str) -> PathBuf {
    let stem = self
      .test
      .input
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.test.id.clone());
    return executions_dir
      .join(&self.program.name)
      .join(format!("{}.{}", stem, ext));
  }
}

/// A finished execution.
#[derive(Clone, Debug)]
pub struct Completed {
  /// What was run.
  pub unit: WorkUnit,
  /// How it went.
  pub result: ExecutionResult,
}

/// Runs work units on a pool of workers.
#[derive(Clone)]
pub struct Scheduler {
  /// Runs the programs.
  sandbox: Arc<dyn Sandbox>,
  /// Checks the outputs.
  checker: Arc<OutputChecker>,
  /// Number of workers.
  cpus: usize,
  /// Where outputs and reports go.
  executions_dir: PathBuf,
  /// Shared with the workers and the sandboxes.
  cancel: CancelToken,
}

impl Scheduler {
  /// Creates a scheduler. Zero CPUs means one.
  pub fn new(
    sandbox: Arc<dyn Sandbox>,
    checker: Arc<OutputChecker>,
    cpus: usize,
    executions_dir: PathBuf,
    cancel: CancelToken,
  ) -> Self {
    return Self {
      sandbox,
      checker,
      cpus: cpus.max(1),
      executions_dir,
      cancel,
    };
  }

  /// Starts running the units. Results come out of the returned schedule in
  /// completion order. Units of programs that failed to compile complete
  /// right away as CE, without running anything.
  pub fn schedule(
    &self,
    units: Vec<WorkUnit>,
  ) -> Result<Schedule, JudgeError> {
    let mut seen: BTreeSet<(&str, &str)> = BTreeSet::new();
    for u in units.iter() {
      if !seen.insert((u.program.name.as_str(), u.test.id.as_str())) {
        return Err(JudgeError::config(format!(
          "{} is scheduled twice on test {}",
          u.program.name, u.test.id
        )));
      }
      if u.limits.time_limit == 0 || u.limits.memory_limit == 0 {
        return Err(JudgeError::config(format!(
          "limits for test {} must be positive",
          u.test.id
        )));
      }
    }
    let mut units = units;
    units.sort_by(|a, b| (&a.program, &a.test).cmp(&(&b.program, &b.test)));
    for u in units.iter() {
      std::fs::create_dir_all(self.executions_dir.join(&u.program.name))?;
    }
    let guard = SignalGuard::acquire()?;
    let total = units.len();
    let (sender, receiver) = mpsc::channel();
    let mut queue: VecDeque<WorkUnit> = VecDeque::new();
    for unit in units {
      if unit.executable == Executable::Failed {
        let result = ExecutionResult::compile_error();
        // the receiver is ours, it's still there
        let _ = sender.send(Ok(Completed { unit, result }));
      } else {
        queue.push_back(unit);
      }
    }
    let nt = self.cpus.min(queue.len());
    debug!("Running {} executions on {} workers.", queue.len(), nt);
    let queue = Arc::new(Mutex::new(queue));
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    for jn in 0..nt {
      let queue = queue.clone();
      let sender = sender.clone();
      let runner = self.clone();
      let handle = thread::Builder::new()
        .name(format!("job_runner_{}", jn + 1))
        .spawn(move || runner.work(queue, sender))?;
      workers.push(handle);
    }
    return Ok(Schedule {
      receiver,
      workers,
      cancel: self.cancel.clone(),
      remaining: total,
      _guard: guard,
    });
  }

  /// A worker's loop: take units off the queue until it's empty or the run
  /// is cancelled.
  fn work(
    &self,
    queue: Arc<Mutex<VecDeque<WorkUnit>>>,
    sender: Sender<Result<Completed, JudgeError>>,
  ) {
    let name = thread::current().name().unwrap_or("worker").to_string();
    debug!("Runner {} spawned!", name);
    loop {
      if self.cancel.is_cancelled() {
        break;
      }
      let unit_opt = queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front();
      let unit = match unit_opt {
        Some(unit) => unit,
        None => break,
      };
      let item = self
        .execute(&unit)
        .map(|result| Completed { unit, result });
      let failed = item.is_err();
      if sender.send(item).is_err() || failed {
        break;
      }
    }
    debug!("Runner {} done!", name);
  }

  /// Runs one unit and checks its output.
  fn execute(&self, unit: &WorkUnit) -> Result<ExecutionResult, JudgeError> {
    let executable = match &unit.executable {
      Executable::Compiled(path) => path,
      Executable::Failed => return Ok(ExecutionResult::compile_error()),
    };
    let output = unit.output_path(&self.executions_dir);
    let report = unit.report_path(&self.executions_dir);
    let request = RunRequest {
      executable,
      input: &unit.test.input,
      output: &output,
      report: &report,
      limits: unit.limits,
    };
    let mut result = self.sandbox.run(&request, &self.cancel)?;
    if let Some(e) = &result.error {
      warn!(
        "Odd result for {} on test {}: {}",
        unit.program.name, unit.test.id, e
      );
    }
    if result.status == Status::Accepted {
      let outcome = self.checker.check_execution(
        &unit.program.name,
        &unit.test.id,
        &unit.test.input,
        &output,
        &unit.test.answer,
      )?;
      if outcome.correct {
        result.points = outcome.points;
      } else {
        result.status = Status::WrongAnswer;
        result.points = 0;
      }
    }
    return Ok(result);
  }
}

/// A run in progress. Iterating yields the results as they complete; the
/// first error ends the iteration. Dropping it early cancels the rest.
pub struct Schedule {
  /// Where the workers send their results.
  receiver: Receiver<Result<Completed, JudgeError>>,
  /// The workers.
  workers: Vec<JoinHandle<()>>,
  /// Cancels the workers.
  cancel: CancelToken,
  /// Results not yet yielded.
  remaining: usize,
  /// Keeps the interrupt handler installed for the whole run.
  _guard: SignalGuard,
}

impl Schedule {
  /// Number of results still to come.
  pub fn remaining(&self) -> usize {
    return self.remaining;
  }

  /// Stops everything still running.
  pub fn cancel(&self) {
    self.cancel.cancel();
  }
}

impl Iterator for Schedule {
  type Item = Result<Completed, JudgeError>;

  fn next(&mut self) -> Option<Self::Item> {
    while self.remaining > 0 {
      if self.cancel.is_cancelled() {
        self.remaining = 0;
        return Some(Err(JudgeError::Interrupted));
      }
      match self.receiver.recv_timeout(RECV_INTERVAL) {
        Ok(item) => {
          self.remaining -= 1;
          if item.is_err() {
            self.cancel.cancel();
            self.remaining = 0;
          }
          return Some(item);
        },
        Err(RecvTimeoutError::Timeout) => continue,
        Err(RecvTimeoutError::Disconnected) => {
          self.remaining = 0;
          if self.cancel.is_cancelled() {
            return Some(Err(JudgeError::Interrupted));
          }
          return Some(Err(JudgeError::WorkerLost));
        },
      }
    }
    return None;
  }
}

impl Drop for Schedule {
  fn drop(&mut self) {
    if self.remaining > 0 {
      self.cancel.cancel();
    }
    for handle in self.workers.drain(..) {
      if handle.join().is_err() {
        warn!("A worker panicked.");
      }
    }
  }
}
