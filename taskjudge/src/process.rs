//! This module implements running a child process in its own process group
//! under a hard deadline, killing the whole group when time is up or when the
//! run is cancelled.

use std::ffi::OsString;
use std::fs::File;
use std::time::{Duration, Instant};

use log::debug;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use subprocess::{ExitStatus, Popen, PopenConfig, Redirection};

use crate::errors::JudgeError;
use crate::interrupt::{CancelToken, SignalGuard};

/// How often a waiting worker looks at the cancellation flag.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A process to run: command line, extra environment and redirections.
pub(crate) struct Invocation {
  /// The command line, program first.
  pub(crate) argv: Vec<OsString>,
  /// Variables added to the inherited environment.
  pub(crate) env: Vec<(OsString, OsString)>,
  /// Standard input.
  pub(crate) stdin: File,
  /// Standard output.
  pub(crate) stdout: File,
  /// Standard error.
  pub(crate) stderr: File,
}

/// How waiting on a child ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
  /// The child exited by itself.
  Exited(ExitStatus),
  /// The deadline passed and the child's group was killed.
  DeadlineExceeded,
}

/// Returns the status in the encoding of `wait(2)`, i.e. exit code shifted
/// left by 8 bits, or the signal number.
pub(crate) fn raw_wait_status(status: &ExitStatus) -> Option<u32> {
  return match status {
    ExitStatus::Exited(code) => Some(code << 8),
    ExitStatus::Signaled(sig) => Some(*sig as u32),
    _ => None,
  };
}

/// SIGKILLs a whole process group. A group that's already gone is fine.
fn kill_group(pgid: Option<Pid>) -> Result<(), JudgeError> {
  if let Some(pgid) = pgid {
    match killpg(pgid, Signal::SIGKILL) {
      Ok(()) | Err(Errno::ESRCH) => (),
      Err(e) => return Err(e.into()),
    }
  }
  return Ok(());
}

/// Whether a child has exited, without reaping it. While the leader is an
/// unreaped zombie its PID, and so its group ID, can't be reused.
fn has_exited(pid: Pid) -> Result<bool, JudgeError> {
  let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
  return match waitid(Id::Pid(pid), flags)? {
    WaitStatus::StillAlive => Ok(false),
    _ => Ok(true),
  };
}

/// Runs a process in a new process group, waiting at most `deadline`.
/// Cancellation kills the group and yields `JudgeError::Interrupted`.
pub(crate) fn run_with_deadline(
  invocation: Invocation,
  deadline: Duration,
  cancel: &CancelToken,
) -> Result<WaitOutcome, JudgeError> {
  let _guard = SignalGuard::acquire()?;
  cancel.check()?;
  let mut env = PopenConfig::current_env();
  env.extend(invocation.env);
  let mut child = Popen::create(invocation.argv.as_slice(), PopenConfig {
    stdin: Redirection::File(invocation.stdin),
    stdout: Redirection::File(invocation.stdout),
    stderr: Redirection::File(invocation.stderr),
    env: Some(env),
    setpgid: true,
    ..Default::default()
  })?;
  // with setpgid, the group ID is the child's PID
  let pgid = child.pid().map(|p| Pid::from_raw(p as i32));
  let started = Instant::now();
  loop {
    if cancel.is_cancelled() {
      debug!("Cancelled, killing process group {:?}.", pgid);
      kill_group(pgid)?;
      child.wait()?;
      return Err(JudgeError::Interrupted);
    }
    let elapsed = started.elapsed();
    if elapsed >= deadline {
      debug!("Deadline passed, killing process group {:?}.", pgid);
      kill_group(pgid)?;
      child.wait()?;
      return Ok(WaitOutcome::DeadlineExceeded);
    }
    let slice = (deadline - elapsed).min(POLL_INTERVAL);
    let exited = match pgid {
      Some(pid) => has_exited(pid)?,
      None => true,
    };
    if exited {
      // whatever the leader left behind in its group goes too
      kill_group(pgid)?;
      let status = child.wait()?;
      return Ok(WaitOutcome::Exited(status));
    }
    std::thread::sleep(slice);
  }
}
