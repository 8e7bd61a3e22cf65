//! This module implements cancellation of a run: a token shared by everything
//! that waits on child processes, and a reference-counted guard that keeps a
//! SIGINT/SIGTERM handler installed while anything is waiting.
//!
//! The handler itself only flips an atomic flag. Waiters poll the flag through
//! their `CancelToken`, kill their children's process groups and bail out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::errors::JudgeError;

/// Set by the signal handler. Async-signal-safe.
static SIGNALLED: AtomicBool = AtomicBool::new(false);

/// The signals we catch.
const CAUGHT: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

/// Installation state of the handler.
struct GuardState {
  /// Number of live guards.
  count: usize,
  /// The handlers we replaced, to restore when the last guard goes away.
  previous: Vec<(Signal, SigAction)>,
}

/// Shared by all guards.
static GUARDS: Mutex<GuardState> = Mutex::new(GuardState {
  count: 0,
  previous: Vec::new(),
});

/// The signal handler. Only touches an atomic.
extern "C" fn on_signal(_: nix::libc::c_int) {
  SIGNALLED.store(true, Ordering::SeqCst);
}

/// Whether an interrupt signal was received while a guard was held.
pub fn signal_received() -> bool {
  return SIGNALLED.load(Ordering::SeqCst);
}

/// Forgets about a received interrupt signal.
pub fn clear_signal() {
  SIGNALLED.store(false, Ordering::SeqCst);
}

/// Keeps the interrupt handler installed while alive. Guards nest: the first
/// one installs the handler, the last one dropped restores the old ones.
#[derive(Debug)]
pub struct SignalGuard {
  /// Can't be built from outside.
  _private: (),
}

impl SignalGuard {
  /// Acquires a guard, installing the handler if needed.
  pub fn acquire() -> Result<Self, JudgeError> {
    let mut state = GUARDS.lock().unwrap_or_else(PoisonError::into_inner);
    if state.count == 0 {
      let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
      );
      let mut previous = Vec::new();
      for sig in CAUGHT {
        // SAFETY: the handler only stores into an atomic.
        let old = unsafe { signal::sigaction(sig, &action) }?;
        previous.push((sig, old));
      }
      state.previous = previous;
      clear_signal();
      debug!("Interrupt handler installed.");
    }
    state.count += 1;
    return Ok(Self { _private: () });
  }
}

impl Drop for SignalGuard {
  fn drop(&mut self) {
    let mut state = GUARDS.lock().unwrap_or_else(PoisonError::into_inner);
    state.count -= 1;
    if state.count == 0 {
      for (sig, old) in state.previous.drain(..) {
        // SAFETY: restoring whatever was there before.
        if let Err(e) = unsafe { signal::sigaction(sig, &old) } {
          warn!("Could not restore the handler for {}: {}", sig, e);
        }
      }
      debug!("Interrupt handler removed.");
    }
  }
}

/// A cancellation flag shared by the scheduler, its workers and the sandboxes.
/// It also trips when an interrupt signal arrives.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
  /// The flag itself.
  flag: Arc<AtomicBool>,
}

impl CancelToken {
  /// Creates a fresh, uncancelled token.
  pub fn new() -> Self {
    return Self::default();
  }

  /// Cancels everything sharing this token.
  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  /// Whether the run was cancelled, either explicitly or by a signal.
  pub fn is_cancelled(&self) -> bool {
    if signal_received() {
      self.cancel();
    }
    return self.flag.load(Ordering::SeqCst);
  }

  /// Errors out if the run was cancelled.
  pub fn check(&self) -> Result<(), JudgeError> {
    if self.is_cancelled() {
      return Err(JudgeError::Interrupted);
    } else {
      return Ok(());
    }
  }
}
