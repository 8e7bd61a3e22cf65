//! This library implements the machinery to run a task package's programs
//! against its tests: sandboxed execution under time and memory limits,
//! output checking, group scoring, a live progress table, and comparison of
//! the computed scores against the expected ones stored in the package.
//!
//! The `taskrun` tool is the command-line front-end; everything it does goes
//! through the types exported here, so they can be driven (and tested) without
//! a terminal or a real package directory.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]
#![allow(clippy::needless_return)]

pub mod aggregate;
pub mod checker;
pub mod compile;
pub mod config;
pub mod context;
pub mod errors;
pub mod expected;
pub mod interrupt;
pub mod package;
pub(crate) mod process;
pub mod report;
pub mod sandbox;
pub mod scheduler;
pub mod scoring;
pub mod subtasks;
pub mod util;
pub mod verdict;

#[cfg(test)]
mod tests;

/// Imports the most relevant exports from the library.
pub mod prelude {
  pub use super::aggregate::*;
  pub use super::checker::*;
  pub use super::compile::*;
  pub use super::config::*;
  pub use super::context::*;
  pub use super::errors::*;
  pub use super::expected::*;
  pub use super::interrupt::*;
  pub use super::package::*;
  pub use super::report::*;
  pub use super::sandbox::*;
  pub use super::scheduler::*;
  pub use super::scoring::*;
  pub use super::subtasks::*;
  pub use super::verdict::*;
}
