//! This module implements subtask validation. A subtask is a set of groups
//! worth some points, with a validator: a program that should solve exactly
//! the subtask's groups. The validators run like any other program; this
//! module checks the configuration beforehand and the groups they pass
//! afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateState, GroupView};
use crate::context::RunContext;
use crate::errors::JudgeError;
use crate::package::{GroupId, Program};

/// A subtask, as described in `config.yml`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskConfig {
  /// The groups it's made of.
  pub groups: Vec<GroupId>,
  /// What solving it is worth.
  pub points: u32,
  /// The validator, a program in `prog/`. Only the first word counts.
  pub validator: String,
}

impl SubtaskConfig {
  /// The file name of the validator.
  pub fn validator_file(&self) -> Option<&str> {
    return self.validator.split_whitespace().next();
  }
}

/// Subtasks by name.
pub type Subtasks = BTreeMap<String, SubtaskConfig>;

/// Checks that the groups of every subtask have scores, and that the scores
/// add up to the subtask's points.
pub fn check_subtask_points(
  subtasks: &Subtasks,
  scores: &BTreeMap<GroupId, u32>,
) -> Result<(), JudgeError> {
  for (name, subtask) in subtasks.iter() {
    let mut total: u32 = 0;
    for g in subtask.groups.iter() {
      let points = scores.get(g).ok_or(JudgeError::config(format!(
        "group {} of subtask {} was not defined",
        g, name
      )))?;
      total += points;
    }
    if total != subtask.points {
      return Err(JudgeError::config(format!(
        "solving subtask {} will grant {} points (expected {})",
        name, total, subtask.points
      )));
    }
  }
  return Ok(());
}

/// Finds the validator of every subtask in `prog_dir`, by subtask name.
pub fn subtask_validators(
  task_id: &str,
  prog_dir: &Path,
  subtasks: &Subtasks,
) -> Result<BTreeMap<String, Program>, JudgeError> {
  let mut validators = BTreeMap::new();
  for (name, subtask) in subtasks.iter() {
    let file = subtask.validator_file().ok_or(JudgeError::config(format!(
      "subtask {} has no validator",
      name
    )))?;
    let source = prog_dir.join(file);
    if !source.is_file() {
      return Err(JudgeError::config(format!(
        "validator {} of subtask {} does not exist",
        file, name
      )));
    }
    validators.insert(name.clone(), Program::from_source(task_id, &source)?);
  }
  return Ok(validators);
}

/// The programs to run for subtask validation: each subtask's validator,
/// going by the subtask's name.
pub fn subtask_programs(validators: &BTreeMap<String, Program>) -> Vec<Program> {
  return validators
    .iter()
    .map(|(name, v)| Program { name: name.clone(), ..v.clone() })
    .collect();
}

/// Which groups a subtask's validator passed, and which it should have.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubtaskVerdict {
  /// Name of the subtask.
  pub subtask: String,
  /// Groups the validator passed.
  pub passed: BTreeSet<GroupId>,
  /// Groups of the subtask among those run.
  pub expected: BTreeSet<GroupId>,
}

impl SubtaskVerdict {
  /// Whether the validator passed exactly the subtask's groups.
  pub fn is_ok(&self) -> bool {
    return self.passed == self.expected;
  }
}

impl Display for SubtaskVerdict {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    return write!(
      f,
      "subtask {}: passes groups {:?}, should pass {:?}",
      self.subtask, self.passed, self.expected
    );
  }
}

/// Judges every subtask from the results of its validator. The context is
/// the one the validators ran in, with programs named after the subtasks.
/// Only groups that were run count.
pub fn judge_subtasks(
  ctx: &RunContext,
  state: &AggregateState,
  subtasks: &Subtasks,
) -> Vec<SubtaskVerdict> {
  return subtasks
    .iter()
    .map(|(name, subtask)| {
      let passed = ctx
        .groups
        .iter()
        .copied()
        .filter(|g| match state.group_view(ctx, name, *g) {
          GroupView::Finished(o) => o.status.is_ok(),
          GroupView::Pending => false,
        })
        .collect();
      let expected = subtask
        .groups
        .iter()
        .copied()
        .filter(|g| ctx.groups.contains(g))
        .collect();
      SubtaskVerdict { subtask: name.clone(), passed, expected }
    })
    .collect();
}
