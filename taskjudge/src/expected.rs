//! This module implements the expected scores stored in a package (the
//! baseline), and the comparison of a baseline against freshly computed
//! scores: what was added, removed or changed, and merging the changes back.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::package::GroupId;
use crate::verdict::{GroupOutcome, Status};

/// What a program is expected to get on a group. The short form only has a
/// status, and is worth the whole group if OK and nothing otherwise.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupExpectation {
  /// Just a status.
  Status(Status),
  /// A status and the points awarded.
  Scored(GroupOutcome),
}

impl GroupExpectation {
  /// The expected status.
  pub fn status(&self) -> Status {
    return match self {
      Self::Status(st) => *st,
      Self::Scored(o) => o.status,
    };
  }

  /// The full form, filling in the points of the short form.
  pub fn outcome(&self, group_max: u32) -> GroupOutcome {
    return match self {
      Self::Status(st) => GroupOutcome {
        status: *st,
        points: if st.is_ok() { group_max } else { 0 },
      },
      Self::Scored(o) => *o,
    };
  }
}

impl From<GroupOutcome> for GroupExpectation {
  fn from(value: GroupOutcome) -> Self {
    return Self::Scored(value);
  }
}

/// What a program is expected to get.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramExpectation {
  /// Per group.
  #[serde(default)]
  pub expected: BTreeMap<GroupId, GroupExpectation>,
  /// The total.
  #[serde(default)]
  pub points: u32,
}

impl ProgramExpectation {
  /// Sums the points of the groups, given the scores of the groups.
  pub fn total(&self, scores: &BTreeMap<GroupId, u32>) -> u32 {
    return self
      .expected
      .iter()
      .map(|(g, e)| e.outcome(scores.get(g).copied().unwrap_or(0)).points)
      .sum();
  }
}

/// The expected scores of every program, by program name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectedScores {
  /// The programs.
  pub programs: BTreeMap<String, ProgramExpectation>,
}

impl ExpectedScores {
  /// Returns a copy where every group is in the full form.
  pub fn normalized(&self, scores: &BTreeMap<GroupId, u32>) -> Self {
    let programs = self
      .programs
      .iter()
      .map(|(name, pe)| {
        let expected = pe
          .expected
          .iter()
          .map(|(g, e)| {
            let max = scores.get(g).copied().unwrap_or(0);
            (*g, GroupExpectation::Scored(e.outcome(max)))
          })
          .collect();
        (name.clone(), ProgramExpectation { expected, points: pe.points })
      })
      .collect();
    return Self { programs };
  }

  /// Returns a copy with only the given programs and groups.
  pub fn restricted(
    &self,
    programs: &BTreeSet<String>,
    groups: &BTreeSet<GroupId>,
  ) -> Self {
    let programs = self
      .programs
      .iter()
      .filter(|(name, _)| programs.contains(*name))
      .map(|(name, pe)| {
        let expected = pe
          .expected
          .iter()
          .filter(|(g, _)| groups.contains(*g))
          .map(|(g, e)| (*g, *e))
          .collect();
        (name.clone(), ProgramExpectation { expected, points: pe.points })
      })
      .collect();
    return Self { programs };
  }
}

/// What a comparison covers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffScope {
  /// The programs that were run.
  pub programs: BTreeSet<String>,
  /// The groups that were wholly run.
  pub groups: BTreeSet<GroupId>,
  /// Whether every program of the package was run.
  pub all_programs: bool,
  /// Whether every test of the package was run.
  pub all_tests: bool,
  /// The score of each group.
  pub scores: BTreeMap<GroupId, u32>,
}

impl DiffScope {
  /// The scope of a run.
  pub fn of(ctx: &RunContext) -> Self {
    return Self {
      programs: ctx.programs.iter().map(|p| p.name.clone()).collect(),
      groups: ctx.whole_groups.clone(),
      all_programs: ctx.all_programs,
      all_tests: ctx.all_tests,
      scores: ctx.scores.clone(),
    };
  }
}

/// What changed in a group's outcome.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChangeKind {
  /// Only the status.
  Status,
  /// Only the points.
  Points,
  /// Both.
  Both,
}

/// One group of one program whose outcome changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScoreChange {
  /// The program.
  pub program: String,
  /// The group.
  pub group: GroupId,
  /// What was expected.
  pub old: GroupOutcome,
  /// What was computed.
  pub new: GroupOutcome,
}

impl ScoreChange {
  /// Classifies the change.
  pub fn kind(&self) -> ChangeKind {
    let status = self.old.status != self.new.status;
    let points = self.old.points != self.new.points;
    return match (status, points) {
      (true, false) => ChangeKind::Status,
      (false, true) => ChangeKind::Points,
      _ => ChangeKind::Both,
    };
  }
}

impl Display for ScoreChange {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    return match self.kind() {
      ChangeKind::Status => write!(
        f,
        "{}, group {}: status {} -> {}",
        self.program, self.group, self.old.status, self.new.status
      ),
      ChangeKind::Points => write!(
        f,
        "{}, group {}: points {} -> {}",
        self.program, self.group, self.old.points, self.new.points
      ),
      ChangeKind::Both => write!(
        f,
        "{}, group {}: {} -> {}",
        self.program, self.group, self.old, self.new
      ),
    };
  }
}

/// The result of comparing a baseline to computed scores.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationResult {
  /// Programs computed but not in the baseline.
  pub added_programs: BTreeSet<String>,
  /// Programs in the baseline that no longer exist.
  pub removed_programs: BTreeSet<String>,
  /// Groups computed but not in the baseline.
  pub added_groups: BTreeSet<GroupId>,
  /// Groups in the baseline that no longer exist.
  pub removed_groups: BTreeSet<GroupId>,
  /// Groups whose outcome changed, by program then group.
  pub changes: Vec<ScoreChange>,
  /// The baseline, within the scope of the comparison.
  pub expected_scores: ExpectedScores,
  /// The computed scores, within the scope of the comparison.
  pub new_expected_scores: ExpectedScores,
}

impl ValidationResult {
  /// Whether nothing differs.
  pub fn is_empty(&self) -> bool {
    return self.added_programs.is_empty()
      && self.removed_programs.is_empty()
      && self.added_groups.is_empty()
      && self.removed_groups.is_empty()
      && self.changes.is_empty();
  }
}

/// Compares a baseline to computed scores, within a scope. Programs that
/// weren't run and groups that weren't wholly run are left out, except that
/// removals are noticed when every program (or every test) was run.
pub fn diff(
  old: &ExpectedScores,
  new: &ExpectedScores,
  scope: &DiffScope,
) -> ValidationResult {
  let old_full = old.normalized(&scope.scores);
  let old_seen = old_full.restricted(&scope.programs, &scope.groups);
  let new_seen = new
    .normalized(&scope.scores)
    .restricted(&scope.programs, &scope.groups);
  let mut result = ValidationResult::default();
  for (name, new_pe) in new_seen.programs.iter() {
    let old_pe = match old_seen.programs.get(name) {
      Some(pe) => pe,
      None => {
        result.added_programs.insert(name.clone());
        continue;
      },
    };
    for (g, new_e) in new_pe.expected.iter() {
      let max = scope.scores.get(g).copied().unwrap_or(0);
      match old_pe.expected.get(g) {
        None => {
          result.added_groups.insert(*g);
        },
        Some(old_e) if old_e.outcome(max) != new_e.outcome(max) => {
          result.changes.push(ScoreChange {
            program: name.clone(),
            group: *g,
            old: old_e.outcome(max),
            new: new_e.outcome(max),
          });
        },
        Some(_) => (),
      }
    }
    if scope.all_tests {
      // everything ran, so whatever the baseline has beyond is gone
      if let Some(full_pe) = old_full.programs.get(name) {
        for g in full_pe.expected.keys() {
          if !new_pe.expected.contains_key(g) {
            result.removed_groups.insert(*g);
          }
        }
      }
    }
  }
  if scope.all_programs {
    for name in old_full.programs.keys() {
      if !new_seen.programs.contains_key(name) {
        result.removed_programs.insert(name.clone());
      }
    }
  }
  result.expected_scores = old_seen;
  result.new_expected_scores = new_seen;
  return result;
}

/// Merges the computed scores of a comparison into a baseline: removed
/// programs and groups go away, computed groups overwrite the baseline's, and
/// each program's total is recomputed. Applying the same result twice is the
/// same as applying it once.
pub fn apply_suggestions(
  old: &mut ExpectedScores,
  result: &ValidationResult,
  scores: &BTreeMap<GroupId, u32>,
) {
  for name in result.removed_programs.iter() {
    old.programs.remove(name);
  }
  for pe in old.programs.values_mut() {
    pe.expected.retain(|g, _| !result.removed_groups.contains(g));
  }
  for (name, new_pe) in result.new_expected_scores.programs.iter() {
    let pe = old.programs.entry(name.clone()).or_default();
    for (g, e) in new_pe.expected.iter() {
      pe.expected.insert(*g, *e);
    }
  }
  for pe in old.programs.values_mut() {
    pe.points = pe.total(scores);
  }
}
