//! This module implements the aggregation of results: the state of a run as
//! a map of program, group and test to result, folded one result at a time,
//! and the group statuses, scores and per-program summaries derived from it.
//!
//! The state lives behind an `Arc` and is copied on write, so a snapshot
//! handed to the reporter never changes under its feet.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::{Limits, RunContext};
use crate::expected::{ExpectedScores, GroupExpectation, ProgramExpectation};
use crate::package::GroupId;
use crate::scheduler::Completed;
use crate::verdict::*;

/// What is shown for a group of a program.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GroupView {
  /// Some test of the group hasn't finished.
  Pending,
  /// Every test finished.
  Finished(GroupOutcome),
}

impl GroupView {
  /// The outcome, if the group finished.
  pub fn outcome(&self) -> Option<GroupOutcome> {
    return match self {
      Self::Pending => None,
      Self::Finished(o) => Some(*o),
    };
  }
}

/// Results of one group, by test ID.
pub type GroupResults = BTreeMap<String, ExecutionResult>;

/// The state of a run: program name -> group -> test ID -> result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregateState {
  /// The results.
  pub results: BTreeMap<String, BTreeMap<GroupId, GroupResults>>,
}

impl AggregateState {
  /// The state at the start of a run: everything pending.
  pub fn new(ctx: &RunContext) -> Self {
    let mut results: BTreeMap<String, BTreeMap<GroupId, GroupResults>> =
      BTreeMap::new();
    for p in ctx.programs.iter() {
      let groups = results.entry(p.name.clone()).or_default();
      for t in ctx.tests.iter() {
        groups
          .entry(t.group)
          .or_default()
          .insert(t.id.clone(), ExecutionResult::pending());
      }
    }
    return Self { results };
  }

  /// Records one result, replacing whatever was in its cell.
  pub fn fold(
    &mut self,
    program: &str,
    group: GroupId,
    test: &str,
    result: ExecutionResult,
  ) {
    self
      .results
      .entry(program.to_string())
      .or_default()
      .entry(group)
      .or_default()
      .insert(test.to_string(), result);
  }

  /// The result of a program on a test.
  pub fn result(
    &self,
    program: &str,
    group: GroupId,
    test: &str,
  ) -> Option<&ExecutionResult> {
    return self.results.get(program)?.get(&group)?.get(test);
  }

  /// The results of a program on a group.
  pub fn group_results(
    &self,
    program: &str,
    group: GroupId,
  ) -> Option<&GroupResults> {
    return self.results.get(program)?.get(&group);
  }

  /// Folds a group's results into its status and score. A group that isn't
  /// OK is worth nothing; otherwise the policy decides.
  pub fn group_view(
    &self,
    ctx: &RunContext,
    program: &str,
    group: GroupId,
  ) -> GroupView {
    let results = match self.group_results(program, group) {
      Some(r) if !r.is_empty() => r,
      _ => return GroupView::Pending,
    };
    if results.values().any(|r| !r.is_finished()) {
      return GroupView::Pending;
    }
    let status = merge_statuses(results.values().map(|r| r.status));
    if !status.is_ok() {
      return GroupView::Finished(GroupOutcome { status, points: 0 });
    }
    let limits = ctx.limits_for(group);
    let policy = ctx.policy();
    let test_points: Vec<u32> = ctx
      .group_tests(group)
      .filter_map(|t| results.get(&t.id))
      .map(|r| policy.test_score(r, limits.time_limit, limits.memory_limit))
      .collect();
    let points = policy.group_score(&test_points, ctx.group_max(group));
    return GroupView::Finished(GroupOutcome { status, points });
  }

  /// The total of a program over its finished groups.
  pub fn program_points(&self, ctx: &RunContext, program: &str) -> u32 {
    return ctx
      .groups
      .iter()
      .filter_map(|g| self.group_view(ctx, program, *g).outcome())
      .map(|o| o.points)
      .sum();
  }

  /// The largest of some measurement over a program's finished tests, with
  /// the limit of the group it came from. Tests that blew the limit without
  /// a measurement count as twice the limit.
  fn program_max<F>(
    &self,
    ctx: &RunContext,
    program: &str,
    pick: F,
  ) -> Option<Peak>
  where
    F: Fn(&ExecutionResult, Limits) -> (Option<u64>, u64),
  {
    return self
      .results
      .get(program)?
      .iter()
      .flat_map(|(g, tests)| tests.values().map(move |r| (*g, r)))
      .filter(|(g, _)| ctx.limits.contains_key(g))
      .filter_map(|(g, r)| match pick(r, ctx.limits_for(g)) {
        (Some(value), limit) => Some(Peak { value, limit }),
        (None, _) => None,
      })
      .max_by_key(|p| (p.value, p.limit));
  }

  /// The longest time of a program.
  pub fn program_max_time(&self, ctx: &RunContext, program: &str) -> Option<Peak> {
    return self.program_max(ctx, program, |r, limits| {
      let tl = limits.time_limit;
      let value = match r.time {
        Some(t) => Some(t),
        None if r.status == Status::TimeLimit => Some(tl.saturating_mul(2)),
        None => None,
      };
      (value, tl)
    });
  }

  /// The most memory used by a program.
  pub fn program_max_memory(
    &self,
    ctx: &RunContext,
    program: &str,
  ) -> Option<Peak> {
    return self.program_max(ctx, program, |r, limits| {
      let ml = limits.memory_limit;
      let value = match r.memory {
        Some(m) => Some(m),
        None if r.status == Status::MemoryLimit => Some(ml.saturating_mul(2)),
        None => None,
      };
      (value, ml)
    });
  }

  /// Number of finished results.
  pub fn finished(&self) -> usize {
    return self
      .results
      .values()
      .flat_map(|groups| groups.values())
      .flat_map(|tests| tests.values())
      .filter(|r| r.is_finished())
      .count();
  }

  /// Whether any result carries a diagnostic from the sandbox.
  pub fn has_errors(&self) -> bool {
    return self
      .results
      .values()
      .flat_map(|groups| groups.values())
      .flat_map(|tests| tests.values())
      .any(|r| r.error.is_some());
  }

  /// Whether any program failed to compile.
  pub fn has_compile_errors(&self) -> bool {
    return self
      .results
      .values()
      .flat_map(|groups| groups.values())
      .flat_map(|tests| tests.values())
      .any(|r| r.status == Status::CompileError);
  }

  /// The scores this run computed, in the form of a baseline: every program
  /// run, on every group that was wholly run and finished.
  pub fn computed_expected(&self, ctx: &RunContext) -> ExpectedScores {
    let mut programs: BTreeMap<String, ProgramExpectation> = BTreeMap::new();
    for p in ctx.programs.iter() {
      let outcomes: BTreeMap<GroupId, GroupOutcome> = ctx
        .whole_groups
        .iter()
        .filter_map(|g| Some((*g, self.group_view(ctx, &p.name, *g).outcome()?)))
        .collect();
      let points = outcomes.values().map(|o| o.points).sum();
      let expected: BTreeMap<GroupId, GroupExpectation> = outcomes
        .into_iter()
        .map(|(g, o)| (g, GroupExpectation::Scored(o)))
        .collect();
      programs.insert(p.name.clone(), ProgramExpectation { expected, points });
    }
    return ExpectedScores { programs };
  }
}

/// A program's largest measurement and the limit it was taken under.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Peak {
  /// The measurement.
  pub value: u64,
  /// The limit of the group it came from.
  pub limit: u64,
}

/// A read-only view of a run, for rendering.
#[derive(Clone, Debug)]
pub struct Snapshot {
  /// The state at some point.
  pub state: Arc<AggregateState>,
  /// Results recorded so far.
  pub done: usize,
  /// Results there will be.
  pub total: usize,
}

/// Keeps the state of a run, recording results as they come in.
#[derive(Clone, Debug)]
pub struct Aggregator {
  /// Shared with snapshots until the next write.
  state: Arc<AggregateState>,
  /// Results recorded so far.
  done: usize,
  /// Results there will be.
  total: usize,
}

impl Aggregator {
  /// An aggregator for a run, with everything pending.
  pub fn new(ctx: &RunContext) -> Self {
    return Self {
      state: Arc::new(AggregateState::new(ctx)),
      done: 0,
      total: ctx.programs.len() * ctx.tests.len(),
    };
  }

  /// Records a completed execution.
  pub fn record(&mut self, completed: &Completed) {
    Arc::make_mut(&mut self.state).fold(
      &completed.unit.program.name,
      completed.unit.test.group,
      &completed.unit.test.id,
      completed.result.clone(),
    );
    self.done += 1;
  }

  /// Takes a snapshot. Cheap: the state is only copied on the next write
  /// while the snapshot is alive.
  pub fn snapshot(&self) -> Snapshot {
    return Snapshot {
      state: self.state.clone(),
      done: self.done,
      total: self.total,
    };
  }

  /// The current state.
  pub fn state(&self) -> &AggregateState {
    return &self.state;
  }
}
