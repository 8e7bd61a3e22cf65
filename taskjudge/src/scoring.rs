//! This module implements the scoring policies of the supported contest
//! types. A policy decides how many points one execution is worth, and how
//! the points of a group's tests fold into the group's score.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::verdict::ExecutionResult;

/// How executions and groups are scored.
pub trait ScoringPolicy: Send + Sync {
  /// The points (0 to 100) one execution is worth, given the limits it ran
  /// under.
  fn test_score(
    &self,
    result: &ExecutionResult,
    time_limit: u64,
    memory_limit: u64,
  ) -> u32;

  /// The score of a group, given the points of its tests (in test order) and
  /// the most the group can be worth.
  fn group_score(&self, test_points: &[u32], group_max: u32) -> u32;
}

/// Group scoring shared by the default and OI policies: the weakest test
/// decides the fraction of the group's score awarded.
fn weakest_test_share(test_points: &[u32], group_max: u32) -> u32 {
  return match test_points.iter().min() {
    Some(&min) => min.min(100) * group_max / 100,
    None => 0,
  };
}

/// Default scoring: a test is worth the checker's points if it's OK, and a
/// group is worth its weakest test's share of the group score.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultScoring;

impl ScoringPolicy for DefaultScoring {
  fn test_score(&self, result: &ExecutionResult, _: u64, _: u64) -> u32 {
    if result.status.is_ok() {
      return result.points.min(100);
    } else {
      return 0;
    }
  }

  fn group_score(&self, test_points: &[u32], group_max: u32) -> u32 {
    return weakest_test_share(test_points, group_max);
  }
}

/// OI scoring: like the default, but OK executions slower than half the time
/// limit lose points linearly, down to 1 point right at the limit.
#[derive(Copy, Clone, Debug, Default)]
pub struct OiScoring;

impl ScoringPolicy for OiScoring {
  fn test_score(
    &self,
    result: &ExecutionResult,
    time_limit: u64,
    _: u64,
  ) -> u32 {
    if !result.status.is_ok() || time_limit == 0 {
      return 0;
    }
    let time = result.time.unwrap_or(0);
    let base = result.points.min(100) as u64;
    if time.saturating_mul(2) <= time_limit {
      return base as u32;
    }
    if time > time_limit {
      return 0;
    }
    // 100 at half the limit, 1 at the limit
    let half = time_limit - time_limit / 2;
    let decayed = 1 + 99u64.saturating_mul(time_limit - time) / half.max(1);
    return (decayed.min(100) * base / 100) as u32;
  }

  fn group_score(&self, test_points: &[u32], group_max: u32) -> u32 {
    return weakest_test_share(test_points, group_max);
  }
}

/// ICPC scoring: all or nothing. A group is worth its full score only when
/// every one of its tests is fully correct.
#[derive(Copy, Clone, Debug, Default)]
pub struct IcpcScoring;

impl ScoringPolicy for IcpcScoring {
  fn test_score(&self, result: &ExecutionResult, _: u64, _: u64) -> u32 {
    return if result.status.is_ok() { 100 } else { 0 };
  }

  fn group_score(&self, test_points: &[u32], group_max: u32) -> u32 {
    if !test_points.is_empty() && test_points.iter().all(|p| *p >= 100) {
      return group_max;
    } else {
      return 0;
    }
  }
}

/// The supported contest types, each with its own scoring policy.
#[derive(
  Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize
)]
#[serde(rename_all = "lowercase")]
pub enum ContestType {
  /// Checker points, weakest test decides the group.
  #[default]
  Default,
  /// Like default, with time-based point decay.
  Oi,
  /// All or nothing per group.
  Icpc,
}

impl ValueEnum for ContestType {
  fn value_variants<'a>() -> &'a [Self] {
    return Self::all();
  }

  fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
    return Some(self.small_lc_name().into());
  }
}

impl ContestType {
  /// Returns all variants.
  pub const fn all() -> &'static [Self] {
    return &[Self::Default, Self::Oi, Self::Icpc];
  }

  /// Returns a small name for the variant (lower-case).
  pub const fn small_lc_name(&self) -> &'static str {
    return match self {
      Self::Default => "default",
      Self::Oi => "oi",
      Self::Icpc => "icpc",
    };
  }

  /// Returns the scoring policy for this contest type.
  pub fn policy(&self) -> &'static dyn ScoringPolicy {
    return match self {
      Self::Default => &DefaultScoring,
      Self::Oi => &OiScoring,
      Self::Icpc => &IcpcScoring,
    };
  }
}
