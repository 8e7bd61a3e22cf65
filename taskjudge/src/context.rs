//! This module implements the run context: everything a run needs to know
//! about the package and the user's selection, passed explicitly to the
//! components that need it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::PackageConfig;
use crate::errors::JudgeError;
use crate::package::*;
use crate::scoring::{ContestType, ScoringPolicy};

/// The limits a test runs under.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
  /// Time limit, in milliseconds.
  pub time_limit: u64,
  /// Memory limit, in kilobytes.
  pub memory_limit: u64,
}

/// What the user asked for, on top of the package configuration.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
  /// Number of workers. Zero or absent means all cores.
  pub cpus: Option<usize>,
  /// Overrides the time limit (milliseconds), for every group.
  pub time_limit: Option<u64>,
  /// Overrides the memory limit (kilobytes), for every group.
  pub memory_limit: Option<u64>,
  /// Overrides the contest type.
  pub contest_type: Option<ContestType>,
  /// Where compiled programs and execution outputs go.
  pub cache_dir: PathBuf,
}

/// The context of one run.
#[derive(Clone, Debug)]
pub struct RunContext {
  /// The task ID (the package directory's name).
  pub task_id: String,
  /// The task's title.
  pub title: String,
  /// The programs to run, sorted.
  pub programs: Vec<Program>,
  /// The tests to run, sorted.
  pub tests: Vec<TestCase>,
  /// The groups of the tests to run, sorted.
  pub groups: Vec<GroupId>,
  /// The groups all of whose tests are being run.
  pub whole_groups: BTreeSet<GroupId>,
  /// Whether every program of the package is being run.
  pub all_programs: bool,
  /// Whether every test of the package is being run.
  pub all_tests: bool,
  /// The score of each group.
  pub scores: BTreeMap<GroupId, u32>,
  /// The limits of each group being run.
  pub limits: BTreeMap<GroupId, Limits>,
  /// The default limits.
  pub default_limits: Limits,
  /// The contest type, which decides scoring.
  pub contest_type: ContestType,
  /// Number of workers.
  pub cpus: usize,
  /// Where compiled programs and execution outputs go.
  pub cache_dir: PathBuf,
}

impl RunContext {
  /// Builds a context from the configuration and the selection of programs
  /// and tests. `package_programs` and `package_tests` are everything in the
  /// package, so we can tell whether the selection covers it all.
  pub fn build(
    task_id: &str,
    config: &PackageConfig,
    options: &RunOptions,
    programs: Vec<Program>,
    tests: Vec<TestCase>,
    package_programs: &[Program],
    package_tests: &[TestCase],
  ) -> Result<Self, JudgeError> {
    let title = config.require_title()?.to_string();
    let mut programs = programs;
    programs.sort();
    programs.dedup();
    let mut tests = tests;
    tests.sort();
    tests.dedup();
    if programs.is_empty() {
      return Err(JudgeError::config("there are no programs to run"));
    }
    if tests.is_empty() {
      return Err(JudgeError::config("there are no tests to run"));
    }
    let groups = groups_of(&tests);
    // scores must cover every group we run
    let scores = config.require_scores()?.clone();
    for g in groups.iter() {
      if !scores.contains_key(g) {
        return Err(JudgeError::config(format!(
          "score for group {} was not defined",
          g
        )));
      }
    }
    let total: u32 = scores.values().sum();
    if total != 100 {
      warn!("Scores sum up to {} (instead of 100).", total);
    }
    // limits, with command-line overrides beating everything
    let default_limits = Limits {
      time_limit: options.time_limit.unwrap_or(config.require_time_limit()?),
      memory_limit: options
        .memory_limit
        .unwrap_or(config.require_memory_limit()?),
    };
    let mut limits: BTreeMap<GroupId, Limits> = BTreeMap::new();
    for g in groups.iter() {
      let gl = Limits {
        time_limit: options.time_limit.unwrap_or(
          config.time_limits.get(g).copied()
            .unwrap_or(default_limits.time_limit)
        ),
        memory_limit: options.memory_limit.unwrap_or(
          config.memory_limits.get(g).copied()
            .unwrap_or(default_limits.memory_limit)
        ),
      };
      if gl.time_limit == 0 || gl.memory_limit == 0 {
        return Err(JudgeError::config(format!(
          "limits for group {} must be positive",
          g
        )));
      }
      limits.insert(*g, gl);
    }
    // which groups are run in full?
    let selected: BTreeSet<(GroupId, &str)> =
      tests.iter().map(|t| t.key()).collect();
    let whole_groups = groups
      .iter()
      .copied()
      .filter(|g| {
        package_tests
          .iter()
          .filter(|t| t.group == *g)
          .all(|t| selected.contains(&t.key()))
      })
      .collect();
    let all_tests = package_tests
      .iter()
      .all(|t| selected.contains(&t.key()));
    let all_programs = package_programs
      .iter()
      .all(|p| programs.iter().any(|q| q.name == p.name));
    let cpus = match options.cpus {
      Some(n) if n > 0 => n,
      _ => num_cpus::get(),
    };
    return Ok(Self {
      task_id: task_id.to_string(),
      title,
      programs,
      tests,
      groups,
      whole_groups,
      all_programs,
      all_tests,
      scores,
      limits,
      default_limits,
      contest_type: options.contest_type.unwrap_or(config.contest_type),
      cpus,
      cache_dir: options.cache_dir.clone(),
    });
  }

  /// The limits of a group (the defaults if the group isn't being run).
  pub fn limits_for(&self, group: GroupId) -> Limits {
    return self.limits.get(&group).copied().unwrap_or(self.default_limits);
  }

  /// The most a group can be worth.
  pub fn group_max(&self, group: GroupId) -> u32 {
    return self.scores.get(&group).copied().unwrap_or(0);
  }

  /// The most a program can score on the groups being run.
  pub fn possible_score(&self) -> u32 {
    return self.groups.iter().map(|g| self.group_max(*g)).sum();
  }

  /// The tests of a group, in order.
  pub fn group_tests(&self, group: GroupId) -> impl Iterator<Item = &TestCase> {
    return self.tests.iter().filter(move |t| t.group == group);
  }

  /// The scoring policy of this run.
  pub fn policy(&self) -> &'static dyn ScoringPolicy {
    return self.contest_type.policy();
  }

  /// Where compiled programs and their logs go.
  pub fn compilation_dir(&self) -> PathBuf {
    return self.cache_dir.join("compilation");
  }

  /// Where execution outputs go, one subdirectory per program.
  pub fn executions_dir(&self) -> PathBuf {
    return self.cache_dir.join("executions");
  }

  /// The path a program is compiled to.
  pub fn executable_path(&self, program: &Program) -> PathBuf {
    return self.compilation_dir().join(program.executable_name());
  }

  /// The path of a program's compilation log.
  pub fn compile_log_path(&self, program: &Program) -> PathBuf {
    return self
      .compilation_dir()
      .join(format!("{}.compile_log", program.name));
  }
}
