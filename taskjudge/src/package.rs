//! This module implements the identities of what a package contains: the
//! programs (candidate solutions) and the tests, grouped into test groups.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::JudgeError;

/// Test groups are just numbers. Group 0 holds the example tests.
pub type GroupId = u32;

/// Tests whose names end in this tag are examples, and belong to group 0.
pub const EXAMPLE_TAG: &str = "ocen";

/// Source file extensions that programs can have.
pub const PROGRAM_EXTENSIONS: &[&str] = &["cpp", "cc", "c", "py"];

/// Derives the group from a test ID (i.e. the test file's stem without the
/// task ID), like "1a" -> 1 or "2ocen" -> 0.
pub fn group_of(test_id: &str) -> Option<GroupId> {
  if test_id.ends_with(EXAMPLE_TAG) {
    return Some(0);
  }
  let digits: String = test_id
    .chars()
    .take_while(|c| c.is_ascii_digit())
    .collect();
  return digits.parse().ok();
}

/// A single test.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
  /// The test's ID: its file stem without the task ID (e.g. "1a").
  pub id: String,
  /// The group it belongs to.
  pub group: GroupId,
  /// The input file.
  pub input: PathBuf,
  /// The expected output file.
  pub answer: PathBuf,
}

impl TestCase {
  /// Makes a test from the path to its input file, finding the answer in the
  /// given directory.
  pub fn from_input(
    task_id: &str,
    input: &Path,
    answers_dir: &Path,
  ) -> Result<Self, JudgeError> {
    let stem = input
      .file_stem()
      .and_then(|s| s.to_str())
      .ok_or(JudgeError::config(format!(
        "test input {} has no usable name",
        input.display()
      )))?;
    let id = stem.strip_prefix(task_id).unwrap_or(stem).to_string();
    let group = group_of(&id).ok_or(JudgeError::config(format!(
      "cannot tell which group test {} belongs to",
      stem
    )))?;
    return Ok(Self {
      id,
      group,
      input: input.to_path_buf(),
      answer: answers_dir.join(format!("{}.out", stem)),
    });
  }

  /// The sort key for tests: group first, then ID.
  pub fn key(&self) -> (GroupId, &str) {
    return (self.group, self.id.as_str());
  }
}

impl PartialOrd for TestCase {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    return Some(self.cmp(other));
  }
}

impl Ord for TestCase {
  fn cmp(&self, other: &Self) -> Ordering {
    return self.key().cmp(&other.key());
  }
}

/// The kinds of programs, in presentation order.
#[derive(
  Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize
)]
pub enum ProgramKind {
  /// A model solution, like "abc.cpp" or "abc2.cpp".
  Main,
  /// A slow solution, like "abcs.cpp".
  Slow,
  /// A brute-force or wrong solution, like "abcb1.cpp".
  BruteForce,
}

/// The sort key for programs. Purely presentational.
#[derive(
  Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize
)]
pub struct ProgramKey {
  /// Which kind of program.
  pub kind: ProgramKind,
  /// The numeric suffix, 0 if absent.
  pub index: u32,
}

impl ProgramKey {
  /// Works out the key from a file name like "abcs2.cpp".
  pub fn of(task_id: &str, file_name: &str) -> Self {
    let stem = file_name.split('.').next().unwrap_or(file_name);
    let rest = stem.strip_prefix(task_id).unwrap_or(stem);
    let (kind, suffix) = match rest.chars().next() {
      Some('s') => (ProgramKind::Slow, &rest[1..]),
      Some('b') => (ProgramKind::BruteForce, &rest[1..]),
      _ => (ProgramKind::Main, rest),
    };
    return Self {
      kind,
      index: suffix.parse().unwrap_or(0),
    };
  }
}

/// A candidate solution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
  /// The file name, which is also the program's name (e.g. "abc.cpp").
  pub name: String,
  /// Path to the source file.
  pub source: PathBuf,
  /// The sort key.
  pub key: ProgramKey,
}

impl Program {
  /// Makes a program from the path to its source.
  pub fn from_source(task_id: &str, source: &Path) -> Result<Self, JudgeError> {
    let name = source
      .file_name()
      .and_then(|s| s.to_str())
      .ok_or(JudgeError::config(format!(
        "program {} has no usable name",
        source.display()
      )))?
      .to_string();
    return Ok(Self {
      key: ProgramKey::of(task_id, &name),
      name,
      source: source.to_path_buf(),
    });
  }

  /// The file name of the compiled executable (e.g. "abc.e").
  pub fn executable_name(&self) -> String {
    let stem = self.name.split('.').next().unwrap_or(&self.name);
    return format!("{}.e", stem);
  }
}

impl PartialOrd for Program {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    return Some(self.cmp(other));
  }
}

impl Ord for Program {
  fn cmp(&self, other: &Self) -> Ordering {
    return (self.key, &self.name).cmp(&(other.key, &other.name));
  }
}

/// Returns the regex that program file names must match.
pub fn program_regex(task_id: &str) -> Result<Regex, JudgeError> {
  let pattern = format!(
    r"^{}[bs]?[0-9]*\.({})$",
    regex::escape(task_id),
    PROGRAM_EXTENSIONS.join("|")
  );
  return Regex::new(&pattern).map_err(|e| {
    JudgeError::config(format!("bad task ID {}: {}", task_id, e))
  });
}

/// Finds all programs in a directory, sorted.
pub fn discover_programs(
  task_id: &str,
  dir: &Path,
) -> Result<Vec<Program>, JudgeError> {
  let re = program_regex(task_id)?;
  let mut programs: Vec<Program> = Vec::new();
  for entry in std::fs::read_dir(dir)? {
    let path = entry?.path();
    let matches = path
      .file_name()
      .and_then(|n| n.to_str())
      .is_some_and(|n| re.is_match(n));
    if matches && path.is_file() {
      programs.push(Program::from_source(task_id, &path)?);
    }
  }
  programs.sort();
  debug!("Found {} programs in {}.", programs.len(), dir.display());
  return Ok(programs);
}

/// Finds all tests (files ending in ".in") in a directory, sorted. Answers
/// are looked for in `answers_dir`.
pub fn discover_tests(
  task_id: &str,
  inputs_dir: &Path,
  answers_dir: &Path,
) -> Result<Vec<TestCase>, JudgeError> {
  let mut tests: Vec<TestCase> = Vec::new();
  for entry in std::fs::read_dir(inputs_dir)? {
    let path = entry?.path();
    if path.extension().is_some_and(|e| e == "in") && path.is_file() {
      tests.push(TestCase::from_input(task_id, &path, answers_dir)?);
    }
  }
  tests.sort();
  debug!("Found {} tests in {}.", tests.len(), inputs_dir.display());
  return Ok(tests);
}

/// Returns the distinct groups of some tests, sorted.
pub fn groups_of(tests: &[TestCase]) -> Vec<GroupId> {
  return tests
    .iter()
    .map(|t| t.group)
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect();
}
