//! This module implements the package configuration file (`config.yml`):
//! limits, group scores, contest type, subtasks and the expected scores.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::errors::JudgeError;
use crate::expected::ExpectedScores;
use crate::package::GroupId;
use crate::scoring::ContestType;
use crate::subtasks::Subtasks;

/// Name of the configuration file within a package.
pub const CONFIG_FILE: &str = "config.yml";

/// Key of the expected scores within the configuration file.
pub const EXPECTED_SCORES_KEY: &str = "expected_scores";

/// The contents of a package's configuration file. Required fields are
/// optional here so that their absence can be reported clearly.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PackageConfig {
  /// Title of the task.
  #[serde(default)]
  pub title: Option<String>,
  /// Time limit, in milliseconds.
  #[serde(default)]
  pub time_limit: Option<u64>,
  /// Memory limit, in kilobytes.
  #[serde(default)]
  pub memory_limit: Option<u64>,
  /// Per-group overrides of the time limit.
  #[serde(default)]
  pub time_limits: BTreeMap<GroupId, u64>,
  /// Per-group overrides of the memory limit.
  #[serde(default)]
  pub memory_limits: BTreeMap<GroupId, u64>,
  /// Score of each group.
  #[serde(default)]
  pub scores: Option<BTreeMap<GroupId, u32>>,
  /// How tests and groups are scored.
  #[serde(default)]
  pub contest_type: ContestType,
  /// The expected scores of each program, if recorded.
  #[serde(default)]
  pub expected_scores: Option<ExpectedScores>,
  /// Subtasks and their validators.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub subtasks: Subtasks,
}

impl PackageConfig {
  /// Parses a configuration from YAML text.
  pub fn from_yaml(text: &str) -> Result<Self, JudgeError> {
    return Ok(serde_yaml::from_str(text)?);
  }

  /// Loads the configuration file at a path.
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, JudgeError> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    return Ok(serde_yaml::from_reader(reader)?);
  }

  /// Returns the title, or complains about its absence.
  pub fn require_title(&self) -> Result<&str, JudgeError> {
    return self
      .title
      .as_deref()
      .ok_or(JudgeError::config("title was not defined in config.yml"));
  }

  /// Returns the time limit, or complains about its absence.
  pub fn require_time_limit(&self) -> Result<u64, JudgeError> {
    return self
      .time_limit
      .ok_or(JudgeError::config("time limit was not defined in config.yml"));
  }

  /// Returns the memory limit, or complains about its absence.
  pub fn require_memory_limit(&self) -> Result<u64, JudgeError> {
    return self.memory_limit.ok_or(JudgeError::config(
      "memory limit was not defined in config.yml",
    ));
  }

  /// Returns the group scores, or complains about their absence.
  pub fn require_scores(&self) -> Result<&BTreeMap<GroupId, u32>, JudgeError> {
    return self
      .scores
      .as_ref()
      .ok_or(JudgeError::config("scores were not defined in config.yml"));
  }
}

/// Replaces the expected scores within the YAML text of a configuration,
/// keeping every other key as it was.
pub fn replace_expected_scores(
  text: &str,
  scores: &ExpectedScores,
) -> Result<String, JudgeError> {
  let mut doc: Value = serde_yaml::from_str(text)?;
  if doc.is_null() {
    doc = Value::Mapping(Mapping::new());
  }
  let map = doc.as_mapping_mut().ok_or(JudgeError::config(
    "config.yml does not contain a mapping at the top level",
  ))?;
  map.insert(
    Value::String(EXPECTED_SCORES_KEY.to_string()),
    serde_yaml::to_value(scores)?,
  );
  return Ok(serde_yaml::to_string(&doc)?);
}

/// Rewrites the expected scores of the configuration file at a path.
pub fn save_expected_scores<P: AsRef<Path>>(
  path: P,
  scores: &ExpectedScores,
) -> Result<(), JudgeError> {
  let path = path.as_ref();
  let text = std::fs::read_to_string(path)?;
  let new_text = replace_expected_scores(&text, scores)?;
  let mut writer = BufWriter::new(File::create(path)?);
  writer.write_all(new_text.as_bytes())?;
  writer.flush()?;
  info!("Saved expected scores to {}.", path.display());
  return Ok(());
}
