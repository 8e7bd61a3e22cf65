//! This module prints the comparison of computed and expected scores, and
//! the verdicts of subtask validation.

use crossterm::style::Stylize;
use taskjudge::prelude::*;

/// Prints what differs between the expected and the computed scores.
pub(crate) fn print_validation(result: &ValidationResult) {
  if result.is_empty() {
    println!("{}", "Expected scores are correct!".green().bold());
    return;
  }
  println!("{}", "Expected scores differ from the computed ones:".red().bold());
  for p in result.added_programs.iter() {
    println!("{}", format!("+ program {}", p).green());
  }
  for p in result.removed_programs.iter() {
    println!("{}", format!("- program {}", p).red());
  }
  for g in result.added_groups.iter() {
    println!("{}", format!("+ group {}", g).green());
  }
  for g in result.removed_groups.iter() {
    println!("{}", format!("- group {}", g).red());
  }
  for change in result.changes.iter() {
    let text = format!("~ {}", change);
    let styled = match change.kind() {
      ChangeKind::Status => text.yellow(),
      ChangeKind::Points => text.blue(),
      ChangeKind::Both => text.red(),
    };
    println!("{}", styled);
  }
}

/// Prints the scores that should be in config.yml.
pub(crate) fn print_suggestion(
  suggestion: &ExpectedScores,
) -> Result<(), JudgeError> {
  let yaml = serde_yaml::to_string(suggestion)?;
  println!("{}", "Suggested expected_scores:".bold());
  println!("expected_scores:");
  for line in yaml.lines() {
    println!("  {}", line);
  }
  return Ok(());
}

/// Prints how each subtask's validator did.
pub(crate) fn print_subtasks(verdicts: &[SubtaskVerdict]) {
  if verdicts.iter().all(|v| v.is_ok()) {
    println!("{}", "Subtasks are correct!".green().bold());
    return;
  }
  for v in verdicts.iter() {
    if v.is_ok() {
      println!("{}", format!("  {}", v).green());
    } else {
      println!("{}", format!("! {}", v).red().bold());
    }
  }
}
