//! This module implements utility functions without much need for defining
//! context or not enough of it to warrant them having their own modules.

use std::sync::OnceLock;

use regex::Regex;

/// Splits a string like "500ms" or "1.5 MB" into its number and its unit
/// suffix (trimmed). Returns None if there's no leading number.
pub(crate) fn split_unit(s: &str) -> Option<(f64, &str)> {
  let s = s.trim();
  let end = s
    .char_indices()
    .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
    .map(|(i, _)| i)
    .unwrap_or(s.len());
  let number = s[..end].parse::<f64>().ok()?;
  return Some((number, s[end..].trim()));
}

/// Parses a time with a unit suffix into milliseconds. No suffix means
/// milliseconds.
pub fn parse_time_ms(s: &str) -> Option<u64> {
  let (n, unit) = split_unit(s)?;
  let factor = match unit.to_ascii_lowercase().as_str() {
    "" | "ms" => 1.0,
    "s" => 1000.0,
    "us" | "µs" => 0.001,
    _ => return None,
  };
  return Some((n * factor).round() as u64);
}

/// Parses a memory amount with a unit suffix into kilobytes. No suffix means
/// kilobytes.
pub fn parse_memory_kb(s: &str) -> Option<u64> {
  let (n, unit) = split_unit(s)?;
  let factor = match unit.to_ascii_lowercase().as_str() {
    "" | "k" | "kb" | "kib" => 1.0,
    "m" | "mb" | "mib" => 1024.0,
    "g" | "gb" | "gib" => 1024.0 * 1024.0,
    "b" => 1.0 / 1024.0,
    _ => return None,
  };
  return Some((n * factor).round() as u64);
}

/// Matches terminal control sequences (colours, cursor movement, clearing).
fn markup_regex() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  return RE.get_or_init(|| {
    Regex::new(r"\x1B\[[0-9;?]*[A-Za-z]").expect("bad markup regex")
  });
}

/// Removes terminal colour/cursor control sequences from a string.
pub fn strip_markup(s: &str) -> String {
  return markup_regex().replace_all(s, "").into_owned();
}
