use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use itertools::Itertools;

use crate::prelude::*;
use crate::util::*;

/// Tests that spawn processes or raise signals take turns, so that no fork
/// inherits a script being written and no signal reaches another run.
static SERIAL: Mutex<()> = Mutex::new(());

/// Waits for our turn.
fn serial() -> MutexGuard<'static, ()> {
  return SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
}

/// A configuration with the usual limits (1000 ms, 2048 KB) and some scores.
fn test_config(scores: &[(GroupId, u32)]) -> PackageConfig {
  return PackageConfig {
    title: Some("Test task".to_string()),
    time_limit: Some(1000),
    memory_limit: Some(2048),
    scores: Some(scores.iter().copied().collect()),
    ..Default::default()
  };
}

/// A context for task "abc" with the given programs and test IDs, all of
/// which make up the whole package.
fn test_context(
  root: &Path,
  programs: &[&str],
  tests: &[&str],
  scores: &[(GroupId, u32)],
) -> RunContext {
  let programs: Vec<Program> = programs
    .iter()
    .map(|p| Program::from_source("abc", &root.join("prog").join(p)).unwrap())
    .collect();
  let tests: Vec<TestCase> = tests
    .iter()
    .map(|t| {
      let input = root.join("in").join(format!("abc{}.in", t));
      TestCase::from_input("abc", &input, &root.join("out")).unwrap()
    })
    .collect();
  let options = RunOptions {
    cpus: Some(2),
    cache_dir: root.join("cache"),
    ..Default::default()
  };
  return RunContext::build(
    "abc",
    &test_config(scores),
    &options,
    programs.clone(),
    tests.clone(),
    &programs,
    &tests,
  )
  .unwrap();
}

/// A finished result.
fn finished(status: Status, time: u64, memory: u64, points: u32) -> ExecutionResult {
  return ExecutionResult {
    status,
    time: Some(time),
    memory: Some(memory),
    points,
    error: None,
  };
}

/// Shorthand for a scored group outcome.
fn outcome(status: Status, points: u32) -> GroupOutcome {
  return GroupOutcome { status, points };
}

#[test]
fn test_merge_statuses() {
  let statuses: Vec<Status> = Status::all()
    .iter()
    .copied()
    .filter(|s| s.severity().is_some())
    .collect();
  for k in 1..=4 {
    for perm in statuses.iter().copied().permutations(k) {
      let worst = *perm.iter().max_by_key(|s| s.severity()).unwrap();
      assert_eq!(merge_statuses(perm.clone()), worst);
      // merging again changes nothing
      let doubled = perm.iter().chain(perm.iter()).copied();
      assert_eq!(merge_statuses(doubled), worst);
    }
  }
  // the severity order itself
  use Status::*;
  let order = [Accepted, WrongAnswer, RuntimeError, MemoryLimit, TimeLimit, CompileError];
  for (a, b) in order.iter().tuple_windows() {
    assert!(b.is_more_severe_than(a));
    assert_eq!(update_group_status(*a, *b), *b);
    assert_eq!(update_group_status(*b, *a), *b);
  }
  assert_eq!(update_group_status(TimeLimit, TimeLimit), TimeLimit);
  // pending is never merged in
  assert_eq!(merge_statuses(Vec::new()), Pending);
  assert_eq!(merge_statuses([Pending]), Pending);
  assert_eq!(merge_statuses([Pending, WrongAnswer, Pending]), WrongAnswer);
  assert_eq!(update_group_status(Accepted, Pending), Accepted);
}

#[test]
fn test_status_codes() {
  assert_eq!("ok".parse::<Status>(), Ok(Status::Accepted));
  assert_eq!("TL".parse::<Status>(), Ok(Status::TimeLimit));
  assert_eq!("TLE".parse::<Status>(), Err(()));
  assert_eq!(format!("{:>3}", Status::WrongAnswer), " WA");
  assert_eq!(Status::CompileError.to_string(), "CE");
}

#[test]
fn test_units() {
  assert_eq!(parse_time_ms("500ms"), Some(500));
  assert_eq!(parse_time_ms("1.5s"), Some(1500));
  assert_eq!(parse_time_ms("250"), Some(250));
  assert_eq!(parse_time_ms("3 min"), None);
  assert_eq!(parse_time_ms(""), None);
  assert_eq!(parse_memory_kb("1024K"), Some(1024));
  assert_eq!(parse_memory_kb("1024 KB"), Some(1024));
  assert_eq!(parse_memory_kb("2MB"), Some(2048));
  assert_eq!(parse_memory_kb("2048b"), Some(2));
  assert_eq!(parse_memory_kb("lots"), None);
  assert_eq!(strip_markup("\x1B[1m\x1B[38;5;10m OK\x1B[0m 40/ 40"), " OK 40/ 40");
  assert_eq!(strip_markup("\x1B[3A\x1B[0Jplain"), "plain");
}

#[test]
fn test_interpret_report() {
  let limits = Limits { time_limit: 1000, memory_limit: 2048 };
  let exited = SandboxExit::Finished(Some(0));
  let interpret = |text: &str| interpret_report(exited, &parse_report(text), limits);
  // a plain OK
  let report = parse_report("Status: OK\nTime: 500ms\nMemory: 1024K\nnoise\n");
  assert_eq!(report.len(), 3);
  let r = interpret_report(exited, &report, limits);
  assert_eq!(r.status, Status::Accepted);
  assert_eq!(r.time, Some(500));
  assert_eq!(r.memory, Some(1024));
  assert_eq!(r.error, None);
  // the sandbox said OK, the numbers say otherwise
  let r = interpret("Status: OK\nTime: 1500ms\nMemory: 1024K\n");
  assert_eq!(r.status, Status::TimeLimit);
  assert_eq!(r.time, Some(1500));
  let r = interpret("Status: OK\nTime: 100ms\nMemory: 4096K\n");
  assert_eq!(r.status, Status::MemoryLimit);
  let r = interpret("Status: OK\nTime: 1500ms\nMemory: 4096K\n");
  assert_eq!(r.status, Status::TimeLimit);
  // right at the limit is fine
  let r = interpret("Status: OK\nTime: 1000ms\nMemory: 2048K\n");
  assert_eq!(r.status, Status::Accepted);
  // statuses as reported
  assert_eq!(interpret("Status: TLE\nTime: 1000ms\n").status, Status::TimeLimit);
  assert_eq!(interpret("Status: MLE\n").status, Status::MemoryLimit);
  let r = interpret("Status: RE (signal 11)\n");
  assert_eq!(r.status, Status::RuntimeError);
  assert_eq!(r.error, None);
  let r = interpret("Status: ??\n");
  assert_eq!(r.status, Status::RuntimeError);
  assert!(r.error.is_some());
  // no status at all
  let r = interpret("Time: 10ms\n");
  assert_eq!(r.status, Status::RuntimeError);
  assert!(r.error.is_some());
  // timeouts, whatever the report says
  let ok = parse_report("Status: OK\nTime: 10ms\nMemory: 10K\n");
  let r = interpret_report(SandboxExit::Finished(Some(TIMEOUT_WAIT_STATUS)), &ok, limits);
  assert_eq!(r.status, Status::TimeLimit);
  assert_eq!(r.time, None);
  let r = interpret_report(SandboxExit::DeadlineExceeded, &ok, limits);
  assert_eq!(r.status, Status::TimeLimit);
  assert_eq!(hard_deadline(1000), Duration::from_millis(2000));
}

#[test]
fn test_time_output() {
  let limits = Limits { time_limit: 1000, memory_limit: 2048 };
  let exited = SandboxExit::Finished(Some(0));
  assert_eq!(parse_time_output("0.50\n1024\n0\n"), Some((500, 1024, 0)));
  let failed = "Command exited with non-zero status 1\n0.10\n900\n1\n";
  assert_eq!(parse_time_output(failed), Some((100, 900, 1)));
  assert_eq!(parse_time_output("0.10\n"), None);
  let r = interpret_time_output(exited, "0.50\n1024\n0\n", limits);
  assert_eq!(r.status, Status::Accepted);
  assert_eq!(interpret_time_output(exited, failed, limits).status, Status::RuntimeError);
  let r = interpret_time_output(exited, "1.20\n1024\n0\n", limits);
  assert_eq!(r.status, Status::TimeLimit);
  let r = interpret_time_output(exited, "0.20\n3000\n0\n", limits);
  assert_eq!(r.status, Status::MemoryLimit);
  let r = interpret_time_output(exited, "garbage", limits);
  assert_eq!(r.status, Status::RuntimeError);
  assert!(r.error.is_some());
  let r = interpret_time_output(SandboxExit::DeadlineExceeded, "", limits);
  assert_eq!(r.status, Status::TimeLimit);
  // %x is 0 for a command killed by a signal
  let killed = "Command terminated by signal 11\n0.01\n900\n0\n";
  let r = interpret_time_output(SandboxExit::Finished(Some(139 << 8)), killed, limits);
  assert_eq!((r.status, r.time, r.error), (Status::RuntimeError, Some(10), None));
  let r = interpret_time_output(exited, killed, limits);
  assert_eq!(r.status, Status::RuntimeError);
  // time failed, yet says the command was fine
  let r = interpret_time_output(SandboxExit::Finished(Some(1 << 8)), "0.01\n900\n0\n", limits);
  assert_eq!(r.status, Status::RuntimeError);
  assert!(r.error.is_some());
}

#[test]
fn test_checker_output() {
  let ok = |correct: bool, points: u32| -> Result<CheckOutcome, String> {
    return Ok(CheckOutcome { correct, points });
  };
  assert_eq!(parse_checker_output("OK\nwell done\n87\n"), ok(true, 87));
  assert_eq!(parse_checker_output("OK\n"), ok(true, 100));
  assert_eq!(parse_checker_output("OK\n\n\n"), ok(true, 100));
  assert_eq!(parse_checker_output("WRONG\n"), ok(false, 0));
  assert_eq!(parse_checker_output("WRONG\nno\n50\n"), ok(false, 0));
  assert!(parse_checker_output("").is_err());
  assert!(parse_checker_output("\n").is_err());
  assert!(parse_checker_output("OK\n\n101\n").is_err());
  assert!(parse_checker_output("OK\n\nmany\n").is_err());
  // line comparison
  assert!(compare_lines("1 2 \n3\n\n\n", "1 2\n3"));
  assert!(compare_lines("", "\n\n"));
  assert!(!compare_lines("1 2\n", "1  2\n"));
  assert!(!compare_lines("1\n2\n", "1\n\n2\n"));
}

#[test]
fn test_package_identities() {
  assert_eq!(group_of("1a"), Some(1));
  assert_eq!(group_of("12b"), Some(12));
  assert_eq!(group_of("0ocen"), Some(0));
  assert_eq!(group_of("2ocen"), Some(0));
  assert_eq!(group_of("x"), None);
  let re = program_regex("abc").unwrap();
  assert!(re.is_match("abc.cpp"));
  assert!(re.is_match("abcs2.py"));
  assert!(re.is_match("abcb10.c"));
  assert!(!re.is_match("abcchk.cpp"));
  assert!(!re.is_match("abc.java"));
  assert!(!re.is_match("xabc.cpp"));
  let names = ["abcb1.cpp", "abcs2.cpp", "abc.cpp", "abcb.py", "abcs.cpp", "abc2.cpp"];
  let sorted: Vec<String> = names
    .iter()
    .map(|n| Program::from_source("abc", Path::new(n)).unwrap())
    .sorted()
    .map(|p| p.name)
    .collect();
  let expected = ["abc.cpp", "abc2.cpp", "abcs.cpp", "abcs2.cpp", "abcb.py", "abcb1.cpp"];
  assert_eq!(sorted, expected);
  let p = Program::from_source("abc", Path::new("prog/abcs2.cpp")).unwrap();
  assert_eq!(p.executable_name(), "abcs2.e");
  let t = TestCase::from_input("abc", Path::new("in/abc3b.in"), Path::new("out")).unwrap();
  assert_eq!((t.id.as_str(), t.group), ("3b", 3));
  assert_eq!(t.answer, Path::new("out/abc3b.out"));
}

#[test]
fn test_scoring_policies() {
  let ok = |time: u64, points: u32| finished(Status::Accepted, time, 100, points);
  let wa = finished(Status::WrongAnswer, 10, 100, 0);
  let default = ContestType::Default.policy();
  assert_eq!(default.test_score(&ok(900, 87), 1000, 2048), 87);
  assert_eq!(default.test_score(&wa, 1000, 2048), 0);
  assert_eq!(default.group_score(&[100, 50], 40), 20);
  assert_eq!(default.group_score(&[], 40), 0);
  let oi = ContestType::Oi.policy();
  assert_eq!(oi.test_score(&ok(400, 100), 1000, 2048), 100);
  assert_eq!(oi.test_score(&ok(500, 100), 1000, 2048), 100);
  assert_eq!(oi.test_score(&ok(750, 100), 1000, 2048), 50);
  assert_eq!(oi.test_score(&ok(1000, 100), 1000, 2048), 1);
  assert_eq!(oi.test_score(&ok(1001, 100), 1000, 2048), 0);
  assert_eq!(oi.test_score(&ok(750, 50), 1000, 2048), 25);
  let icpc = ContestType::Icpc.policy();
  assert_eq!(icpc.test_score(&ok(999, 10), 1000, 2048), 100);
  assert_eq!(icpc.group_score(&[100, 100], 60), 60);
  assert_eq!(icpc.group_score(&[100, 0], 60), 0);
  let names: Vec<&str> = ContestType::all().iter().map(|c| c.small_lc_name()).collect();
  assert_eq!(names, ["default", "oi", "icpc"]);
}

#[test]
fn test_context_validation() {
  let root = Path::new("/nonexistent");
  let programs = vec![Program::from_source("abc", &root.join("abc.cpp")).unwrap()];
  let tests = vec![
    TestCase::from_input("abc", &root.join("abc1a.in"), root).unwrap(),
    TestCase::from_input("abc", &root.join("abc2a.in"), root).unwrap(),
  ];
  let options = RunOptions::default();
  let build = |config: &PackageConfig| {
    RunContext::build("abc", config, &options, programs.clone(), tests.clone(), &programs, &tests)
  };
  // group 2 has no score
  let err = build(&test_config(&[(1, 100)])).unwrap_err();
  assert!(matches!(err, JudgeError::Configuration(_)));
  let mut config = test_config(&[(1, 40), (2, 60)]);
  config.title = None;
  assert!(matches!(build(&config), Err(JudgeError::Configuration(_))));
  let mut config = test_config(&[(1, 40), (2, 60)]);
  config.time_limits.insert(2, 3000);
  let ctx = build(&config).unwrap();
  assert_eq!(ctx.limits_for(1).time_limit, 1000);
  assert_eq!(ctx.limits_for(2).time_limit, 3000);
  assert_eq!(ctx.whole_groups, BTreeSet::from([1, 2]));
  assert!(ctx.all_programs && ctx.all_tests);
  assert!(ctx.cpus > 0);
  // running a part of the package
  let ctx = RunContext::build(
    "abc",
    &config,
    &options,
    programs.clone(),
    tests[..1].to_vec(),
    &programs,
    &tests,
  )
  .unwrap();
  assert_eq!(ctx.groups, [1]);
  assert!(!ctx.all_tests);
  assert_eq!(ctx.possible_score(), 40);
  // no limit may be zero
  let mut config = test_config(&[(1, 40), (2, 60)]);
  config.memory_limits.insert(1, 0);
  assert!(matches!(build(&config), Err(JudgeError::Configuration(_))));
}

#[test]
fn test_aggregation() {
  let root = Path::new("/nonexistent");
  let ctx = test_context(root, &["abc.cpp"], &["1a", "1b", "2a", "2b"], &[(1, 40), (2, 60)]);
  let mut state = AggregateState::new(&ctx);
  assert_eq!(state.finished(), 0);
  assert_eq!(state.group_view(&ctx, "abc.cpp", 1), GroupView::Pending);
  let ok = finished(Status::Accepted, 500, 1024, 100);
  state.fold("abc.cpp", 1, "1a", ok.clone());
  state.fold("abc.cpp", 1, "1b", ok.clone());
  state.fold("abc.cpp", 2, "2a", ok.clone());
  assert_eq!(state.group_view(&ctx, "abc.cpp", 1), GroupView::Finished(outcome(Status::Accepted, 40)));
  assert_eq!(state.group_view(&ctx, "abc.cpp", 2), GroupView::Pending);
  assert_eq!(state.program_points(&ctx, "abc.cpp"), 40);
  state.fold("abc.cpp", 2, "2b", finished(Status::WrongAnswer, 100, 512, 0));
  assert_eq!(state.group_view(&ctx, "abc.cpp", 2), GroupView::Finished(outcome(Status::WrongAnswer, 0)));
  assert_eq!(state.program_points(&ctx, "abc.cpp"), 40);
  assert_eq!(state.program_max_time(&ctx, "abc.cpp"), Some(Peak { value: 500, limit: 1000 }));
  assert_eq!(state.program_max_memory(&ctx, "abc.cpp"), Some(Peak { value: 1024, limit: 2048 }));
  assert_eq!(state.finished(), 4);
  // a timeout without a measurement counts as twice the limit
  state.fold("abc.cpp", 2, "2b", ExecutionResult::with_status(Status::TimeLimit));
  assert_eq!(state.program_max_time(&ctx, "abc.cpp"), Some(Peak { value: 2000, limit: 1000 }));
  assert_eq!(state.program_max_memory(&ctx, "abc.cpp"), Some(Peak { value: 1024, limit: 2048 }));
  // partial points: the weakest test decides
  state.fold("abc.cpp", 1, "1b", finished(Status::Accepted, 500, 1024, 50));
  assert_eq!(state.group_view(&ctx, "abc.cpp", 1), GroupView::Finished(outcome(Status::Accepted, 20)));
  let computed = state.computed_expected(&ctx);
  let pe = &computed.programs["abc.cpp"];
  assert_eq!(pe.points, 20);
  assert_eq!(pe.expected[&1], GroupExpectation::Scored(outcome(Status::Accepted, 20)));
  assert_eq!(pe.expected[&2], GroupExpectation::Scored(outcome(Status::TimeLimit, 0)));
}

#[test]
fn test_snapshots() {
  let root = Path::new("/nonexistent");
  let ctx = test_context(root, &["abc.cpp", "abcs.cpp"], &["1a"], &[(1, 100)]);
  let mut aggregator = Aggregator::new(&ctx);
  let before = aggregator.snapshot();
  let unit = WorkUnit {
    program: ctx.programs[0].clone(),
    executable: Executable::Failed,
    test: ctx.tests[0].clone(),
    limits: ctx.default_limits,
  };
  aggregator.record(&Completed { unit, result: ExecutionResult::compile_error() });
  let after = aggregator.snapshot();
  assert_eq!((before.done, before.total), (0, 2));
  assert_eq!((after.done, after.total), (1, 2));
  assert_eq!(before.state.result("abc.cpp", 1, "1a"), Some(&ExecutionResult::pending()));
  assert_eq!(after.state.result("abc.cpp", 1, "1a"), Some(&ExecutionResult::compile_error()));
  assert!(after.state.has_compile_errors());
  assert!(!before.state.has_compile_errors());
}

#[test]
fn test_render() {
  let root = Path::new("/nonexistent");
  let ctx = test_context(root, &["abc.cpp", "abcb.cpp"], &["1a", "2a"], &[(1, 40), (2, 60)]);
  let mut state = AggregateState::new(&ctx);
  state.fold("abc.cpp", 1, "1a", finished(Status::Accepted, 500, 1024, 100));
  state.fold("abc.cpp", 2, "2a", finished(Status::WrongAnswer, 100, 512, 0));
  state.fold("abcb.cpp", 1, "1a", finished(Status::Accepted, 900, 1024, 100));
  let snapshot = Snapshot { state: Arc::new(state), done: 3, total: 4 };
  let progress = render_progress(&ctx, &snapshot);
  assert_eq!(progress, "Done    3/   4. Time remaining (in the worst case):     1 seconds.\n");
  let options = ReportOptions { verbose: true, show_memory: true };
  let text = strip_markup(&render(&ctx, &snapshot, options));
  let lines: Vec<&str> = text.lines().collect();
  assert_eq!(lines[0], "groups |     abc.cpp |    abcb.cpp |");
  assert_eq!(lines[1], "------ | ----------- | ----------- |");
  assert_eq!(lines[2], "     1 |  OK  40/ 40 |  OK  40/ 40 |");
  assert_eq!(lines[3], "     2 |  WA ---/ 60 |  ??   ?/ 60 |");
  assert_eq!(lines[5], "points |      40/100 |      40/100 |");
  assert_eq!(lines[6], "  time |       500ms |       900ms |");
  assert_eq!(lines[7], "memory |      1024KB |      1024KB |");
  assert_eq!(lines[9], "    1a |  OK   500ms |  OK   900ms |");
  assert_eq!(lines[10], "       |      1024KB |      1024KB |");
  assert_eq!(lines[11], "    2a |  WA   100ms |             |");
  // programs beyond eight go in another block
  let many: Vec<String> = (1..=9).map(|i| format!("abc{}.cpp", i)).collect();
  let many: Vec<&str> = many.iter().map(|s| s.as_str()).collect();
  let ctx = test_context(root, &many, &["1a"], &[(1, 100)]);
  let snapshot = Snapshot { state: Arc::new(AggregateState::new(&ctx)), done: 0, total: 9 };
  let text = strip_markup(&render(&ctx, &snapshot, ReportOptions::default()));
  assert_eq!(text.lines().filter(|l| l.starts_with("groups")).count(), 2);
}

#[test]
fn test_diff_regression() {
  let old: ExpectedScores = serde_yaml::from_str(
    "abc.cpp:\n  expected:\n    1: OK\n  points: 40\n",
  )
  .unwrap();
  let mut new = ExpectedScores::default();
  new.programs.insert("abc.cpp".to_string(), ProgramExpectation {
    expected: BTreeMap::from([(1, outcome(Status::WrongAnswer, 0).into())]),
    points: 0,
  });
  let scope = DiffScope {
    programs: BTreeSet::from(["abc.cpp".to_string()]),
    groups: BTreeSet::from([1]),
    all_programs: true,
    all_tests: true,
    scores: BTreeMap::from([(1, 40)]),
  };
  let result = diff(&old, &new, &scope);
  assert!(!result.is_empty());
  assert!(result.added_programs.is_empty() && result.removed_programs.is_empty());
  assert!(result.added_groups.is_empty() && result.removed_groups.is_empty());
  assert_eq!(result.changes, vec![ScoreChange {
    program: "abc.cpp".to_string(),
    group: 1,
    old: outcome(Status::Accepted, 40),
    new: outcome(Status::WrongAnswer, 0),
  }]);
  assert_eq!(result.changes[0].kind(), ChangeKind::Both);
  // the same scores, written the short way, are no change at all
  let mut same = ExpectedScores::default();
  same.programs.insert("abc.cpp".to_string(), ProgramExpectation {
    expected: BTreeMap::from([(1, outcome(Status::Accepted, 40).into())]),
    points: 40,
  });
  assert!(diff(&old, &same, &scope).is_empty());
}

#[test]
fn test_diff_apply() {
  let scores = BTreeMap::from([(1, 40), (2, 40), (3, 20)]);
  let old: ExpectedScores = serde_yaml::from_str(concat!(
    "a.cpp:\n  expected:\n    1: OK\n    2: OK\n  points: 80\n",
    "b.cpp:\n  expected:\n    1: WA\n    2: {status: OK, points: 10}\n  points: 10\n",
    "gone.cpp:\n  expected:\n    1: OK\n    4: OK\n  points: 40\n",
  ))
  .unwrap();
  let program = |groups: &[(GroupId, Status, u32)]| ProgramExpectation {
    expected: groups.iter().map(|(g, s, p)| (*g, outcome(*s, *p).into())).collect(),
    points: groups.iter().map(|(_, _, p)| p).sum(),
  };
  let mut new = ExpectedScores::default();
  new.programs.insert("a.cpp".to_string(), program(&[
    (1, Status::Accepted, 40),
    (2, Status::TimeLimit, 0),
    (3, Status::Accepted, 20),
  ]));
  new.programs.insert("b.cpp".to_string(), program(&[
    (1, Status::WrongAnswer, 0),
    (2, Status::Accepted, 20),
    (3, Status::Accepted, 20),
  ]));
  new.programs.insert("c.cpp".to_string(), program(&[(1, Status::Accepted, 40)]));
  let scope = DiffScope {
    programs: new.programs.keys().cloned().collect(),
    groups: BTreeSet::from([1, 2, 3]),
    all_programs: true,
    all_tests: true,
    scores: scores.clone(),
  };
  let result = diff(&old, &new, &scope);
  assert_eq!(result.added_programs, BTreeSet::from(["c.cpp".to_string()]));
  assert_eq!(result.removed_programs, BTreeSet::from(["gone.cpp".to_string()]));
  assert_eq!(result.added_groups, BTreeSet::from([3]));
  assert!(result.removed_groups.is_empty());
  let kinds: Vec<(&str, GroupId, ChangeKind)> = result
    .changes
    .iter()
    .map(|c| (c.program.as_str(), c.group, c.kind()))
    .collect();
  assert_eq!(kinds, [("a.cpp", 2, ChangeKind::Both), ("b.cpp", 2, ChangeKind::Points)]);
  let mut once = old.clone();
  apply_suggestions(&mut once, &result, &scores);
  let mut twice = once.clone();
  apply_suggestions(&mut twice, &result, &scores);
  assert_eq!(once, twice);
  assert!(!once.programs.contains_key("gone.cpp"));
  assert_eq!(once.programs["a.cpp"].points, 60);
  assert_eq!(once.programs["b.cpp"].points, 40);
  assert_eq!(once.programs["c.cpp"].points, 40);
  // after applying, the same run finds nothing new
  assert!(diff(&once, &new, &scope).is_empty());
}

#[test]
fn test_diff_scope() {
  let scores = BTreeMap::from([(1, 50), (2, 50), (5, 0)]);
  let old: ExpectedScores = serde_yaml::from_str(concat!(
    "a.cpp:\n  expected:\n    1: OK\n    2: OK\n    5: OK\n  points: 100\n",
    "z.cpp:\n  expected:\n    1: OK\n  points: 50\n",
  ))
  .unwrap();
  let mut new = ExpectedScores::default();
  new.programs.insert("a.cpp".to_string(), ProgramExpectation {
    expected: BTreeMap::from([(1, outcome(Status::Accepted, 50).into())]),
    points: 50,
  });
  // only group 1 of a.cpp was run: nothing else counts
  let mut scope = DiffScope {
    programs: BTreeSet::from(["a.cpp".to_string()]),
    groups: BTreeSet::from([1]),
    all_programs: false,
    all_tests: false,
    scores,
  };
  let result = diff(&old, &new, &scope);
  assert!(result.is_empty());
  assert_eq!(result.expected_scores.programs.len(), 1);
  assert_eq!(result.expected_scores.programs["a.cpp"].expected.len(), 1);
  // with everything run, what's missing was removed
  scope.all_programs = true;
  scope.all_tests = true;
  let result = diff(&old, &new, &scope);
  assert_eq!(result.removed_programs, BTreeSet::from(["z.cpp".to_string()]));
  assert_eq!(result.removed_groups, BTreeSet::from([2, 5]));
}

#[test]
fn test_save_expected_scores() {
  let text = "title: Some task\ntime_limit: 1000\nmemory_limit: 2048\nscores:\n  1: 100\nexpected_scores:\n  abc.cpp:\n    expected:\n      1: OK\n    points: 100\n";
  let config = PackageConfig::from_yaml(text).unwrap();
  assert_eq!(config.expected_scores.as_ref().unwrap().programs["abc.cpp"].points, 100);
  let mut scores = ExpectedScores::default();
  scores.programs.insert("abc.cpp".to_string(), ProgramExpectation {
    expected: BTreeMap::from([(1, outcome(Status::WrongAnswer, 0).into())]),
    points: 0,
  });
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join(CONFIG_FILE);
  std::fs::write(&path, text).unwrap();
  save_expected_scores(&path, &scores).unwrap();
  let saved = PackageConfig::load(&path).unwrap();
  assert_eq!(saved.title.as_deref(), Some("Some task"));
  assert_eq!(saved.time_limit, Some(1000));
  assert_eq!(saved.scores, Some(BTreeMap::from([(1, 100)])));
  assert_eq!(saved.expected_scores, Some(scores));
}

#[cfg(unix)]
#[test]
fn test_python_launcher() {
  use std::os::unix::fs::PermissionsExt;
  let dir = tempfile::tempdir().unwrap();
  let source = dir.path().join("abc.py");
  std::fs::write(&source, "print(input())\n").unwrap();
  let output = dir.path().join("compilation").join("abc.e");
  let log = dir.path().join("compilation").join("abc.compile_log");
  compile(&source, &output, &Toolchain::default(), &[], &log).unwrap();
  let script = std::fs::read_to_string(&output).unwrap();
  assert!(script.starts_with("#!/bin/sh\n"));
  assert!(script.contains("exec python3"));
  let mode = std::fs::metadata(&output).unwrap().permissions().mode();
  assert_eq!(mode & 0o777, 0o755);
  let err = compile(&dir.path().join("abc.rb"), &output, &Toolchain::default(), &[], &log).unwrap_err();
  assert_eq!(err.program, "abc.rb");
  assert!(err.reason.is_some());
}

/// Sets up task "abc" with one test ("42" in, "42" out), a program that
/// echoes its input and a fake sandbox, and schedules the program on the
/// test. Scripts are run through `/bin/sh` rather than executed directly.
#[cfg(unix)]
fn run_with_fake_sandbox(
  sandbox_script: &str,
  checker: OutputChecker,
  limits: Limits,
  cancel: CancelToken,
) -> Vec<Result<Completed, JudgeError>> {
  let _turn = serial();
  let dir = tempfile::tempdir().unwrap();
  let root = dir.path();
  for sub in ["in", "out", "prog"] {
    std::fs::create_dir_all(root.join(sub)).unwrap();
  }
  std::fs::write(root.join("in/abc1a.in"), "42\n").unwrap();
  std::fs::write(root.join("out/abc1a.out"), "42\n").unwrap();
  std::fs::write(root.join("prog/abc.sh"), "cat\n").unwrap();
  std::fs::write(root.join("sandbox.sh"), sandbox_script).unwrap();
  let sandbox = ReportingSandbox {
    command: vec!["/bin/sh".into(), root.join("sandbox.sh").into_os_string()],
  };
  let executions = root.join("cache/executions");
  let scheduler = Scheduler::new(
    Arc::new(sandbox),
    Arc::new(checker),
    1,
    executions.clone(),
    cancel,
  );
  let unit = WorkUnit {
    program: Program::from_source("abc", &root.join("prog/abc.cpp")).unwrap(),
    executable: Executable::Compiled(root.join("prog/abc.sh")),
    test: TestCase::from_input("abc", &root.join("in/abc1a.in"), &root.join("out")).unwrap(),
    limits,
  };
  let results: Vec<_> = scheduler.schedule(vec![unit]).unwrap().collect();
  assert!(executions.join("abc.cpp").is_dir());
  return results;
}

/// A fake sandbox that runs the program and reports fixed numbers.
#[cfg(unix)]
const REPORTING_SANDBOX: &str = "/bin/sh \"$1\"\necho 'Status: OK' >&2\necho 'Time: 500ms' >&2\necho 'Memory: 1024K' >&2\n";

#[cfg(unix)]
#[test]
fn test_execution_ok() {
  let limits = Limits { time_limit: 1000, memory_limit: 2048 };
  let mut results = run_with_fake_sandbox(REPORTING_SANDBOX, OutputChecker::Exact, limits, CancelToken::new());
  assert_eq!(results.len(), 1);
  let completed = results.remove(0).unwrap();
  assert_eq!(completed.result, finished(Status::Accepted, 500, 1024, 100));
  assert_eq!(completed.unit.test.id, "1a");
  // same run, tighter memory
  let limits = Limits { time_limit: 1000, memory_limit: 1000 };
  let mut results = run_with_fake_sandbox(REPORTING_SANDBOX, OutputChecker::Exact, limits, CancelToken::new());
  assert_eq!(results.remove(0).unwrap().result.status, Status::MemoryLimit);
}

#[cfg(unix)]
#[test]
fn test_execution_checkers() {
  let limits = Limits { time_limit: 1000, memory_limit: 2048 };
  // echo prints its arguments, which is not "OK"
  let checker = OutputChecker::External("/bin/echo".into());
  let mut results = run_with_fake_sandbox(REPORTING_SANDBOX, checker, limits, CancelToken::new());
  let result = results.remove(0).unwrap().result;
  assert_eq!((result.status, result.points), (Status::WrongAnswer, 0));
  // true prints nothing, which is a broken checker
  let checker = OutputChecker::External("/bin/true".into());
  let mut results = run_with_fake_sandbox(REPORTING_SANDBOX, checker, limits, CancelToken::new());
  match results.remove(0) {
    Err(JudgeError::CheckerOutput { program, test, .. }) => {
      assert_eq!((program.as_str(), test.as_str()), ("abc.cpp", "1a"));
    },
    other => panic!("expected a checker failure, got {:?}", other),
  }
}

#[cfg(unix)]
#[test]
fn test_execution_deadline() {
  let sandbox = "echo 'Status: OK' >&2\necho 'Time: 10ms' >&2\nsleep 5\n";
  let limits = Limits { time_limit: 100, memory_limit: 2048 };
  let started = Instant::now();
  let mut results = run_with_fake_sandbox(sandbox, OutputChecker::Exact, limits, CancelToken::new());
  assert!(started.elapsed() < Duration::from_secs(4));
  let result = results.remove(0).unwrap().result;
  assert_eq!(result.status, Status::TimeLimit);
  assert_eq!(result.time, None);
}

#[cfg(unix)]
#[test]
fn test_execution_cancelled() {
  let cancel = CancelToken::new();
  let canceller = cancel.clone();
  std::thread::spawn(move || {
    std::thread::sleep(Duration::from_millis(200));
    canceller.cancel();
  });
  let limits = Limits { time_limit: 20000, memory_limit: 2048 };
  let started = Instant::now();
  let results = run_with_fake_sandbox("sleep 30\n", OutputChecker::Exact, limits, cancel);
  assert!(started.elapsed() < Duration::from_secs(10));
  assert_eq!(results.len(), 1);
  assert!(matches!(results[0], Err(JudgeError::Interrupted)));
}

#[test]
fn test_schedule_validation() {
  let _turn = serial();
  let dir = tempfile::tempdir().unwrap();
  let root = dir.path();
  let ctx = test_context(root, &["abc.cpp", "abcs.cpp"], &["1a", "1b"], &[(1, 100)]);
  let sandbox = ReportingSandbox::new("/nonexistent/sandbox");
  let scheduler = Scheduler::new(
    Arc::new(sandbox),
    Arc::new(OutputChecker::Exact),
    2,
    ctx.executions_dir(),
    CancelToken::new(),
  );
  let unit = |p: usize, t: usize, executable: Executable| WorkUnit {
    program: ctx.programs[p].clone(),
    executable,
    test: ctx.tests[t].clone(),
    limits: ctx.default_limits,
  };
  // twice the same pair
  let units = vec![unit(0, 0, Executable::Failed), unit(0, 0, Executable::Failed)];
  assert!(matches!(scheduler.schedule(units), Err(JudgeError::Configuration(_))));
  // zero limits
  let mut bad = unit(0, 0, Executable::Failed);
  bad.limits.time_limit = 0;
  assert!(matches!(scheduler.schedule(vec![bad]), Err(JudgeError::Configuration(_))));
  // programs that didn't compile never reach the sandbox
  let units = vec![
    unit(1, 1, Executable::Failed),
    unit(0, 0, Executable::Failed),
    unit(0, 1, Executable::Failed),
  ];
  let results: Vec<Completed> = scheduler
    .schedule(units)
    .unwrap()
    .collect::<Result<_, _>>()
    .unwrap();
  assert_eq!(results.len(), 3);
  assert!(results.iter().all(|c| c.result == ExecutionResult::compile_error()));
  let order: Vec<(&str, &str)> = results
    .iter()
    .map(|c| (c.unit.program.name.as_str(), c.unit.test.id.as_str()))
    .collect();
  assert_eq!(order, [("abc.cpp", "1a"), ("abc.cpp", "1b"), ("abcs.cpp", "1b")]);
  assert!(ctx.executions_dir().join("abcs.cpp").is_dir());
}

#[test]
fn test_summary_limits() {
  let root = Path::new("/nonexistent");
  let mut config = test_config(&[(1, 40), (2, 60)]);
  config.time_limits.insert(2, 5000);
  config.memory_limits.insert(2, 8192);
  let programs = vec![Program::from_source("abc", &root.join("prog/abc.cpp")).unwrap()];
  let tests: Vec<TestCase> = ["1a", "2a"]
    .iter()
    .map(|t| TestCase::from_input("abc", &root.join(format!("in/abc{}.in", t)), root).unwrap())
    .collect();
  let options = RunOptions { cpus: Some(2), cache_dir: root.join("cache"), ..Default::default() };
  let ctx = RunContext::build("abc", &config, &options, programs.clone(), tests.clone(), &programs, &tests).unwrap();
  let mut state = AggregateState::new(&ctx);
  state.fold("abc.cpp", 1, "1a", finished(Status::Accepted, 500, 1024, 100));
  state.fold("abc.cpp", 2, "2a", finished(Status::Accepted, 3000, 6000, 100));
  assert_eq!(state.program_max_time(&ctx, "abc.cpp"), Some(Peak { value: 3000, limit: 5000 }));
  assert_eq!(state.program_max_memory(&ctx, "abc.cpp"), Some(Peak { value: 6000, limit: 8192 }));
  let summary = |state: &AggregateState| {
    let snapshot = Snapshot { state: Arc::new(state.clone()), done: 2, total: 2 };
    let text = strip_markup(&render(&ctx, &snapshot, ReportOptions::default()));
    return text.lines().map(str::to_string).collect::<Vec<_>>();
  };
  // within the limits of group 2, though above the default ones
  let lines = summary(&state);
  assert_eq!(lines[6], "  time |      3000ms |");
  assert_eq!(lines[7], "memory |      6000KB |");
  // an unmeasured timeout is twice group 2's limit, too much to show
  state.fold("abc.cpp", 2, "2a", ExecutionResult::with_status(Status::TimeLimit));
  assert_eq!(state.program_max_time(&ctx, "abc.cpp"), Some(Peak { value: 10000, limit: 5000 }));
  let lines = summary(&state);
  assert_eq!(lines[6], "  time |     ------- |");
}

#[test]
fn test_huge_limits() {
  assert_eq!(hard_deadline(u64::MAX), Duration::from_millis(u64::MAX));
  let root = Path::new("/nonexistent");
  let programs = vec![Program::from_source("abc", &root.join("prog/abc.cpp")).unwrap()];
  let tests = vec![TestCase::from_input("abc", &root.join("in/abc1a.in"), root).unwrap()];
  let options = RunOptions {
    cpus: Some(2),
    time_limit: Some(u64::MAX),
    memory_limit: Some(u64::MAX),
    cache_dir: root.join("cache"),
    ..Default::default()
  };
  let config = test_config(&[(1, 100)]);
  let ctx = RunContext::build("abc", &config, &options, programs.clone(), tests.clone(), &programs, &tests).unwrap();
  let mut state = AggregateState::new(&ctx);
  let snapshot = Snapshot { state: Arc::new(state.clone()), done: 0, total: 1 };
  assert!(render_progress(&ctx, &snapshot).starts_with("Done    0/   1."));
  state.fold("abc.cpp", 1, "1a", ExecutionResult::with_status(Status::TimeLimit));
  assert_eq!(state.program_max_time(&ctx, "abc.cpp"), Some(Peak { value: u64::MAX, limit: u64::MAX }));
  let snapshot = Snapshot { state: Arc::new(state), done: 1, total: 1 };
  let text = strip_markup(&render(&ctx, &snapshot, ReportOptions::default()));
  assert_eq!(text.lines().nth(5), Some("  time |     ------- |"));
  let ok = finished(Status::Accepted, 10, 100, 100);
  assert_eq!(ContestType::Oi.policy().test_score(&ok, u64::MAX, u64::MAX), 100);
  assert_eq!(apply_limits(ok.clone(), Limits { time_limit: u64::MAX, memory_limit: u64::MAX }), ok);
}

#[test]
fn test_subtask_config() {
  let config = PackageConfig::from_yaml(concat!(
    "title: Test task\ntime_limit: 1000\nmemory_limit: 2048\n",
    "scores:\n  1: 40\n  2: 60\n",
    "subtasks:\n",
    "  1:\n    groups: [1]\n    points: 40\n    validator: abcs.cpp\n",
    "  2:\n    groups: [1, 2]\n    points: 100\n    validator: abc.cpp --all\n",
  ))
  .unwrap();
  assert_eq!(config.subtasks.keys().collect_vec(), ["1", "2"]);
  assert_eq!(config.subtasks["1"].groups, [1]);
  assert_eq!(config.subtasks["2"].validator_file(), Some("abc.cpp"));
  let scores = config.require_scores().unwrap();
  check_subtask_points(&config.subtasks, scores).unwrap();
  // the groups don't add up
  let mut bad = config.subtasks.clone();
  bad.get_mut("1").unwrap().points = 50;
  assert!(matches!(check_subtask_points(&bad, scores), Err(JudgeError::Configuration(_))));
  // a group without a score
  let mut bad = config.subtasks.clone();
  bad.get_mut("2").unwrap().groups.push(3);
  assert!(matches!(check_subtask_points(&bad, scores), Err(JudgeError::Configuration(_))));
  // validators are found in prog/ and go by their subtask's name
  let dir = tempfile::tempdir().unwrap();
  let prog = dir.path().join("prog");
  std::fs::create_dir_all(&prog).unwrap();
  std::fs::write(prog.join("abc.cpp"), "").unwrap();
  assert!(matches!(
    subtask_validators("abc", &prog, &config.subtasks),
    Err(JudgeError::Configuration(_))
  ));
  std::fs::write(prog.join("abcs.cpp"), "").unwrap();
  let validators = subtask_validators("abc", &prog, &config.subtasks).unwrap();
  assert_eq!(validators["1"].name, "abcs.cpp");
  assert_eq!(validators["2"].name, "abc.cpp");
  let programs = subtask_programs(&validators);
  let names: Vec<&str> = programs.iter().map(|p| p.name.as_str()).collect();
  assert_eq!(names, ["1", "2"]);
  assert_eq!(programs[0].source, validators["1"].source);
  let mut blank = config.subtasks.clone();
  blank.get_mut("1").unwrap().validator = " ".to_string();
  assert!(matches!(subtask_validators("abc", &prog, &blank), Err(JudgeError::Configuration(_))));
}

#[test]
fn test_subtask_verdicts() {
  let root = Path::new("/nonexistent");
  let subtasks: Subtasks = serde_yaml::from_str(concat!(
    "1:\n  groups: [1]\n  points: 40\n  validator: abcs.cpp\n",
    "2:\n  groups: [1, 2]\n  points: 100\n  validator: abc.cpp\n",
  ))
  .unwrap();
  let validators: BTreeMap<String, Program> = subtasks
    .iter()
    .map(|(name, s)| {
      let source = root.join("prog").join(s.validator_file().unwrap());
      (name.clone(), Program::from_source("abc", &source).unwrap())
    })
    .collect();
  let tests: Vec<TestCase> = ["1a", "2a"]
    .iter()
    .map(|t| TestCase::from_input("abc", &root.join(format!("in/abc{}.in", t)), root).unwrap())
    .collect();
  let config = test_config(&[(1, 40), (2, 60)]);
  let options = RunOptions { cpus: Some(2), cache_dir: root.join("cache"), ..Default::default() };
  let build = |tests: Vec<TestCase>, all: &[TestCase]| {
    RunContext::build("abc", &config, &options, subtask_programs(&validators), tests, &[], all).unwrap()
  };
  let ctx = build(tests.clone(), &tests);
  let mut state = AggregateState::new(&ctx);
  state.fold("1", 1, "1a", finished(Status::Accepted, 100, 100, 100));
  state.fold("1", 2, "2a", finished(Status::WrongAnswer, 100, 100, 0));
  state.fold("2", 1, "1a", finished(Status::Accepted, 100, 100, 100));
  state.fold("2", 2, "2a", ExecutionResult::with_status(Status::TimeLimit));
  let verdicts = judge_subtasks(&ctx, &state, &subtasks);
  assert_eq!(verdicts.len(), 2);
  assert!(verdicts[0].is_ok());
  assert!(!verdicts[1].is_ok());
  assert_eq!(verdicts[1].to_string(), "subtask 2: passes groups {1}, should pass {1, 2}");
  // only the groups that were run count
  let ctx = build(tests[..1].to_vec(), &tests);
  let mut state = AggregateState::new(&ctx);
  state.fold("1", 1, "1a", finished(Status::Accepted, 100, 100, 100));
  state.fold("2", 1, "1a", finished(Status::Accepted, 100, 100, 100));
  let verdicts = judge_subtasks(&ctx, &state, &subtasks);
  assert!(verdicts.iter().all(|v| v.is_ok()));
  assert_eq!(verdicts[1].expected, BTreeSet::from([1]));
  // a group still pending is not passed
  let state = AggregateState::new(&ctx);
  assert!(judge_subtasks(&ctx, &state, &subtasks).iter().all(|v| v.passed.is_empty()));
}

/// Stands in for GNU time: `-f FMT -o FILE COMMAND`, with the command being
/// a shell script. Like the real one, it reports 0 as the exit code of a
/// command killed by a signal, and exits with 128 plus the signal.
#[cfg(unix)]
const FAKE_GNU_TIME: &str = r#"#!/bin/sh
out=$4
shift 4
: > "$out"
/bin/sh "$@"
code=$?
if [ "$code" -gt 128 ]; then
  echo "Command terminated by signal $((code - 128))" >> "$out"
  printf '0.01\n1000\n0\n' >> "$out"
else
  if [ "$code" -ne 0 ]; then
    echo "Command exited with non-zero status $code" >> "$out"
  fi
  printf '0.01\n1000\n%s\n' "$code" >> "$out"
fi
exit "$code"
"#;

#[cfg(unix)]
#[test]
fn test_time_sandbox() {
  use std::os::unix::fs::PermissionsExt;
  let _turn = serial();
  let dir = tempfile::tempdir().unwrap();
  let root = dir.path();
  let time = root.join("time");
  std::fs::write(&time, FAKE_GNU_TIME).unwrap();
  std::fs::set_permissions(&time, std::fs::Permissions::from_mode(0o755)).unwrap();
  let input = root.join("abc1a.in");
  let output = root.join("abc1a.out");
  let report = root.join("abc1a.res");
  let executable = root.join("abc.sh");
  std::fs::write(&input, "42\n").unwrap();
  let sandbox = TimeSandbox { time_binary: time };
  let run = |program: &str| {
    std::fs::write(&executable, program).unwrap();
    let request = RunRequest {
      executable: &executable,
      input: &input,
      output: &output,
      report: &report,
      limits: Limits { time_limit: 1000, memory_limit: 1 << 22 },
    };
    return sandbox.run(&request, &CancelToken::new()).unwrap();
  };
  let result = run("cat\n");
  assert_eq!((result.status, result.time, result.memory), (Status::Accepted, Some(10), Some(1000)));
  assert_eq!(std::fs::read_to_string(&output).unwrap(), "42\n");
  // whatever the program says on stderr stays out of time's report
  let chatty = "cat\nfor i in 1 2 3 4 5 6; do echo \"debug $i\" >&2; done\n";
  let result = run(chatty);
  assert_eq!((result.status, result.time), (Status::Accepted, Some(10)));
  let stderr = std::fs::read_to_string(root.join("abc1a.err")).unwrap();
  assert_eq!(stderr.lines().count(), 6);
  assert!(!std::fs::read_to_string(&report).unwrap().contains("debug"));
  // killed by a signal: time says 0, but it's no success
  let result = run("cat\nkill -TERM $$\n");
  assert_eq!((result.status, result.error), (Status::RuntimeError, None));
  assert!(std::fs::read_to_string(&report).unwrap().contains("terminated by signal 15"));
  let result = run("cat\nexit 3\n");
  assert_eq!((result.status, result.error), (Status::RuntimeError, None));
}

#[cfg(unix)]
#[test]
fn test_process_group_killed() {
  use crate::process::*;
  let _turn = serial();
  let dir = tempfile::tempdir().unwrap();
  let root = dir.path();
  let invocation = |script: String| Invocation {
    argv: vec!["/bin/sh".into(), "-c".into(), script.into()],
    env: Vec::new(),
    stdin: std::fs::File::open("/dev/null").unwrap(),
    stdout: std::fs::File::create(root.join("out")).unwrap(),
    stderr: std::fs::File::create(root.join("err")).unwrap(),
  };
  // a background child that outlives its parent would leave a file behind
  let leaving = |marker: &Path| format!("(sleep 1; touch '{}') &\n", marker.display());
  let late = root.join("late");
  let started = Instant::now();
  let outcome = run_with_deadline(
    invocation(leaving(&late) + "sleep 5\n"),
    Duration::from_millis(200),
    &CancelToken::new(),
  )
  .unwrap();
  assert_eq!(outcome, WaitOutcome::DeadlineExceeded);
  assert!(started.elapsed() < Duration::from_secs(4));
  // the leader is done at once, its child isn't
  let orphan = root.join("orphan");
  let outcome = run_with_deadline(
    invocation(leaving(&orphan) + "exit 0\n"),
    Duration::from_secs(5),
    &CancelToken::new(),
  )
  .unwrap();
  assert_eq!(outcome, WaitOutcome::Exited(subprocess::ExitStatus::Exited(0)));
  let cancelled = root.join("cancelled");
  let cancel = CancelToken::new();
  let canceller = cancel.clone();
  let handle = std::thread::spawn(move || {
    std::thread::sleep(Duration::from_millis(200));
    canceller.cancel();
  });
  let outcome = run_with_deadline(invocation(leaving(&cancelled) + "sleep 5\n"), Duration::from_secs(20), &cancel);
  assert!(matches!(outcome, Err(JudgeError::Interrupted)));
  handle.join().unwrap();
  std::thread::sleep(Duration::from_millis(1500));
  assert!(!late.exists());
  assert!(!orphan.exists());
  assert!(!cancelled.exists());
}

/// A sandbox that notes which worker ran it, then either gives up on the
/// program right away or waits to be cancelled.
struct RecordingSandbox {
  /// Whether to wait for cancellation.
  waits: bool,
  /// Names of the threads it ran on.
  workers: Mutex<Vec<String>>,
}

impl RecordingSandbox {
  /// A fresh recorder.
  fn new(waits: bool) -> Arc<Self> {
    return Arc::new(Self { waits, workers: Mutex::new(Vec::new()) });
  }

  /// Names of the threads it ran on so far.
  fn workers(&self) -> Vec<String> {
    return self.workers.lock().unwrap().clone();
  }
}

impl Sandbox for RecordingSandbox {
  fn run(
    &self,
    _request: &RunRequest,
    cancel: &CancelToken,
  ) -> Result<ExecutionResult, JudgeError> {
    let name = std::thread::current().name().unwrap_or_default().to_string();
    self.workers.lock().unwrap().push(name);
    if !self.waits {
      return Ok(ExecutionResult::with_status(Status::WrongAnswer));
    }
    while !cancel.is_cancelled() {
      std::thread::sleep(Duration::from_millis(10));
    }
    return Err(JudgeError::Interrupted);
  }
}

/// Every pair of a context's programs and tests, for a sandbox that ignores
/// the executable.
fn recorded_units(ctx: &RunContext) -> Vec<WorkUnit> {
  return ctx
    .programs
    .iter()
    .cartesian_product(ctx.tests.iter())
    .map(|(p, t)| WorkUnit {
      program: p.clone(),
      executable: Executable::Compiled("/nonexistent/abc".into()),
      test: t.clone(),
      limits: ctx.default_limits,
    })
    .collect();
}

#[test]
fn test_worker_names() {
  let _turn = serial();
  let dir = tempfile::tempdir().unwrap();
  let ctx = test_context(dir.path(), &["abc.cpp", "abcs.cpp"], &["1a", "1b"], &[(1, 100)]);
  let sandbox = RecordingSandbox::new(false);
  let scheduler = Scheduler::new(
    sandbox.clone(),
    Arc::new(OutputChecker::Exact),
    2,
    ctx.executions_dir(),
    CancelToken::new(),
  );
  let results: Vec<Completed> = scheduler
    .schedule(recorded_units(&ctx))
    .unwrap()
    .collect::<Result<_, _>>()
    .unwrap();
  assert_eq!(results.len(), 4);
  let workers = sandbox.workers();
  assert_eq!(workers.len(), 4);
  for name in workers.iter() {
    assert!(["job_runner_1", "job_runner_2"].contains(&name.as_str()), "{}", name);
  }
}

#[cfg(unix)]
#[test]
fn test_interrupt_signal() {
  use nix::sys::signal::{raise, Signal};
  let _turn = serial();
  let dir = tempfile::tempdir().unwrap();
  let ctx = test_context(dir.path(), &["abc.cpp"], &["1a"], &[(1, 100)]);
  let sandbox = RecordingSandbox::new(true);
  let scheduler = Scheduler::new(
    sandbox.clone(),
    Arc::new(OutputChecker::Exact),
    1,
    ctx.executions_dir(),
    CancelToken::new(),
  );
  let schedule = scheduler.schedule(recorded_units(&ctx)).unwrap();
  let started = Instant::now();
  while sandbox.workers().is_empty() {
    assert!(started.elapsed() < Duration::from_secs(10));
    std::thread::sleep(Duration::from_millis(10));
  }
  // the handler is installed while the schedule lives
  raise(Signal::SIGINT).unwrap();
  assert!(signal_received());
  let results: Vec<_> = schedule.collect();
  assert_eq!(results.len(), 1);
  assert!(matches!(results[0], Err(JudgeError::Interrupted)));
  clear_signal();
}
