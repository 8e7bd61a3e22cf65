//! This module does the actual work of a run: finding what to run, compiling
//! it, executing it with a live report, and comparing the scores.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};
use rayon::prelude::*;
use taskjudge::prelude::*;

use crate::{show, Cli, EXIT_COMPILE, EXIT_MISMATCH, EXIT_OK, EXIT_SANDBOX};

/// How much of a failed compile log is shown.
const LOG_EXCERPT_LEN: usize = 500;

/// Extensions of checker sources.
const CHECKER_EXTENSIONS: &[&str] = &["cpp", "cc", "c"];

/// Default location of the report, within the cache.
const REPORT_FILE: &str = "run_report.txt";

/// Finds a file given by the user, either as a path or as a name within a
/// package directory.
fn locate(given: &Path, dir: &Path) -> PathBuf {
  if given.exists() {
    return given.to_path_buf();
  } else {
    return dir.join(given);
  }
}

/// Picks the programs to run.
fn select_programs(
  args: &Cli,
  task_id: &str,
  prog_dir: &Path,
  package: &[Program],
) -> Result<Vec<Program>, JudgeError> {
  if args.programs.is_empty() {
    return Ok(package.to_vec());
  }
  return args
    .programs
    .iter()
    .map(|p| {
      let path = locate(p, prog_dir);
      if !path.is_file() {
        return Err(JudgeError::config(format!(
          "program {} does not exist",
          p.display()
        )));
      }
      Program::from_source(task_id, &path)
    })
    .collect();
}

/// Picks the tests to run.
fn select_tests(
  args: &Cli,
  task_id: &str,
  in_dir: &Path,
  out_dir: &Path,
  package: &[TestCase],
) -> Result<Vec<TestCase>, JudgeError> {
  if args.tests.is_empty() {
    return Ok(package.to_vec());
  }
  return args
    .tests
    .iter()
    .map(|t| {
      let path = locate(t, in_dir);
      if !path.is_file() {
        return Err(JudgeError::config(format!(
          "test {} does not exist",
          t.display()
        )));
      }
      TestCase::from_input(task_id, &path, out_dir)
    })
    .collect();
}

/// Logs what's about to happen.
fn announce(ctx: &RunContext, config: &PackageConfig) {
  info!("Task {} ({})", ctx.title, ctx.task_id);
  let tl = ctx.default_limits.time_limit;
  match config.time_limit {
    Some(orig) if orig != tl => {
      warn!("Time limit (in ms): {} [originally was {} ms]", tl, orig)
    },
    _ => info!("Time limit (in ms): {}", tl),
  }
  let ml = ctx.default_limits.memory_limit;
  match config.memory_limit {
    Some(orig) if orig != ml => {
      warn!("Memory limit (in KB): {} [originally was {} KB]", ml, orig)
    },
    _ => info!("Memory limit (in KB): {}", ml),
  }
  info!("Contest type: {}", ctx.contest_type.small_lc_name());
  for (g, score) in ctx.scores.iter() {
    info!("  group {:2}: {:3} points", g, score);
  }
  let programs: Vec<&str> = ctx.programs.iter().map(|p| p.name.as_str()).collect();
  let tests: Vec<&str> = ctx.tests.iter().map(|t| t.id.as_str()).collect();
  info!(
    "The following {} programs will be executed: {}",
    programs.len(),
    programs.join(", ")
  );
  info!("on the following {} tests: {}", tests.len(), tests.join(", "));
  info!("in parallel on {} cpus.", ctx.cpus);
}

/// Compiles programs on a pool of `cpus` threads. Failures are logged with
/// an excerpt of their log.
fn compile_programs(
  ctx: &RunContext,
  programs: &[Program],
  toolchain: &Toolchain,
) -> Result<BTreeMap<String, Executable>, JudgeError> {
  let pool = rayon::ThreadPoolBuilder::new()
    .num_threads(ctx.cpus)
    .build()
    .map_err(|e| JudgeError::config(format!("no compile threads: {}", e)))?;
  info!("Compiling {} programs...", programs.len());
  let results: Vec<(String, Executable)> = pool.install(|| {
    programs
      .par_iter()
      .map(|p| {
        let output = ctx.executable_path(p);
        let log = ctx.compile_log_path(p);
        match compile(&p.source, &output, toolchain, &[], &log) {
          Ok(()) => (p.name.clone(), Executable::Compiled(output)),
          Err(e) => {
            error!("{}", e);
            if e.reason.is_none() {
              error!("{}", log_excerpt(&log, LOG_EXCERPT_LEN));
            }
            (p.name.clone(), Executable::Failed)
          },
        }
      })
      .collect()
  });
  return Ok(results.into_iter().collect());
}

/// Finds and prepares the checker: the one given, or the package's own.
fn prepare_checker(
  args: &Cli,
  package: &Package,
  toolchain: &Toolchain,
) -> Result<Arc<OutputChecker>, JudgeError> {
  let prog_dir = &package.prog_dir;
  let given = args.checker.as_ref().map(|c| locate(c, prog_dir));
  let found = given.or_else(|| {
    CHECKER_EXTENSIONS
      .iter()
      .map(|ext| prog_dir.join(format!("{}chk.{}", package.task_id, ext)))
      .find(|p| p.is_file())
  });
  let source = match found {
    Some(path) => path,
    None => {
      debug!("No checker, comparing outputs.");
      return Ok(Arc::new(OutputChecker::Exact));
    },
  };
  if !source.is_file() {
    return Err(JudgeError::config(format!(
      "checker {} does not exist",
      source.display()
    )));
  }
  let is_source = source
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| CHECKER_EXTENSIONS.contains(&e));
  if !is_source {
    info!("Using checker {}.", source.display());
    let path = std::fs::canonicalize(&source)?;
    return Ok(Arc::new(OutputChecker::External(path)));
  }
  let name = format!("{}chk", package.task_id);
  let compilation_dir = package.cache_dir().join("compilation");
  std::fs::create_dir_all(&compilation_dir)?;
  let output = compilation_dir.join(format!("{}.e", name));
  let log = compilation_dir.join(format!("{}.compile_log", name));
  info!("Compiling checker {}...", source.display());
  return match compile(&source, &output, toolchain, &[], &log) {
    Ok(()) => Ok(Arc::new(OutputChecker::External(output))),
    Err(e) => {
      error!("{}", log_excerpt(&log, LOG_EXCERPT_LEN));
      Err(JudgeError::config(format!("the checker did not compile: {}", e)))
    },
  };
}

/// Sets up the time tool.
fn prepare_sandbox(args: &Cli) -> Result<Arc<dyn Sandbox>, JudgeError> {
  let binary = args
    .sandbox
    .clone()
    .unwrap_or_else(|| args.time_tool.default_binary());
  if !binary.is_file() {
    return Err(JudgeError::config(format!(
      "{} is not installed at {}",
      args.time_tool.small_lc_name(),
      binary.display()
    )));
  }
  return Ok(Arc::from(args.time_tool.adapter(binary)));
}

/// Runs every program of a context on every test with a live report, saved
/// to `report` at the end if given. Returns the final state.
fn execute(
  args: &Cli,
  ctx: &RunContext,
  executables: &BTreeMap<String, Executable>,
  sandbox: Arc<dyn Sandbox>,
  checker: Arc<OutputChecker>,
  report: Option<PathBuf>,
) -> Result<AggregateState, JudgeError> {
  let units: Vec<WorkUnit> = ctx
    .programs
    .iter()
    .flat_map(|p| ctx.tests.iter().map(move |t| (p, t)))
    .map(|(p, t)| WorkUnit {
      program: p.clone(),
      executable: executables.get(&p.name).cloned().unwrap_or(Executable::Failed),
      test: t.clone(),
      limits: ctx.limits_for(t.group),
    })
    .collect();
  info!("Performing {} executions...", units.len());
  let scheduler = Scheduler::new(
    sandbox,
    checker,
    ctx.cpus,
    ctx.executions_dir(),
    CancelToken::new(),
  );
  let options = ReportOptions {
    verbose: args.verbose,
    show_memory: args.show_memory,
  };
  let schedule = scheduler.schedule(units)?;
  let reporter = LiveReporter::spawn(ctx.clone(), options)?;
  let mut aggregator = Aggregator::new(ctx);
  let mut failure: Option<JudgeError> = None;
  for item in schedule {
    match item {
      Ok(completed) => {
        aggregator.record(&completed);
        reporter.update(aggregator.snapshot());
      },
      Err(e) => {
        failure = Some(e);
        break;
      },
    }
  }
  if let Some(e) = failure {
    reporter.abort();
    return Err(e);
  }
  reporter.finish(aggregator.snapshot(), report)?;
  return Ok(aggregator.state().clone());
}

/// Logs the diagnostics of odd results.
fn report_anomalies(ctx: &RunContext, state: &AggregateState) -> bool {
  if !state.has_errors() {
    return false;
  }
  for p in ctx.programs.iter() {
    for t in ctx.tests.iter() {
      let diagnostic = state
        .result(&p.name, t.group, &t.id)
        .and_then(|r| r.error.as_deref());
      if let Some(e) = diagnostic {
        warn!("{} on test {}: {}", p.name, t.id, e);
      }
    }
  }
  return true;
}

/// Compares the scores to the expected ones, applying the suggestions if
/// asked to. Returns whether there's an unapplied mismatch.
fn validate(
  args: &Cli,
  ctx: &RunContext,
  config: &PackageConfig,
  config_path: &Path,
  state: &AggregateState,
) -> Result<bool, JudgeError> {
  let new = state.computed_expected(ctx);
  let scope = DiffScope::of(ctx);
  let has_baseline = config.expected_scores.is_some();
  let mut expected = config.expected_scores.clone().unwrap_or_default();
  let result = diff(&expected, &new, &scope);
  if has_baseline {
    show::print_validation(&result);
  } else {
    warn!("There are no expected scores in config.yml.");
  }
  if result.is_empty() {
    return Ok(false);
  }
  apply_suggestions(&mut expected, &result, &ctx.scores);
  if args.apply_suggestions {
    save_expected_scores(config_path, &expected)?;
    return Ok(false);
  }
  show::print_suggestion(&expected)?;
  info!("Run again with --apply-suggestions to save them.");
  return Ok(has_baseline);
}

/// Validates the subtasks: checks their points, runs their validators and
/// compares the groups they pass to the subtasks' groups.
#[allow(clippy::too_many_arguments)]
fn validate_subtasks(
  args: &Cli,
  package: &Package,
  options: &RunOptions,
  tests: &[TestCase],
  package_tests: &[TestCase],
  sandbox: Arc<dyn Sandbox>,
  checker: Arc<OutputChecker>,
  toolchain: &Toolchain,
) -> Result<(), JudgeError> {
  let config = &package.config;
  info!("Validating subtasks...");
  if config.subtasks.is_empty() {
    return Err(JudgeError::config("subtasks were not defined in config.yml"));
  }
  check_subtask_points(&config.subtasks, config.require_scores()?)?;
  let validators =
    subtask_validators(&package.task_id, &package.prog_dir, &config.subtasks)?;
  let mut distinct: Vec<Program> = validators.values().cloned().collect();
  distinct.sort();
  distinct.dedup();
  let ctx = RunContext::build(
    &package.task_id,
    config,
    options,
    subtask_programs(&validators),
    tests.to_vec(),
    &[],
    package_tests,
  )?;
  std::fs::create_dir_all(ctx.compilation_dir())?;
  let compiled = compile_programs(&ctx, &distinct, toolchain)?;
  let executables: BTreeMap<String, Executable> = validators
    .iter()
    .map(|(name, v)| {
      let e = compiled.get(&v.name).cloned().unwrap_or(Executable::Failed);
      (name.clone(), e)
    })
    .collect();
  let report = args.subtask_report.clone();
  let state = execute(args, &ctx, &executables, sandbox, checker, report)?;
  let verdicts = judge_subtasks(&ctx, &state, &config.subtasks);
  show::print_subtasks(&verdicts);
  if verdicts.iter().any(|v| !v.is_ok()) {
    return Err(JudgeError::config("subtask validation failed"));
  }
  return Ok(());
}

/// A package directory and its configuration.
struct Package {
  /// The package directory.
  root: PathBuf,
  /// Name of the directory, which is the task ID.
  task_id: String,
  /// Path of `config.yml`.
  config_path: PathBuf,
  /// Contents of `config.yml`.
  config: PackageConfig,
  /// Where the programs are.
  prog_dir: PathBuf,
  /// Where the test inputs are.
  in_dir: PathBuf,
  /// Where the test answers are.
  out_dir: PathBuf,
}

impl Package {
  /// Opens the package at a directory.
  fn open(dir: &Path) -> Result<Self, JudgeError> {
    let root = std::fs::canonicalize(dir)?;
    let config_path = root.join(CONFIG_FILE);
    if !config_path.is_file() {
      return Err(JudgeError::config(format!(
        "{} is not a package directory ({} is missing)",
        root.display(),
        CONFIG_FILE
      )));
    }
    let task_id = root
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .ok_or(JudgeError::config("the package directory has no name"))?;
    let config = PackageConfig::load(&config_path)?;
    return Ok(Self {
      prog_dir: root.join("prog"),
      in_dir: root.join("in"),
      out_dir: root.join("out"),
      root,
      task_id,
      config_path,
      config,
    });
  }

  /// The cache directory.
  fn cache_dir(&self) -> PathBuf {
    return self.root.join("cache");
  }
}

/// Runs the package's programs. Returns the exit code.
pub(crate) fn run(args: &Cli) -> Result<i32, JudgeError> {
  let package = Package::open(&args.package)?;
  let task_id = package.task_id.as_str();
  let config = &package.config;
  let package_programs = if package.prog_dir.is_dir() {
    discover_programs(task_id, &package.prog_dir)?
  } else {
    Vec::new()
  };
  let package_tests = if package.in_dir.is_dir() {
    discover_tests(task_id, &package.in_dir, &package.out_dir)?
  } else {
    Vec::new()
  };
  let tests = select_tests(
    args,
    task_id,
    &package.in_dir,
    &package.out_dir,
    &package_tests,
  )?;
  let options = RunOptions {
    cpus: args.cpus,
    time_limit: args.tl.map(|s| (s * 1000.0).round() as u64),
    memory_limit: args.ml.map(|mb| (mb * 1024.0).round() as u64),
    contest_type: args.contest_type,
    cache_dir: package.cache_dir(),
  };
  let sandbox = prepare_sandbox(args)?;
  let toolchain = Toolchain::default();
  let checker = prepare_checker(args, &package, &toolchain)?;
  let subtasks_wanted = args.validate_subtasks
    || (!args.validate_programs && !config.subtasks.is_empty());
  if subtasks_wanted {
    validate_subtasks(
      args,
      &package,
      &options,
      &tests,
      &package_tests,
      sandbox.clone(),
      checker.clone(),
      &toolchain,
    )?;
    if args.validate_subtasks {
      return Ok(EXIT_OK);
    }
  }
  let programs =
    select_programs(args, task_id, &package.prog_dir, &package_programs)?;
  let ctx = RunContext::build(
    task_id,
    config,
    &options,
    programs,
    tests,
    &package_programs,
    &package_tests,
  )?;
  announce(&ctx, config);
  std::fs::create_dir_all(ctx.compilation_dir())?;
  let executables = compile_programs(&ctx, &ctx.programs, &toolchain)?;
  let failed: Vec<&String> = executables
    .iter()
    .filter(|(_, e)| **e == Executable::Failed)
    .map(|(n, _)| n)
    .collect();
  let report = args
    .report
    .clone()
    .unwrap_or_else(|| ctx.cache_dir.join(REPORT_FILE));
  let state = execute(args, &ctx, &executables, sandbox, checker, Some(report))?;
  let anomalies = report_anomalies(&ctx, &state);
  let mismatch = validate(args, &ctx, config, &package.config_path, &state)?;
  if !failed.is_empty() {
    let names: Vec<&str> = failed.iter().map(|n| n.as_str()).collect();
    error!("{} programs did not compile: {}", names.len(), names.join(", "));
    return Ok(EXIT_COMPILE);
  }
  if anomalies {
    return Ok(EXIT_SANDBOX);
  }
  if mismatch {
    return Ok(EXIT_MISMATCH);
  }
  return Ok(EXIT_OK);
}
