//! This module implements the live report: the table of per-group results of
//! every program, redrawn in place as results come in, and written without
//! colours to a report file at the end.
//!
//! The reporter runs on its own thread and only ever sees snapshots, so the
//! scheduler never waits on it.

use std::fs::File;
use std::io::{stdout, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crossterm::style::{StyledContent, Stylize};
use crossterm::{cursor, queue, terminal};
use itertools::Itertools;
use log::{info, warn};

use crate::aggregate::{GroupView, Peak, Snapshot};
use crate::context::RunContext;
use crate::errors::JudgeError;
use crate::package::Program;
use crate::util::strip_markup;
use crate::verdict::{ExecutionResult, Status};

/// At most this many programs side by side.
pub const PROGRAMS_IN_ROW: usize = 8;

/// Width of a program's column.
const CELL_WIDTH: usize = 11;

/// Width of the leftmost column.
const LABEL_WIDTH: usize = 6;

/// What goes into the table.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportOptions {
  /// Adds a row per test.
  pub verbose: bool,
  /// Adds memory rows under the test rows.
  pub show_memory: bool,
}

/// Colours a measurement: green under half the limit, yellow under the
/// limit, red otherwise.
fn banded(text: String, value: u64, limit: u64) -> StyledContent<String> {
  if value.saturating_mul(2) < limit {
    return text.green();
  } else if value < limit {
    return text.yellow();
  } else {
    return text.red();
  }
}

/// Colours a status code, padded to three characters.
fn status_cell(status: Status) -> StyledContent<String> {
  let text = format!("{:>3}", status.code());
  return match status {
    Status::Accepted => text.green().bold(),
    Status::Pending => text.yellow(),
    _ => text.red().bold(),
  };
}

/// Pads plain text to a cell.
fn plain(text: &str) -> String {
  return format!("{:>w$}", text, w = CELL_WIDTH);
}

/// Pads the leftmost column.
fn label(text: &str) -> String {
  return format!("{:>w$}", text, w = LABEL_WIDTH);
}

/// Joins a row's cells.
fn row(label_text: &str, cells: impl IntoIterator<Item = String>) -> String {
  let cells = cells.into_iter().join(" | ");
  return format!("{} | {} |\n", label(label_text), cells);
}

/// The progress line: how many are done and how long the rest might take.
pub fn render_progress(ctx: &RunContext, snapshot: &Snapshot) -> String {
  let tl = ctx
    .limits
    .values()
    .map(|l| l.time_limit)
    .max()
    .unwrap_or(ctx.default_limits.time_limit);
  let left = snapshot.total.saturating_sub(snapshot.done) as u64;
  let seconds = left.saturating_mul(2).saturating_mul(tl) / ctx.cpus.max(1) as u64 / 1000;
  return format!(
    "Done {:4}/{:4}. Time remaining (in the worst case): {:5} seconds.\n",
    snapshot.done, snapshot.total, seconds
  );
}

/// The cell of a group.
fn group_cell(view: GroupView, max: u32) -> String {
  return match view {
    GroupView::Pending => format!(
      "{} {:>7}",
      format!("{:>3}", "??").yellow(),
      format!("?/{:>3}", max)
    ),
    GroupView::Finished(o) if o.status.is_ok() => {
      format!("{} {:>3}/{:>3}", status_cell(o.status), o.points, max)
    },
    GroupView::Finished(o) => {
      format!("{} ---/{:>3}", status_cell(o.status), max)
    },
  };
}

/// The cell of a program's summary measurement, banded against the limit of
/// the group it came from: dashes when nothing was measured or the program
/// blew past the hard deadline.
fn summary_cell(peak: Option<Peak>, unit: &str) -> String {
  return match peak {
    Some(p) if p.value < p.limit.saturating_mul(2) => {
      let text = format!("{:>w$}", format!("{}{}", p.value, unit), w = CELL_WIDTH);
      format!("{}", banded(text, p.value, p.limit).bold())
    },
    _ => plain("-------"),
  };
}

/// The cell of a test: status and time.
fn test_cell(result: Option<&ExecutionResult>, time_limit: u64) -> String {
  let result = match result {
    Some(r) if r.is_finished() => r,
    _ => return plain(""),
  };
  let time = match result.time {
    Some(t) => {
      let text = format!("{:>7}", format!("{}ms", t));
      format!("{}", banded(text, t, time_limit))
    },
    None => " ".repeat(7),
  };
  return format!("{} {}", status_cell(result.status), time);
}

/// The memory cell of a test.
fn memory_cell(result: Option<&ExecutionResult>, memory_limit: u64) -> String {
  return match result.and_then(|r| r.memory) {
    Some(m) => {
      let text = plain(&format!("{}KB", m));
      format!("{}", banded(text, m, memory_limit))
    },
    None => plain(""),
  };
}

/// Renders the table for some programs.
fn render_chunk(
  ctx: &RunContext,
  snapshot: &Snapshot,
  options: ReportOptions,
  programs: &[Program],
) -> String {
  let state = &snapshot.state;
  let mut out = String::new();
  out += &row("groups", programs.iter().map(|p| plain(&p.name)));
  out += &row("------", programs.iter().map(|_| "-".repeat(CELL_WIDTH)));
  for g in ctx.groups.iter() {
    let max = ctx.group_max(*g);
    out += &row(
      &g.to_string(),
      programs
        .iter()
        .map(|p| group_cell(state.group_view(ctx, &p.name, *g), max)),
    );
  }
  out += &row("", programs.iter().map(|_| plain("")));
  let possible = ctx.possible_score();
  out += &row(
    "points",
    programs.iter().map(|p| {
      let text = format!("{}/{}", state.program_points(ctx, &p.name), possible);
      format!("{}", plain(&text).bold())
    }),
  );
  out += &row(
    "time",
    programs
      .iter()
      .map(|p| summary_cell(state.program_max_time(ctx, &p.name), "ms")),
  );
  out += &row(
    "memory",
    programs
      .iter()
      .map(|p| summary_cell(state.program_max_memory(ctx, &p.name), "KB")),
  );
  if options.verbose {
    out += &row("", programs.iter().map(|_| plain("")));
    for t in ctx.tests.iter() {
      let tl = ctx.limits_for(t.group);
      out += &row(
        &t.id,
        programs.iter().map(|p| {
          test_cell(state.result(&p.name, t.group, &t.id), tl.time_limit)
        }),
      );
      if options.show_memory {
        out += &row(
          "",
          programs.iter().map(|p| {
            memory_cell(state.result(&p.name, t.group, &t.id), tl.memory_limit)
          }),
        );
      }
    }
  }
  return out;
}

/// Renders the whole table, programs in rows of at most eight.
pub fn render(
  ctx: &RunContext,
  snapshot: &Snapshot,
  options: ReportOptions,
) -> String {
  return ctx
    .programs
    .chunks(PROGRAMS_IN_ROW)
    .map(|chunk| render_chunk(ctx, snapshot, options, chunk))
    .join("\n");
}

/// Writes the final table to a file, without colours.
pub fn write_report(
  path: &Path,
  ctx: &RunContext,
  snapshot: &Snapshot,
  options: ReportOptions,
) -> Result<(), JudgeError> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  let mut writer = BufWriter::new(File::create(path)?);
  writer.write_all(strip_markup(&render(ctx, snapshot, options)).as_bytes())?;
  writer.flush()?;
  info!("Report has been saved to {}.", path.display());
  return Ok(());
}

/// What the reporter thread is told.
enum Message {
  /// Redraw with this.
  Update(Snapshot),
  /// Draw this one last time, save it if there's a path, and stop.
  Finish(Snapshot, Option<PathBuf>),
}

/// Draws the table on the terminal, in place.
struct Screen {
  /// Whether to redraw on every update, or only draw at the end.
  live: bool,
  /// Lines drawn last time, to move back over.
  drawn: usize,
}

impl Screen {
  /// Replaces whatever was drawn before.
  fn draw(&mut self, text: &str) -> Result<(), JudgeError> {
    let mut out = stdout().lock();
    if self.drawn > 0 {
      let up = u16::try_from(self.drawn).unwrap_or(u16::MAX);
      queue!(
        out,
        cursor::MoveUp(up),
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::FromCursorDown)
      )?;
    }
    out.write_all(text.as_bytes())?;
    out.flush()?;
    self.drawn = text.lines().count();
    return Ok(());
  }
}

/// The loop of the reporter thread.
fn report_loop(
  ctx: RunContext,
  options: ReportOptions,
  receiver: Receiver<Message>,
) -> Result<(), JudgeError> {
  let mut screen = Screen { live: stdout().is_terminal(), drawn: 0 };
  while let Ok(mut message) = receiver.recv() {
    // skip to the newest
    while let Ok(newer) = receiver.try_recv() {
      if matches!(message, Message::Finish(..)) {
        break;
      }
      message = newer;
    }
    match message {
      Message::Update(snapshot) => {
        if screen.live {
          let text = render_progress(&ctx, &snapshot)
            + &render(&ctx, &snapshot, options);
          screen.draw(&text)?;
        }
      },
      Message::Finish(snapshot, report) => {
        let text = render_progress(&ctx, &snapshot)
          + &render(&ctx, &snapshot, options);
        screen.draw(&text)?;
        if let Some(path) = report {
          write_report(&path, &ctx, &snapshot, options)?;
        }
        break;
      },
    }
  }
  return Ok(());
}

/// Handle to the reporter thread.
pub struct LiveReporter {
  /// Talks to the thread. Dropped to stop it.
  sender: Option<Sender<Message>>,
  /// The thread.
  handle: Option<JoinHandle<Result<(), JudgeError>>>,
}

impl LiveReporter {
  /// Starts the reporter thread.
  pub fn spawn(
    ctx: RunContext,
    options: ReportOptions,
  ) -> Result<Self, JudgeError> {
    let (sender, receiver) = mpsc::channel();
    let handle = thread::Builder::new()
      .name("reporter".to_string())
      .spawn(move || report_loop(ctx, options, receiver))?;
    return Ok(Self { sender: Some(sender), handle: Some(handle) });
  }

  /// Hands a new snapshot over. Never blocks.
  pub fn update(&self, snapshot: Snapshot) {
    if let Some(sender) = &self.sender {
      // a dead reporter says why when joined
      let _ = sender.send(Message::Update(snapshot));
    }
  }

  /// Draws the final table, saves it to the report file if given, and waits
  /// for the thread to finish.
  pub fn finish(
    mut self,
    snapshot: Snapshot,
    report: Option<PathBuf>,
  ) -> Result<(), JudgeError> {
    if let Some(sender) = self.sender.take() {
      let _ = sender.send(Message::Finish(snapshot, report));
    }
    return self.join();
  }

  /// Stops the thread without drawing anything else.
  pub fn abort(mut self) {
    self.sender.take();
    if let Err(e) = self.join() {
      warn!("Reporter failed: {}", e);
    }
  }

  /// Waits for the thread.
  fn join(&mut self) -> Result<(), JudgeError> {
    return match self.handle.take() {
      Some(handle) => handle.join().unwrap_or(Err(JudgeError::WorkerLost)),
      None => Ok(()),
    };
  }
}

impl Drop for LiveReporter {
  fn drop(&mut self) {
    self.sender.take();
    let _ = self.join();
  }
}
