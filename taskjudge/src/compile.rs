//! This module implements compiling programs (and checkers) into executables.
//! Python programs aren't compiled: they get a small launcher script.

use std::error::Error;
use std::ffi::OsString;
use std::fmt::Display;
use std::fs::{File, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::{debug, info};
use subprocess::{Exec, ExitStatus, Redirection};

/// A program that didn't compile.
#[derive(Debug)]
pub struct CompileError {
  /// Name of the program.
  pub program: String,
  /// Where the compiler's output is.
  pub log: PathBuf,
  /// What went wrong, if it wasn't the compiler complaining.
  pub reason: Option<String>,
}

impl Display for CompileError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    return match &self.reason {
      Some(reason) => write!(f, "could not compile {}: {}", self.program, reason),
      None => write!(
        f,
        "could not compile {}, see {}",
        self.program,
        self.log.display()
      ),
    };
  }
}

impl Error for CompileError {}

/// How sources get compiled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toolchain {
  /// Compiler for C.
  pub c_compiler: OsString,
  /// Compiler for C++.
  pub cpp_compiler: OsString,
  /// Flags for C.
  pub c_flags: Vec<OsString>,
  /// Flags for C++.
  pub cpp_flags: Vec<OsString>,
}

impl Default for Toolchain {
  fn default() -> Self {
    return Self {
      c_compiler: "gcc".into(),
      cpp_compiler: "g++".into(),
      c_flags: vec!["-O2".into(), "-std=c11".into()],
      cpp_flags: vec!["-O2".into(), "-std=c++17".into()],
    };
  }
}

/// Compiles a source into an executable at `output`, keeping the compiler's
/// output at `log`.
pub fn compile(
  source: &Path,
  output: &Path,
  toolchain: &Toolchain,
  extra_args: &[OsString],
  log: &Path,
) -> Result<(), CompileError> {
  let name = source
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| source.display().to_string());
  let fail = |reason: Option<String>| CompileError {
    program: name.clone(),
    log: log.to_path_buf(),
    reason,
  };
  if let Some(parent) = output.parent() {
    std::fs::create_dir_all(parent).map_err(|e| fail(Some(e.to_string())))?;
  }
  let ext = source
    .extension()
    .and_then(|e| e.to_str())
    .unwrap_or("")
    .to_ascii_lowercase();
  let (compiler, flags) = match ext.as_str() {
    "c" => (&toolchain.c_compiler, &toolchain.c_flags),
    "cpp" | "cc" => (&toolchain.cpp_compiler, &toolchain.cpp_flags),
    "py" => {
      return python_launcher(source, output, log)
        .map_err(|e| fail(Some(e.to_string())));
    },
    _ => return Err(fail(Some(format!("unknown language \"{}\"", ext)))),
  };
  let log_file = File::create(log).map_err(|e| fail(Some(e.to_string())))?;
  debug!("Compiling {} into {}.", source.display(), output.display());
  let status = Exec::cmd(compiler)
    .args(flags.as_slice())
    .args(extra_args)
    .arg(source)
    .arg("-o")
    .arg(output)
    .stdin(Redirection::None)
    .stdout(Redirection::Merge)
    .stderr(Redirection::File(log_file))
    .join()
    .map_err(|e| fail(Some(e.to_string())))?;
  if status != ExitStatus::Exited(0) {
    return Err(fail(None));
  }
  info!("Compiled {}.", name);
  return Ok(());
}

/// Writes a shell script that runs a Python program.
fn python_launcher(
  source: &Path,
  output: &Path,
  log: &Path,
) -> std::io::Result<()> {
  let source = std::fs::canonicalize(source)?;
  let script = format!(
    "#!/bin/sh\nexec python3 '{}' \"$@\"\n",
    source.display().to_string().replace('\'', r"'\''")
  );
  std::fs::write(output, script)?;
  std::fs::set_permissions(output, Permissions::from_mode(0o755))?;
  std::fs::write(log, "")?;
  return Ok(());
}

/// The first bytes of a compile log, to show the user.
pub fn log_excerpt(log: &Path, limit: usize) -> String {
  let bytes = std::fs::read(log).unwrap_or_default();
  let cut = &bytes[..bytes.len().min(limit)];
  return String::from_utf8_lossy(cut).into_owned();
}
