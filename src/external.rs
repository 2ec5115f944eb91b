use crate::command::ExitCode;
use anyhow::{Context, Result};
use std::borrow::Cow;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tracing::debug;

/// Runs a command line through the user's native shell.
///
/// The interpreter never looks inside these lines: `$VAR`, globs, `&&`, quoting
/// and so on are the shell's business.
pub trait ShellRunner {
    /// Runs `command_line` with the terminal's stdin/stdout/stderr inherited.
    fn run(&mut self, command_line: &str) -> Result<ExitCode>;
}

/// [`ShellRunner`] backed by `$SHELL -c`, falling back to `sh` from `PATH`.
pub struct SystemShell {
    program: PathBuf,
}

impl SystemShell {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Picks `$SHELL` when it points at an existing file, else `sh` on `PATH`.
    pub fn detect() -> Self {
        let from_env = std::env::var_os("SHELL")
            .map(PathBuf::from)
            .filter(|p| p.is_absolute() && p.exists());
        let program = from_env
            .or_else(|| {
                let paths = std::env::var_os("PATH")?;
                find_command_path(&paths, Path::new("sh")).map(Cow::into_owned)
            })
            .unwrap_or_else(|| PathBuf::from("/bin/sh"));
        Self { program }
    }
}

impl ShellRunner for SystemShell {
    fn run(&mut self, command_line: &str) -> Result<ExitCode> {
        debug!(shell = %self.program.display(), command_line, "shell escape");
        let exit_status = std::process::Command::new(&self.program)
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("failed to launch {}", self.program.display()))?;
        Ok(exit_code(exit_status))
    }
}

/// Exit code of a finished process, mapping signals the way shells do.
pub fn exit_code(exit_status: ExitStatus) -> ExitCode {
    match exit_status.code() {
        Some(x) => x,
        None => terminated_by_signal(exit_status),
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> i32 {
    -1
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - Relative with multiple components (e.g., `bin/sh`): returns it if it exists.
/// - `./foo` on Unix or any `./`-prefixed path on other platforms: returns it if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first existing match.
/// - Empty path: returns `None`.
///
/// Returns either a borrowed reference to the provided `path` or an owned `PathBuf`
/// when the result is discovered via PATH lookup.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let search_in_current_dir = cfg!(not(unix)) || path.starts_with("./");
    if search_in_current_dir && path.exists() {
        return Some(Cow::Borrowed(path));
    }

    let mut components = path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        (None, None) => None,
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()).map(Cow::Owned),
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    for dir in std::env::split_paths(search_paths) {
        let path = dir.join(cmd);
        if let Some(path) = find_by_path(&path) {
            return Some(path.to_owned());
        }
    }
    None
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}
