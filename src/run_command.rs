//! Blocking execution of external programs with their output captured to
//! files, so the logs survive a failed run.

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Could not start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "\n{hline}\nProcess failed:\n {errors}{hline}\n{logs}\n{hline}\nplease read the logs at {} and {}\n{hline}\ncommand: {command}\n{hline}",
        .log_path.display(),
        .err_path.display(),
        hline = "-".repeat(25)
    )]
    Failed {
        command: String,
        status: Option<i32>,
        logs: String,
        errors: String,
        log_path: PathBuf,
        err_path: PathBuf,
    },

    #[error(
        "Process failed: please read the logs at {} and {}; command: {command}; err: {source}",
        .log_path.display(),
        .err_path.display()
    )]
    Unreadable {
        command: String,
        log_path: PathBuf,
        err_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not create {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// A program and its arguments. Rendered with single spaces between tokens,
/// which is also how commands appear in logs and errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl CommandLine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append `flag value`.
    pub fn option(self, flag: &str, value: impl Into<OsString>) -> Self {
        self.arg(flag).arg(value)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Default capture files in the system temporary directory.
pub fn default_capture_paths() -> (PathBuf, PathBuf) {
    let tmp = std::env::temp_dir();
    (
        tmp.join("safe_execute_command.log"),
        tmp.join("safe_execute_command.err"),
    )
}

fn create(path: &Path) -> Result<File> {
    File::create(path).map_err(|source| CommandError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Run `command` to completion with stdout written to `log_path` and stderr
/// to `err_path` (both truncated first).
///
/// # Errors
///
/// [`CommandError::Failed`] on a non-zero exit, carrying the captured output.
pub fn run_command(
    command: &CommandLine,
    log_path: Option<&Path>,
    err_path: Option<&Path>,
) -> Result<()> {
    let (default_log, default_err) = default_capture_paths();
    let log_path = log_path.unwrap_or(default_log.as_path());
    let err_path = err_path.unwrap_or(default_err.as_path());

    let rendered = command.to_string();
    info!(command = %rendered, "Running");

    let status = {
        let log_file = create(log_path)?;
        let err_file = create(err_path)?;
        Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(err_file))
            .status()
            .map_err(|source| CommandError::Spawn {
                command: rendered.clone(),
                source,
            })?
    };

    if status.success() {
        debug!(log = %log_path.display(), "Command succeeded");
        return Ok(());
    }

    let captured = fs::read_to_string(err_path)
        .and_then(|errors| Ok((errors, fs::read_to_string(log_path)?)));
    match captured {
        Ok((errors, logs)) => Err(CommandError::Failed {
            command: rendered,
            status: status.code(),
            logs,
            errors,
            log_path: log_path.to_path_buf(),
            err_path: err_path.to_path_buf(),
        }),
        Err(source) => Err(CommandError::Unreadable {
            command: rendered,
            log_path: log_path.to_path_buf(),
            err_path: err_path.to_path_buf(),
            source,
        }),
    }
}
