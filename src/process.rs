//! Thin builder over `std::process::Command` for the external tools the
//! builder drives (podman, createrepo, conversion scripts).
//!
//! Output is captured by default. Long-running tools redirect both streams to
//! a log file instead, so failures can point the user at the full transcript
//! rather than dumping pages of tool output into the terminal.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Outcome of a finished command.
#[derive(Debug)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    success: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.success
    }
}

/// Command builder.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    log_file: Option<File>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            current_dir: None,
            log_file: None,
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Send stdout and stderr to `file` instead of capturing them.
    pub fn log_to(mut self, file: File) -> Self {
        self.log_file = Some(file);
        self
    }

    /// Message prefixed to the error when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// A non-zero exit becomes a normal `CommandResult` instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Run to completion.
    pub fn run(self) -> Result<CommandResult> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let result = if let Some(log) = self.log_file {
            let out = log
                .try_clone()
                .context("duplicating log file handle for stdout")?;
            cmd.stdout(Stdio::from(out)).stderr(Stdio::from(log));
            let status = cmd
                .status()
                .with_context(|| format!("executing {}", self.program))?;
            CommandResult {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: status.code().unwrap_or(-1),
                success: status.success(),
            }
        } else {
            let output = cmd
                .output()
                .with_context(|| format!("executing {}", self.program))?;
            CommandResult {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
                success: output.status.success(),
            }
        };

        if !result.success && !self.allow_fail {
            let detail = if result.stderr.trim().is_empty() {
                String::new()
            } else {
                format!("\n  stderr: {}", result.stderr.trim())
            };
            match self.error_msg {
                Some(msg) => bail!("{}\n  exit code: {}{}", msg, result.exit_code, detail),
                None => bail!(
                    "{} failed\n  exit code: {}{}",
                    self.program,
                    result.exit_code,
                    detail
                ),
            }
        }

        Ok(result)
    }
}

/// Fail with a descriptive error if `path` does not exist.
pub fn ensure_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        bail!("{} not found at {}", what, path.display());
    }
    Ok(())
}
