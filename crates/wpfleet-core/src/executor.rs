//! Narrow capability for running external tools.
//!
//! Every call to docker, certbot, openssl, curl, tar or crontab goes through a
//! [`ProcessExecutor`] so flows can be exercised with a scripted executor in
//! tests and replaced by [`DryRunExecutor`] under `--dry`.

use crate::error::{FleetError, Result};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A fully-specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

pub trait ProcessExecutor {
    /// Run `cmd` to completion. Only a failure to spawn is an `Err`; a non-zero
    /// exit is reported through [`CommandOutput::code`].
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput>;

    /// Whether `program` can be found on `PATH`.
    fn is_available(&self, program: &str) -> bool;

    /// True when commands are only being printed.
    fn is_dry(&self) -> bool {
        false
    }

    /// Run `cmd` and turn a non-zero exit into [`FleetError::ExternalTool`].
    fn run_checked(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        let output = self.run(cmd)?;
        if !output.success() {
            let stderr = if output.stderr.trim().is_empty() {
                output.stdout.trim()
            } else {
                output.stderr.trim()
            };
            return Err(FleetError::ExternalTool {
                program: cmd.program.clone(),
                code: output.code,
                stderr: stderr.chars().take(500).collect(),
            });
        }
        Ok(output)
    }
}

/// Fail with [`FleetError::PrerequisiteMissing`] naming every missing tool.
pub fn require(exec: &dyn ProcessExecutor, programs: &[&str]) -> Result<()> {
    let missing: Vec<&str> = programs
        .iter()
        .copied()
        .filter(|p| !exec.is_available(p))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(FleetError::PrerequisiteMissing(missing.join(", ")))
    }
}

// ---------------------------------------------------------------------------
// SystemExecutor
// ---------------------------------------------------------------------------

/// Runs commands with `std::process::Command`, blocking until they exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl ProcessExecutor for SystemExecutor {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!(command = %spec, "exec");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let spawn_err = |e: std::io::Error| FleetError::SpawnFailed {
            program: spec.program.clone(),
            reason: e.to_string(),
        };

        let mut child = cmd.spawn().map_err(spawn_err)?;
        // Feed stdin from its own thread so a chatty child cannot fill its
        // output pipe while we are still writing.
        let writer = match (&spec.stdin, child.stdin.take()) {
            (Some(input), Some(mut stdin)) => {
                let input = input.clone();
                Some(std::thread::spawn(move || stdin.write_all(input.as_bytes())))
            }
            _ => None,
        };
        let output = child.wait_with_output().map_err(spawn_err)?;
        if let Some(Ok(Err(e))) = writer.map(|w| w.join()) {
            // A child that exits without reading all of stdin is not an error here.
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(spawn_err(e));
            }
        }

        let result = CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !result.success() {
            tracing::debug!(command = %spec, code = result.code, "command failed");
        }
        Ok(result)
    }

    fn is_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

// ---------------------------------------------------------------------------
// DryRunExecutor
// ---------------------------------------------------------------------------

/// Prints each command instead of running it and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunExecutor;

impl ProcessExecutor for DryRunExecutor {
    fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput> {
        println!("[dry-run] $ {cmd}");
        Ok(CommandOutput::ok(""))
    }

    fn is_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn is_dry(&self) -> bool {
        true
    }
}
