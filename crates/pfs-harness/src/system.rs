//! Narrow capability interface over the host OS.
//!
//! The provisioner, verifier, and teardown talk to the outside world only
//! through [`System`], so every phase is testable against fakes without a
//! real mounted filesystem. The production implementation is
//! [`RealSystem`]: `std::process::Command`, `/proc/mounts`, and `sync`.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// An external command: program plus fully resolved arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Outcome of a synchronous command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; `-1` when the process was terminated by a signal.
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Captured state of a terminated service process.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    /// Exit code; `-1` when terminated by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessReport {
    /// All captured output, stdout then stderr.
    #[must_use]
    pub fn combined_output(&self) -> String {
        let mut combined = self.stdout.clone();
        combined.push_str(&self.stderr);
        combined
    }
}

/// Handle to a spawned service process (the mount daemon, possibly wrapped
/// by a memory checker).
pub trait ServiceChild: Send {
    /// Non-blocking exit check.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;
    /// Block until termination and capture status plus output. Idempotent:
    /// subsequent calls return the same report.
    fn wait(&mut self) -> io::Result<ProcessReport>;
    /// Forcibly terminate the process.
    fn kill(&mut self) -> io::Result<()>;
}

/// Capability interface for everything the harness asks of the OS.
pub trait System {
    /// Run a command to completion, capturing status and output.
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput>;
    /// Spawn a long-running process with piped output.
    fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn ServiceChild>>;
    /// Whether the canonicalized mountpoint appears in the OS mount table.
    fn query_mount_table(&self, mountpoint: &Path) -> io::Result<bool>;
    /// Force all filesystem buffers to stable storage.
    fn sync_all(&self) -> io::Result<()>;
}

// ── Production implementation ───────────────────────────────────────────────

/// [`System`] backed by the real OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealSystem;

impl System for RealSystem {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        let output = Command::new(&spec.program).args(&spec.args).output()?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn ServiceChild>> {
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        Ok(Box::new(RealChild {
            child: Some(child),
            report: None,
        }))
    }

    fn query_mount_table(&self, mountpoint: &Path) -> io::Result<bool> {
        let canonical = mountpoint.canonicalize()?;
        let canonical = canonical.to_string_lossy();
        let table = std::fs::read_to_string("/proc/mounts")?;
        Ok(table
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|target| target == canonical))
    }

    fn sync_all(&self) -> io::Result<()> {
        let status = Command::new("sync").status()?;
        if !status.success() {
            return Err(io::Error::other("sync exited with non-zero status"));
        }
        Ok(())
    }
}

struct RealChild {
    child: Option<Child>,
    report: Option<ProcessReport>,
}

impl ServiceChild for RealChild {
    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        if let Some(report) = &self.report {
            return Ok(Some(report.status));
        }
        match &mut self.child {
            Some(child) => Ok(child.try_wait()?.map(|s| s.code().unwrap_or(-1))),
            None => Ok(None),
        }
    }

    fn wait(&mut self) -> io::Result<ProcessReport> {
        if let Some(report) = &self.report {
            return Ok(report.clone());
        }
        let child = self
            .child
            .take()
            .ok_or_else(|| io::Error::other("service child already consumed"))?;
        let output = child.wait_with_output()?;
        let report = ProcessReport {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        self.report = Some(report.clone());
        Ok(report)
    }

    fn kill(&mut self) -> io::Result<()> {
        if let Some(child) = &mut self.child {
            child.kill()?;
        }
        Ok(())
    }
}
