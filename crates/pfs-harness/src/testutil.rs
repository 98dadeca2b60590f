//! In-crate fakes for the [`System`](crate::system::System) capability
//! interface, used by unit tests across the phase modules.

use std::cell::{Cell, RefCell};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pfs_types::{LaunchMode, RepoLocator};

use crate::session::{Session, SessionConfig};
use crate::system::{CommandOutput, CommandSpec, ProcessReport, ServiceChild, System};

/// Scripted [`System`] fake: records every invocation, reports the mount as
/// visible after a configurable number of polls, and hands out scripted
/// service children.
pub(crate) struct FakeSystem {
    pub runs: RefCell<Vec<CommandSpec>>,
    pub spawns: RefCell<Vec<CommandSpec>>,
    /// Programs whose synchronous invocation should fail with this status.
    pub fail_program: Option<(String, i32)>,
    /// Number of mount-table polls that return "not mounted" before the
    /// mount becomes visible. `u32::MAX` means never.
    pub polls_until_mounted: Cell<u32>,
    pub child_status: i32,
    pub child_stdout: String,
    pub child_stderr: String,
    /// Whether handed-out children report themselves as still running.
    pub child_running: bool,
    /// Kill calls observed across all handed-out children.
    pub kills: Arc<AtomicU32>,
}

impl Default for FakeSystem {
    fn default() -> Self {
        Self {
            runs: RefCell::new(Vec::new()),
            spawns: RefCell::new(Vec::new()),
            fail_program: None,
            polls_until_mounted: Cell::new(0),
            child_status: 0,
            child_stdout: String::new(),
            child_stderr: String::new(),
            child_running: false,
            kills: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl FakeSystem {
    pub fn ran_program(&self, program: &str) -> Vec<CommandSpec> {
        self.runs
            .borrow()
            .iter()
            .filter(|spec| spec.program == program)
            .cloned()
            .collect()
    }
}

impl System for FakeSystem {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        self.runs.borrow_mut().push(spec.clone());
        let status = match &self.fail_program {
            Some((program, status)) if *program == spec.program => *status,
            _ => 0,
        };
        Ok(CommandOutput {
            status,
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }

    fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn ServiceChild>> {
        self.spawns.borrow_mut().push(spec.clone());
        Ok(Box::new(FakeChild {
            status: self.child_status,
            stdout: self.child_stdout.clone(),
            stderr: self.child_stderr.clone(),
            running: self.child_running,
            kills: Arc::clone(&self.kills),
        }))
    }

    fn query_mount_table(&self, _mountpoint: &Path) -> io::Result<bool> {
        let remaining = self.polls_until_mounted.get();
        if remaining == 0 {
            return Ok(true);
        }
        if remaining != u32::MAX {
            self.polls_until_mounted.set(remaining - 1);
        }
        Ok(false)
    }

    fn sync_all(&self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) struct FakeChild {
    status: i32,
    stdout: String,
    stderr: String,
    running: bool,
    kills: Arc<AtomicU32>,
}

impl ServiceChild for FakeChild {
    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        if self.running {
            Ok(None)
        } else {
            Ok(Some(self.status))
        }
    }

    fn wait(&mut self) -> io::Result<ProcessReport> {
        self.running = false;
        Ok(ProcessReport {
            status: self.status,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        })
    }

    fn kill(&mut self) -> io::Result<()> {
        self.kills.fetch_add(1, Ordering::Relaxed);
        self.running = false;
        Ok(())
    }
}

/// A session rooted in `base` with fast polling and no settle delay.
pub(crate) fn test_session(base: &Path, launch: LaunchMode) -> Session {
    let config = SessionConfig {
        base_dir: base.to_path_buf(),
        repo_base: RepoLocator::Local(PathBuf::from(base)),
        launch,
        seed: 42,
        poll_interval: Duration::from_millis(1),
        mount_timeout: Some(Duration::from_millis(200)),
        settle: Duration::ZERO,
        ..SessionConfig::default()
    };
    Session::new(config)
}
