//! Session state: the identifiers and owned resources scoping one test run.
//!
//! A [`Session`] is an explicit value threaded by reference through every
//! phase. All names derive from a run id unique within the process (pid plus
//! a counter), so independent sessions never collide on disk or in the
//! repository namespace.

use pfs_error::{HarnessError, Result};
use pfs_types::{EncryptionMode, LaunchMode, RepoLocator, Root, ServiceCommands, TestPath};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::system::{ProcessReport, ServiceChild};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

/// Configuration for one harness run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory under which the mirror, mountpoint, fixture scratch, and
    /// (for local repositories) the repository itself are created.
    pub base_dir: PathBuf,
    /// Base repository location; the session appends a run-scoped suffix.
    pub repo_base: RepoLocator,
    pub encryption: EncryptionMode,
    pub passphrase: Option<String>,
    pub launch: LaunchMode,
    /// Seed for the workload generator; logged at session start so any
    /// failing workload can be replayed.
    pub seed: u64,
    /// Mount-table poll interval.
    pub poll_interval: Duration,
    /// Bound on the mount-readiness wait. `None` waits forever, which is
    /// only sensible for interactive debugging runs.
    pub mount_timeout: Option<Duration>,
    /// Settle delay after fault injection, before observing the response.
    pub settle: Duration,
    pub service: ServiceCommands,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let base_dir = std::env::temp_dir();
        Self {
            repo_base: RepoLocator::Local(base_dir.clone()),
            base_dir,
            encryption: EncryptionMode::None,
            passphrase: None,
            launch: LaunchMode::Direct,
            seed: 0x5EED_0001_0000_0001,
            poll_interval: Duration::from_millis(250),
            mount_timeout: Some(Duration::from_secs(60)),
            settle: Duration::from_secs(25),
            service: ServiceCommands::default(),
        }
    }
}

/// The running (or terminated) service process for this session.
///
/// `child` is `None` in Debug mode, where an operator launched the process
/// by hand. `report` is populated once the process has been awaited.
pub struct MountedInstance {
    pub(crate) child: Option<Box<dyn ServiceChild>>,
    pub(crate) report: Option<ProcessReport>,
}

impl MountedInstance {
    pub(crate) fn new(child: Option<Box<dyn ServiceChild>>) -> Self {
        Self {
            child,
            report: None,
        }
    }
}

/// One test run: unique paths, the per-session repository location, the
/// registered fixture files, and the mounted service instance.
pub struct Session {
    run_id: String,
    config: SessionConfig,
    mirror_dir: PathBuf,
    mount_dir: PathBuf,
    fixture_dir: PathBuf,
    repo: RepoLocator,
    fixtures: Vec<PathBuf>,
    pub(crate) mounted: Option<MountedInstance>,
}

impl Session {
    /// Allocate run-scoped names from the configuration. Touches nothing on
    /// disk; provisioning does that.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let run_id = format!(
            "{}-{}",
            std::process::id(),
            NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
        );
        let mirror_dir = config.base_dir.join(format!("parity-{run_id}-mirror"));
        let mount_dir = config.base_dir.join(format!("parity-{run_id}"));
        let fixture_dir = config.base_dir.join(format!("parity-{run_id}-tmp"));
        let repo = config.repo_base.join_run_suffix(&format!("parity-{run_id}-repo"));
        tracing::info!(
            run_id = %run_id,
            seed = config.seed,
            repo = %repo,
            launch = ?config.launch,
            "session created"
        );
        Self {
            run_id,
            config,
            mirror_dir,
            mount_dir,
            fixture_dir,
            repo,
            fixtures: Vec::new(),
            mounted: None,
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn mirror_dir(&self) -> &Path {
        &self.mirror_dir
    }

    #[must_use]
    pub fn mount_dir(&self) -> &Path {
        &self.mount_dir
    }

    /// Scratch directory for generated fixture files.
    #[must_use]
    pub fn fixture_dir(&self) -> &Path {
        &self.fixture_dir
    }

    #[must_use]
    pub fn repo(&self) -> &RepoLocator {
        &self.repo
    }

    /// Resolve a logical path against one of the two roots.
    #[must_use]
    pub fn resolve(&self, root: Root, path: &TestPath) -> PathBuf {
        match root {
            Root::Live => path.resolve(&self.mount_dir),
            Root::Mirror => path.resolve(&self.mirror_dir),
        }
    }

    /// Register a generated fixture file for deletion at teardown.
    pub fn register_fixture(&mut self, path: PathBuf) {
        self.fixtures.push(path);
    }

    #[must_use]
    pub fn fixtures(&self) -> &[PathBuf] {
        &self.fixtures
    }

    /// The terminated service process report, if collected yet.
    #[must_use]
    pub fn process_report(&self) -> Option<&ProcessReport> {
        self.mounted.as_ref().and_then(|m| m.report.as_ref())
    }

    /// Non-blocking check whether the service process has already exited.
    /// `false` when there is no harness-owned process to ask.
    pub fn service_exited(&mut self) -> Result<bool> {
        let Some(mounted) = &mut self.mounted else {
            return Ok(false);
        };
        if mounted.report.is_some() {
            return Ok(true);
        }
        match &mut mounted.child {
            Some(child) => Ok(child.try_wait()?.is_some()),
            None => Ok(false),
        }
    }

    /// Await the service process and store its report. Errors if this
    /// session never spawned one (Debug mode, or not yet provisioned).
    pub fn collect_process_report(&mut self) -> Result<ProcessReport> {
        let mounted = self.mounted.as_mut().ok_or_else(|| {
            HarnessError::Environment("no service instance for this session".to_owned())
        })?;
        if let Some(report) = &mounted.report {
            return Ok(report.clone());
        }
        let child = mounted.child.as_mut().ok_or_else(|| {
            HarnessError::Environment(
                "service was launched externally; no process handle to await".to_owned(),
            )
        })?;
        let report = child.wait()?;
        mounted.report = Some(report.clone());
        Ok(report)
    }
}
