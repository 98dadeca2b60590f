#![forbid(unsafe_code)]
//! End-to-end scenario runs against a scripted service layer.
//!
//! Real external commands (`mkdir`, `cp`, `mv`, `dd`) are executed against
//! both roots, so the "service" is a plain directory receiving exactly the
//! mirrored workload; only the service-owned commands (init, mount, unmount)
//! and the mount table are scripted. This exercises every phase of the
//! harness except a real daemon's durability, which needs the service
//! binaries.

use pfs_harness::{
    compare_trees, provision, run_scenario, verify, CommandOutput, CommandSpec, ProcessReport,
    RealSystem, Scenario, ServiceChild, Session, SessionConfig, System,
};
use pfs_types::RepoLocator;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

struct ScriptedChild {
    status: i32,
    stdout: String,
}

impl ServiceChild for ScriptedChild {
    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(Some(self.status))
    }

    fn wait(&mut self) -> io::Result<ProcessReport> {
        Ok(ProcessReport {
            status: self.status,
            stdout: self.stdout.clone(),
            stderr: String::new(),
        })
    }

    fn kill(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Delegates ordinary commands to the real OS and scripts the service's.
struct ScriptedService {
    real: RealSystem,
    child_status: i32,
    child_stdout: String,
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self {
            real: RealSystem,
            child_status: 0,
            child_stdout: String::new(),
        }
    }
}

impl System for ScriptedService {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        match spec.program.as_str() {
            "pfs-init" | "umount" | "ssh" => Ok(CommandOutput {
                status: 0,
                stdout: Vec::new(),
                stderr: Vec::new(),
            }),
            _ => self.real.run(spec),
        }
    }

    fn spawn(&self, _spec: &CommandSpec) -> io::Result<Box<dyn ServiceChild>> {
        Ok(Box::new(ScriptedChild {
            status: self.child_status,
            stdout: self.child_stdout.clone(),
        }))
    }

    fn query_mount_table(&self, _mountpoint: &Path) -> io::Result<bool> {
        Ok(true)
    }

    fn sync_all(&self) -> io::Result<()> {
        Ok(())
    }
}

fn test_config(base: &Path) -> SessionConfig {
    SessionConfig {
        base_dir: base.to_path_buf(),
        repo_base: RepoLocator::Local(PathBuf::from(base)),
        seed: 0xC0FF_EE00,
        poll_interval: Duration::from_millis(1),
        mount_timeout: Some(Duration::from_secs(2)),
        settle: Duration::ZERO,
        ..SessionConfig::default()
    }
}

fn assert_base_is_empty(base: &Path) {
    let leftovers: Vec<_> = fs::read_dir(base)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(leftovers.is_empty(), "teardown left {leftovers:?}");
}

#[test]
fn sparse_truncate_scenario_passes_and_cleans_up() {
    let base = tempfile::tempdir().unwrap();
    run_scenario(
        test_config(base.path()),
        &ScriptedService::default(),
        &Scenario::SparseTruncate,
    )
    .unwrap();
    assert_base_is_empty(base.path());
}

#[test]
fn create_then_move_scenario_passes() {
    let base = tempfile::tempdir().unwrap();
    run_scenario(
        test_config(base.path()),
        &ScriptedService::default(),
        &Scenario::CreateThenMove,
    )
    .unwrap();
    assert_base_is_empty(base.path());
}

#[test]
fn rename_matrix_scenario_passes() {
    let base = tempfile::tempdir().unwrap();
    run_scenario(
        test_config(base.path()),
        &ScriptedService::default(),
        &Scenario::RenameMatrix,
    )
    .unwrap();
    assert_base_is_empty(base.path());
}

#[test]
fn random_tree_scenario_passes() {
    let base = tempfile::tempdir().unwrap();
    run_scenario(
        test_config(base.path()),
        &ScriptedService::default(),
        &Scenario::RandomTree { scale: 1 },
    )
    .unwrap();
    assert_base_is_empty(base.path());
}

#[test]
fn block_copy_scenario_passes() {
    let base = tempfile::tempdir().unwrap();
    run_scenario(
        test_config(base.path()),
        &ScriptedService::default(),
        &Scenario::BlockCopy { kib: 64 },
    )
    .unwrap();
    assert_base_is_empty(base.path());
}

#[test]
fn large_copy_scenario_passes() {
    let base = tempfile::tempdir().unwrap();
    run_scenario(
        test_config(base.path()),
        &ScriptedService::default(),
        &Scenario::LargeCopy { kib: 512 },
    )
    .unwrap();
    assert_base_is_empty(base.path());
}

#[test]
fn fault_surfacing_accepts_a_logged_marker() {
    let base = tempfile::tempdir().unwrap();
    let artifacts = base.path().join("fault-artifacts");
    fs::create_dir_all(&artifacts).unwrap();
    fs::write(artifacts.join("action_dup"), b"duplicate-action").unwrap();

    let system = ScriptedService {
        child_stdout: "processing actions\n[error] duplicate action id\n".to_owned(),
        ..ScriptedService::default()
    };
    run_scenario(
        test_config(base.path()),
        &system,
        &Scenario::FaultSurfacing {
            artifact_dir: artifacts.clone(),
        },
    )
    .unwrap();
}

#[test]
fn fault_surfacing_rejects_a_silent_service() {
    let base = tempfile::tempdir().unwrap();
    let artifacts = base.path().join("fault-artifacts");
    fs::create_dir_all(&artifacts).unwrap();
    fs::write(artifacts.join("action_dup"), b"duplicate-action").unwrap();

    let err = run_scenario(
        test_config(base.path()),
        &ScriptedService::default(),
        &Scenario::FaultSurfacing {
            artifact_dir: artifacts,
        },
    )
    .unwrap_err();
    assert!(matches!(err, pfs_error::HarnessError::FaultNotReported(_)));
}

#[test]
fn injected_divergence_is_caught_by_verification() {
    let base = tempfile::tempdir().unwrap();
    let system = ScriptedService::default();
    let mut session = Session::new(test_config(base.path()));
    provision(&mut session, &system).unwrap();

    fs::write(session.mount_dir().join("f.bin"), b"live bytes").unwrap();
    fs::write(session.mirror_dir().join("f.bin"), b"mirr bytes").unwrap();

    let diff = compare_trees(session.mount_dir(), session.mirror_dir()).unwrap();
    assert_eq!(diff.len(), 1);

    let err = verify(&mut session, &system).unwrap_err();
    assert!(matches!(err, pfs_error::HarnessError::Divergence { .. }));
}
