//! Environment provisioning: directories, repository initialization, mount
//! launch, and readiness polling.
//!
//! No rollback on partial failure; a half-provisioned session is disposable
//! and cleaned up externally.

use pfs_error::{HarnessError, Result};
use pfs_types::LaunchMode;
use std::fs;
use std::io::BufRead;
use std::time::Instant;

use crate::session::{MountedInstance, Session};
use crate::system::{CommandSpec, System};

/// Provision the full environment for a session: mirror and mount
/// directories, a freshly initialized repository, and a live mount.
pub fn provision(session: &mut Session, system: &dyn System) -> Result<()> {
    create_session_dirs(session)?;
    init_repository(session, system)?;
    launch_mount(session, system)?;
    wait_or_kill(session, system)?;
    tracing::info!(run_id = session.run_id(), "environment provisioned");
    Ok(())
}

/// Remount from the same repository, as the durability half of verification.
pub fn remount(session: &mut Session, system: &dyn System) -> Result<()> {
    launch_mount(session, system)?;
    wait_or_kill(session, system)
}

/// A spawned process that never reached the mount table is useless once the
/// wait gives up on it; kill it so the session does not leak a child.
fn wait_or_kill(session: &mut Session, system: &dyn System) -> Result<()> {
    if let Err(err) = wait_until_mounted(session, system) {
        if let Some(child) = session.mounted.as_mut().and_then(|m| m.child.as_mut()) {
            if let Err(kill_err) = child.kill() {
                tracing::warn!(%kill_err, "could not kill unresponsive service process");
            }
        }
        return Err(err);
    }
    Ok(())
}

/// Unmount the live mount and, if this session owns the service process,
/// await it and store its report.
pub fn unmount(session: &mut Session, system: &dyn System) -> Result<()> {
    let spec = CommandSpec::new(
        session.config().service.unmount_program.clone(),
        vec![session.mount_dir().display().to_string()],
    );
    tracing::debug!(command = %spec, "unmounting");
    let output = system.run(&spec)?;
    if !output.success() {
        return Err(HarnessError::Command {
            command: spec.to_string(),
            status: output.status,
        });
    }
    let owns_child = session
        .mounted
        .as_ref()
        .is_some_and(|m| m.child.is_some() && m.report.is_none());
    if owns_child {
        let report = session.collect_process_report()?;
        tracing::debug!(status = report.status, "service process exited");
    }
    Ok(())
}

fn create_session_dirs(session: &Session) -> Result<()> {
    for dir in [session.mirror_dir(), session.mount_dir()] {
        fs::create_dir(dir).map_err(|err| {
            HarnessError::Environment(format!("cannot create {}: {err}", dir.display()))
        })?;
    }
    // Fixture scratch may be shared across retries of the same base dir.
    fs::create_dir_all(session.fixture_dir()).map_err(|err| {
        HarnessError::Environment(format!(
            "cannot create {}: {err}",
            session.fixture_dir().display()
        ))
    })?;
    Ok(())
}

fn init_repository(session: &Session, system: &dyn System) -> Result<()> {
    let spec = init_command(session);
    tracing::debug!(command = %spec, "initializing repository");
    let output = system.run(&spec)?;
    if !output.success() {
        return Err(HarnessError::Provision {
            command: spec.to_string(),
            status: output.status,
        });
    }
    Ok(())
}

fn launch_mount(session: &mut Session, system: &dyn System) -> Result<()> {
    let spec = mount_command(session);
    let instance = match session.config().launch {
        LaunchMode::Direct => {
            tracing::debug!(command = %spec, "launching mount");
            MountedInstance::new(Some(system.spawn(&spec)?))
        }
        LaunchMode::Debug => {
            // Surface the exact command line and suspend so an operator can
            // start the process under a debugger.
            eprintln!("debug mode: start the service yourself:");
            eprintln!("  {spec}");
            eprintln!("press Enter once the process is running...");
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            MountedInstance::new(None)
        }
        LaunchMode::Checked => {
            let wrapped = checker_command(session, &spec);
            tracing::debug!(command = %wrapped, "launching mount under checker");
            MountedInstance::new(Some(system.spawn(&wrapped)?))
        }
    };
    session.mounted = Some(instance);
    Ok(())
}

/// Poll the OS mount table until the mountpoint appears, at the configured
/// interval, bounded by the configured timeout (`None` waits forever).
pub fn wait_until_mounted(session: &Session, system: &dyn System) -> Result<()> {
    let mountpoint = session.mount_dir();
    let started = Instant::now();
    loop {
        let mounted = system.query_mount_table(mountpoint).map_err(|err| {
            HarnessError::Environment(format!("cannot query mount table: {err}"))
        })?;
        if mounted {
            tracing::debug!(mountpoint = %mountpoint.display(), "mount is active");
            return Ok(());
        }
        if let Some(timeout) = session.config().mount_timeout {
            if started.elapsed() >= timeout {
                return Err(HarnessError::Timeout {
                    what: format!("mount of {}", mountpoint.display()),
                    millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }
        std::thread::sleep(session.config().poll_interval);
    }
}

fn init_command(session: &Session) -> CommandSpec {
    let service = &session.config().service;
    let mut args = vec!["-e".to_owned(), session.config().encryption.to_string()];
    if let Some(pass) = &session.config().passphrase {
        args.push("-p".to_owned());
        args.push(pass.clone());
    }
    args.push(session.repo().as_argument());
    CommandSpec::new(service.init_program.clone(), args)
}

fn mount_command(session: &Session) -> CommandSpec {
    let service = &session.config().service;
    let mut args = Vec::new();
    if let Some(flag) = &service.foreground_flag {
        args.push(flag.clone());
    }
    if let Some(flag) = &service.verbosity_flag {
        args.push(flag.clone());
    }
    if let Some(pass) = &session.config().passphrase {
        args.push("-p".to_owned());
        args.push(pass.clone());
    }
    args.push("-r".to_owned());
    args.push(session.repo().as_argument());
    args.push(session.mount_dir().display().to_string());
    CommandSpec::new(service.mount_program.clone(), args)
}

fn checker_command(session: &Session, mount: &CommandSpec) -> CommandSpec {
    let service = &session.config().service;
    let mut args = service.checker_args.clone();
    args.push(mount.program.clone());
    args.extend(mount.args.iter().cloned());
    CommandSpec::new(service.checker_program.clone(), args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_session, FakeSystem};
    use pfs_types::{EncryptionMode, LaunchMode};

    #[test]
    fn provision_creates_dirs_inits_and_mounts() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), LaunchMode::Direct);
        let system = FakeSystem::default();

        provision(&mut session, &system).unwrap();

        assert!(session.mirror_dir().is_dir());
        assert!(session.mount_dir().is_dir());
        assert!(session.fixture_dir().is_dir());

        let inits = system.ran_program("pfs-init");
        assert_eq!(inits.len(), 1);
        assert_eq!(inits[0].args[0], "-e");
        assert_eq!(inits[0].args[1], "none");
        assert_eq!(inits[0].args[2], session.repo().as_argument());

        let spawns = system.spawns.borrow();
        assert_eq!(spawns.len(), 1);
        assert_eq!(spawns[0].program, "pfs-mount");
        assert!(spawns[0].args.contains(&"-r".to_owned()));
        assert!(spawns[0]
            .args
            .contains(&session.mount_dir().display().to_string()));
    }

    #[test]
    fn encrypted_session_passes_mode_and_passphrase() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), LaunchMode::Direct);
        {
            // Rebuild with encryption enabled.
            let mut config = session.config().clone();
            config.encryption = EncryptionMode::Aes;
            config.passphrase = Some("hunter2".to_owned());
            session = crate::session::Session::new(config);
        }
        let system = FakeSystem::default();
        provision(&mut session, &system).unwrap();

        let inits = system.ran_program("pfs-init");
        assert_eq!(inits[0].args[1], "aes");
        assert!(inits[0].args.contains(&"hunter2".to_owned()));

        let spawns = system.spawns.borrow();
        assert!(spawns[0].args.contains(&"hunter2".to_owned()));
    }

    #[test]
    fn preexisting_mirror_dir_is_an_environment_error() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), LaunchMode::Direct);
        std::fs::create_dir(session.mirror_dir()).unwrap();

        let err = provision(&mut session, &FakeSystem::default()).unwrap_err();
        assert!(matches!(err, pfs_error::HarnessError::Environment(_)));
    }

    #[test]
    fn failed_init_is_a_provision_error() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), LaunchMode::Direct);
        let system = FakeSystem {
            fail_program: Some(("pfs-init".to_owned(), 2)),
            ..FakeSystem::default()
        };

        let err = provision(&mut session, &system).unwrap_err();
        match err {
            pfs_error::HarnessError::Provision { status, .. } => assert_eq!(status, 2),
            other => panic!("expected Provision, got {other}"),
        }
    }

    #[test]
    fn checked_mode_wraps_the_mount_command() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), LaunchMode::Checked);
        let system = FakeSystem::default();
        provision(&mut session, &system).unwrap();

        let spawns = system.spawns.borrow();
        assert_eq!(spawns[0].program, "valgrind");
        assert!(spawns[0].args.contains(&"--error-exitcode=42".to_owned()));
        assert!(spawns[0].args.contains(&"pfs-mount".to_owned()));
    }

    #[test]
    fn mount_wait_retries_until_the_table_shows_it() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), LaunchMode::Direct);
        let system = FakeSystem::default();
        system.polls_until_mounted.set(3);

        provision(&mut session, &system).unwrap();
        assert_eq!(system.polls_until_mounted.get(), 0);
    }

    #[test]
    fn bounded_wait_times_out_with_a_typed_error() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), LaunchMode::Direct);
        let system = FakeSystem::default();
        system.polls_until_mounted.set(u32::MAX);

        let err = provision(&mut session, &system).unwrap_err();
        assert!(matches!(err, pfs_error::HarnessError::Timeout { .. }));
    }

    #[test]
    fn timed_out_mount_process_is_killed() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), LaunchMode::Direct);
        let system = FakeSystem {
            child_running: true,
            ..FakeSystem::default()
        };
        system.polls_until_mounted.set(u32::MAX);

        provision(&mut session, &system).unwrap_err();
        assert_eq!(system.kills.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn unmount_runs_the_configured_command_and_collects_the_report() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), LaunchMode::Direct);
        let system = FakeSystem {
            child_status: 0,
            child_stdout: "bye\n".to_owned(),
            ..FakeSystem::default()
        };
        provision(&mut session, &system).unwrap();

        unmount(&mut session, &system).unwrap();
        let unmounts = system.ran_program("umount");
        assert_eq!(unmounts.len(), 1);
        assert_eq!(
            unmounts[0].args[0],
            session.mount_dir().display().to_string()
        );
        assert_eq!(session.process_report().unwrap().stdout, "bye\n");
    }
}
