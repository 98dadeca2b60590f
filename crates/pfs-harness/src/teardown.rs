//! Session teardown: unmount, then remove every session-scoped resource,
//! including repositories behind a remote locator.
//!
//! Fail-fast: the first deletion failure aborts the scenario. Resources that
//! were never created (a provision step that failed early) are not errors.

use pfs_error::{HarnessError, Result};
use pfs_types::RepoLocator;
use std::fs;
use std::path::Path;

use crate::provision::unmount;
use crate::session::Session;
use crate::system::{CommandSpec, System};

/// Tear the session down: unmount if still mounted, delete the mirror, the
/// repository (over a remote shell when the locator is remote), the
/// mountpoint, and every registered fixture file.
pub fn teardown(session: &mut Session, system: &dyn System) -> Result<()> {
    let still_mounted = system
        .query_mount_table(session.mount_dir())
        .unwrap_or(false);
    if still_mounted {
        unmount(session, system)?;
    }

    remove_dir_if_present(session.mirror_dir())?;

    let repo = session.repo().clone();
    match &repo {
        RepoLocator::Local(path) => remove_dir_if_present(path)?,
        RepoLocator::Remote(remote) => {
            let mut args = Vec::new();
            if let Some(port) = remote.port {
                args.push("-p".to_owned());
                args.push(port.to_string());
            }
            args.push(remote.host.clone());
            args.push("rm".to_owned());
            args.push("-rf".to_owned());
            args.push(remote.path.clone());
            let spec = CommandSpec::new("ssh", args);
            tracing::debug!(command = %spec, "removing remote repository");
            let output = system.run(&spec)?;
            if !output.success() {
                return Err(HarnessError::Command {
                    command: spec.to_string(),
                    status: output.status,
                });
            }
        }
    }

    remove_dir_if_present(session.mount_dir())?;

    for fixture in session.fixtures().to_vec() {
        match fs::remove_file(&fixture) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    remove_dir_if_present(session.fixture_dir())?;

    tracing::info!(run_id = session.run_id(), "session torn down");
    Ok(())
}

fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
