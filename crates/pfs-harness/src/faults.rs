//! Fault injection: deposit prepared artifacts into the repository's
//! control channel while the service is live, then require the service to
//! surface the condition as an error rather than silently corrupting state.
//!
//! The artifacts are opaque to the harness; their content and meaning are
//! owned by the service. Unlike verification, this path never requires a
//! successful tree comparison, since an injected fault may legitimately
//! leave the mount divergent or unusable.

use pfs_error::{HarnessError, Result};
use pfs_types::{LaunchMode, ACTIONS_SUBDIR};
use std::fs;
use std::path::Path;

use crate::provision::unmount;
use crate::session::Session;
use crate::system::System;

/// Literal marker scanned for in captured service output to detect a
/// reported, non-crash fault.
pub const ERROR_MARKER: &str = "[error]";

/// Copy every file from `artifact_dir` into the repository's `actions/`
/// control channel, then allow the configured settle period for the service
/// to react.
pub fn inject_faults(session: &Session, artifact_dir: &Path) -> Result<()> {
    let repo_path = session.repo().local_path().ok_or_else(|| {
        HarnessError::Environment(
            "fault injection requires a local repository".to_owned(),
        )
    })?;
    let channel = repo_path.join(ACTIONS_SUBDIR);
    fs::create_dir_all(&channel)?;

    let mut deposited = 0_usize;
    for entry in fs::read_dir(artifact_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        fs::copy(entry.path(), channel.join(entry.file_name()))?;
        deposited += 1;
    }
    if deposited == 0 {
        return Err(HarnessError::Environment(format!(
            "no fault artifacts found in {}",
            artifact_dir.display()
        )));
    }
    tracing::info!(
        deposited,
        channel = %channel.display(),
        "fault artifacts deposited, settling"
    );
    std::thread::sleep(session.config().settle);
    Ok(())
}

/// Observe the service's reaction to injected faults.
///
/// In Checked mode the wrapped process is awaited to its natural
/// termination; otherwise the mount is unmounted to bring the process down.
/// The response is accepted when the service exited with its distinguished
/// fault code, or exited cleanly with the [`ERROR_MARKER`] in its captured
/// output. Any other non-zero exit is an unexpected crash; a clean exit
/// without the marker means the fault was silently swallowed.
pub fn verify_fault_response(session: &mut Session, system: &dyn System) -> Result<()> {
    let report = match session.config().launch {
        LaunchMode::Checked => session.collect_process_report()?,
        LaunchMode::Direct => {
            // A service that terminated itself on the fault has already
            // torn the mount down; only a still-running one needs an
            // unmount to bring it to exit.
            if !session.service_exited()? {
                unmount(session, system)?;
            }
            session.collect_process_report()?
        }
        LaunchMode::Debug => {
            return Err(HarnessError::Environment(
                "fault verification needs a harness-owned service process".to_owned(),
            ));
        }
    };

    if session.config().launch == LaunchMode::Checked
        && report.status == session.config().service.checker_error_exit
    {
        return Err(HarnessError::Process {
            status: report.status,
            detail: "memory checker detected errors in the service".to_owned(),
        });
    }
    let fault_exit = session.config().service.fault_exit_code;
    if report.status == fault_exit {
        tracing::info!(status = report.status, "fault surfaced via exit code");
        return Ok(());
    }
    if report.status != 0 {
        return Err(HarnessError::Process {
            status: report.status,
            detail: "service crashed unexpectedly after fault injection".to_owned(),
        });
    }
    if report.combined_output().contains(ERROR_MARKER) {
        tracing::info!("fault surfaced via log marker");
        return Ok(());
    }
    Err(HarnessError::FaultNotReported(format!(
        "service exited cleanly with no `{ERROR_MARKER}` marker in {} bytes of output",
        report.combined_output().len()
    )))
}
