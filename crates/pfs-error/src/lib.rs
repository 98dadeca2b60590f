#![forbid(unsafe_code)]
//! Error types for the parityfs harness.
//!
//! The harness is uniformly fail-fast: the first error aborts the whole
//! scenario, there is no retry or partial-failure recovery anywhere. A test
//! harness must not mask the defect it exists to find, so every variant here
//! terminates the run and carries enough context (paths, offsets, exit
//! codes) to diagnose the failing step without re-running.
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | `Environment` | Setup precondition violated (directory already exists, mount table unreadable) |
//! | `Provision` | Repository init or mount launch returned non-zero |
//! | `Command` | A mirrored external command returned non-zero |
//! | `Divergence` | Live mount and mirror disagree on structure or bytes |
//! | `Process` | The service process exited with an unexpected status |
//! | `FaultNotReported` | An injected fault produced neither a marker nor an expected exit |
//! | `Timeout` | Bounded mount-readiness wait elapsed |
//! | `Io` | OS-level I/O failure in the harness itself |

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for every harness phase.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Setup precondition violated before the service was ever involved.
    #[error("environment error: {0}")]
    Environment(String),

    /// Repository initialization or mount launch failed.
    #[error("provisioning failed: {command} exited with {status}")]
    Provision { command: String, status: i32 },

    /// A mirrored external command returned non-zero.
    #[error("command failed: {command} exited with {status}")]
    Command { command: String, status: i32 },

    /// Live mount and mirror disagree where they must be identical.
    #[error("divergence at {path}: {detail}")]
    Divergence { path: PathBuf, detail: String },

    /// The service process exited with a status the scenario did not expect.
    #[error("service process error: {detail} (status {status})")]
    Process { status: i32, detail: String },

    /// An injected fault was neither reported nor fatal to the service.
    #[error("injected fault was not reported: {0}")]
    FaultNotReported(String),

    /// A bounded wait for mount readiness elapsed.
    #[error("timed out after {millis} ms waiting for {what}")]
    Timeout { what: String, millis: u64 },

    /// OS-level I/O failure in the harness itself.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Divergence helper with a formatted detail string.
    pub fn divergence(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::Divergence {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

/// Result alias using `HarnessError`.
pub type Result<T> = std::result::Result<T, HarnessError>;
