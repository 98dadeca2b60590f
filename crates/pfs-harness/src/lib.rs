#![forbid(unsafe_code)]
//! Differential-testing harness for a mountable filesystem service.
//!
//! The harness proves that the service's externally observable filesystem
//! behavior is indistinguishable from a reference POSIX directory (the
//! mirror) across a randomized workload, that state survives an
//! unmount/remount cycle, and that injected fault conditions are surfaced
//! as errors rather than silent corruption.
//!
//! Phases compose linearly:
//!
//! 1. [`session::Session`] scopes all run-unique names and owned resources.
//! 2. [`provision::provision`] builds the environment and brings up the mount.
//! 3. Workloads run through [`mirror::run_mirrored`], [`workload::WorkloadGen`],
//!    and [`paired::PairedFile`].
//! 4. [`verify::verify`] performs the live diff, remount, and durability diff.
//! 5. [`faults`] drives the fault-injection protocol instead of step 4.
//! 6. [`teardown::teardown`] removes everything the session owns.
//!
//! The service under test is a black box reached only through standard
//! filesystem operations and process lifecycle signals, abstracted behind
//! [`system::System`] so every phase runs against fakes in tests.

pub mod faults;
pub mod mirror;
pub mod paired;
pub mod provision;
pub mod scenario;
pub mod session;
pub mod system;
pub mod teardown;
pub mod verify;
pub mod workload;

#[cfg(test)]
mod testutil;

pub use faults::{inject_faults, verify_fault_response, ERROR_MARKER};
pub use mirror::{run_mirrored, TemplateArg};
pub use paired::{create_paired, open_paired, PairedFile, GROWTH_SLACK};
pub use provision::{provision, remount, unmount, wait_until_mounted};
pub use scenario::{run_scenario, Scenario};
pub use session::{Session, SessionConfig};
pub use system::{CommandOutput, CommandSpec, ProcessReport, RealSystem, ServiceChild, System};
pub use teardown::teardown;
pub use verify::{compare_trees, verify, Divergence};
pub use workload::WorkloadGen;
