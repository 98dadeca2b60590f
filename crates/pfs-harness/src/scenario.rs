//! Scenario catalog: linear scripts composing the harness phases.
//!
//! Each scenario provisions a fresh session, drives a workload through the
//! mirrored executors, runs the verification protocol (or the fault
//! protocol), and tears the session down. The first failure aborts the
//! scenario with the failing step's error.

use pfs_error::Result;
use pfs_types::{FileOp, TestPath};
use std::path::PathBuf;

use crate::faults::{inject_faults, verify_fault_response};
use crate::mirror::{run_mirrored, TemplateArg};
use crate::paired::{create_paired, open_paired};
use crate::provision::provision;
use crate::session::{Session, SessionConfig};
use crate::system::System;
use crate::teardown::teardown;
use crate::verify::verify;
use crate::workload::WorkloadGen;

/// Upper bound for randomly sized fixture files in the random-tree workload.
const FIXTURE_MAX_BYTES: usize = 256 * 1024;
const CHUNK_128K: usize = 128 * 1024;

/// A runnable scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    /// Random directory tree, fixture copies, and random paired I/O.
    RandomTree { scale: u32 },
    /// One large sequential `cp` through the mirrored command path.
    LargeCopy { kib: u64 },
    /// `dd bs=512` copy exercising partial-block writes.
    BlockCopy { kib: u64 },
    /// Sparse writes leaving a hole, then truncate into it.
    SparseTruncate,
    /// Create a file, then move it into a fresh directory.
    CreateThenMove,
    /// The full rename/overwrite matrix over files and directories.
    RenameMatrix,
    /// Deposit fault artifacts and require the service to surface them.
    FaultSurfacing { artifact_dir: PathBuf },
}

impl Scenario {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RandomTree { .. } => "random-tree",
            Self::LargeCopy { .. } => "large-copy",
            Self::BlockCopy { .. } => "block-copy",
            Self::SparseTruncate => "sparse-truncate",
            Self::CreateThenMove => "create-then-move",
            Self::RenameMatrix => "rename-matrix",
            Self::FaultSurfacing { .. } => "fault-surfacing",
        }
    }

    /// All scenario names accepted by the CLI.
    #[must_use]
    pub fn known_names() -> &'static [&'static str] {
        &[
            "random-tree",
            "large-copy",
            "block-copy",
            "sparse-truncate",
            "create-then-move",
            "rename-matrix",
            "fault-surfacing",
        ]
    }
}

/// Run one scenario end to end: provision, workload, verify (or fault
/// protocol), teardown.
pub fn run_scenario(
    config: SessionConfig,
    system: &dyn System,
    scenario: &Scenario,
) -> Result<()> {
    let mut session = Session::new(config);
    let mut gen = WorkloadGen::new(session.config().seed);
    tracing::info!(scenario = scenario.name(), run_id = session.run_id(), "scenario start");

    provision(&mut session, system)?;

    match scenario {
        Scenario::RandomTree { scale } => {
            random_tree(&mut session, system, &mut gen, *scale)?;
            verify(&mut session, system)?;
        }
        Scenario::LargeCopy { kib } => {
            large_copy(&mut session, system, &mut gen, *kib)?;
            verify(&mut session, system)?;
        }
        Scenario::BlockCopy { kib } => {
            block_copy(&mut session, system, &mut gen, *kib)?;
            verify(&mut session, system)?;
        }
        Scenario::SparseTruncate => {
            sparse_truncate(&session, &mut gen)?;
            verify(&mut session, system)?;
        }
        Scenario::CreateThenMove => {
            create_then_move(&mut session, system, &mut gen)?;
            verify(&mut session, system)?;
        }
        Scenario::RenameMatrix => {
            rename_matrix(&mut session, system, &mut gen)?;
            verify(&mut session, system)?;
        }
        Scenario::FaultSurfacing { artifact_dir } => {
            inject_faults(&session, artifact_dir)?;
            verify_fault_response(&mut session, system)?;
        }
    }

    teardown(&mut session, system)?;
    tracing::info!(scenario = scenario.name(), "scenario passed");
    Ok(())
}

/// Grow a random directory tree, sprinkle fixture files into it, then hammer
/// random existing files with paired read/write/truncate traffic.
fn random_tree(
    session: &mut Session,
    system: &dyn System,
    gen: &mut WorkloadGen,
    scale: u32,
) -> Result<()> {
    for _ in 0..128 * scale {
        let fresh = gen.random_new_name(session)?;
        run_mirrored(session, system, "mkdir", &[TemplateArg::in_root(&fresh)])?;
    }
    for _ in 0..10 * scale {
        let fixture = gen.random_fixture_file(session, FIXTURE_MAX_BYTES, false)?;
        let target = gen.random_dir(session)?;
        run_mirrored(
            session,
            system,
            "cp",
            &[
                TemplateArg::lit(fixture.display().to_string()),
                TemplateArg::in_root(&target),
            ],
        )?;
    }
    for _ in 0..5 * scale {
        let file = gen.random_file(session)?;
        let mut pair = open_paired(session, &file)?;
        for _ in 0..20 {
            pair.random_op(gen)?;
        }
        pair.close()?;
    }
    Ok(())
}

fn large_copy(
    session: &mut Session,
    system: &dyn System,
    gen: &mut WorkloadGen,
    kib: u64,
) -> Result<()> {
    let size = usize::try_from(kib).unwrap_or(usize::MAX).saturating_mul(1024);
    let fixture = gen.random_fixture_file(session, size, true)?;
    run_mirrored(
        session,
        system,
        "cp",
        &[
            TemplateArg::lit(fixture.display().to_string()),
            TemplateArg::InRoot(TestPath::root()),
        ],
    )
}

fn block_copy(
    session: &mut Session,
    system: &dyn System,
    gen: &mut WorkloadGen,
    kib: u64,
) -> Result<()> {
    let size = usize::try_from(kib).unwrap_or(usize::MAX).saturating_mul(1024);
    let fixture = gen.random_fixture_file(session, size, true)?;
    let name = fixture
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "block-copy.bin".to_owned());
    let target = TestPath::new(name)
        .map_err(|err| pfs_error::HarnessError::Environment(err.to_string()))?;
    run_mirrored(
        session,
        system,
        "dd",
        &[
            TemplateArg::lit("bs=512"),
            TemplateArg::lit(format!("if={}", fixture.display())),
            TemplateArg::Prefixed("of=".to_owned(), target),
        ],
    )
}

/// 128 KiB at offset 0, 128 KiB at offset 256 KiB (leaving a 128 KiB hole),
/// then truncate to 192 KiB. The hole remainder must read as zeros on both
/// sides, identically.
fn sparse_truncate(session: &Session, gen: &mut WorkloadGen) -> Result<()> {
    let path = TestPath::new("testfile.bin")
        .map_err(|err| pfs_error::HarnessError::Environment(err.to_string()))?;

    let mut pair = create_paired(session, &path)?;
    pair.apply(gen, FileOp::Write { offset: 0, len: CHUNK_128K })?;
    pair.apply(gen, FileOp::Write { offset: 256 * 1024, len: CHUNK_128K })?;
    pair.close()?;

    let mut pair = open_paired(session, &path)?;
    pair.apply(gen, FileOp::Truncate { len: 192 * 1024 })?;
    pair.close()
}

fn create_then_move(
    session: &mut Session,
    system: &dyn System,
    gen: &mut WorkloadGen,
) -> Result<()> {
    let file = TestPath::new("testfile.bin")
        .map_err(|err| pfs_error::HarnessError::Environment(err.to_string()))?;
    let mut pair = create_paired(session, &file)?;
    pair.apply(gen, FileOp::Write { offset: 0, len: CHUNK_128K })?;
    pair.apply(gen, FileOp::Write { offset: 256 * 1024, len: CHUNK_128K })?;
    pair.close()?;

    mirrored_mkdir(session, system, "foo")?;
    run_mirrored(
        session,
        system,
        "mv",
        &[
            TemplateArg::in_root(&file),
            TemplateArg::parse("__TESTDIR__/foo").map_err(env_err)?,
        ],
    )
}

/// Every rename shape the service must get right: in-place rename, rename
/// over an existing file, moves between root and subdirectories, directory
/// rename onto a fresh name, and directory rename onto an existing one.
fn rename_matrix(
    session: &mut Session,
    system: &dyn System,
    gen: &mut WorkloadGen,
) -> Result<()> {
    for dir in [
        "d1", "d2", "d3", "d3/dd1", "d3/dd1/ddd1", "d3/dd1/ddd2", "d3/dd2", "d3/dd3", "d4",
        "d4/dd1", "d4/dd1/ddd1", "d4/dd1/ddd2", "d4/dd2", "d4/dd3", "d5",
    ] {
        mirrored_mkdir(session, system, dir)?;
    }

    for file in [
        "f1.bin",
        "f2.bin",
        "f3.bin",
        "f4.bin",
        "f5.bin",
        "d1/ff1.bin",
        "d1/ff2.bin",
        "d3/ff1.bin",
        "d3/ff2.bin",
        "d3/dd1/fff1.bin",
        "d4/ff1.bin",
        "d4/ff2.bin",
        "d4/dd1/fff1.bin",
    ] {
        let path = TestPath::new(file).map_err(env_err)?;
        let mut pair = create_paired(session, &path)?;
        pair.apply(gen, FileOp::Write { offset: 0, len: CHUNK_128K })?;
        pair.close()?;
    }

    let moves = [
        // rename in the root
        ("f1.bin", "f4.bin"),
        // rename in the root, overwriting another file
        ("f2.bin", "f3.bin"),
        // move into a directory
        ("f4.bin", "d1"),
        // move into a directory, overwriting another file
        ("f5.bin", "d1/ff1.bin"),
        // move from a directory back to the root
        ("d1/ff2.bin", ""),
        // rename a directory
        ("d3", "d6"),
        // rename a directory onto an existing one
        ("d4", "d5"),
    ];
    for (from, to) in moves {
        let from = TestPath::new(from).map_err(env_err)?;
        let to = if to.is_empty() {
            TestPath::root()
        } else {
            TestPath::new(to).map_err(env_err)?
        };
        run_mirrored(
            session,
            system,
            "mv",
            &[TemplateArg::in_root(&from), TemplateArg::in_root(&to)],
        )?;
    }
    Ok(())
}

fn mirrored_mkdir(session: &Session, system: &dyn System, rel: &str) -> Result<()> {
    let dir = TestPath::new(rel).map_err(env_err)?;
    run_mirrored(session, system, "mkdir", &[TemplateArg::in_root(&dir)])
}

fn env_err(err: pfs_types::ParseError) -> pfs_error::HarnessError {
    pfs_error::HarnessError::Environment(err.to_string())
}
