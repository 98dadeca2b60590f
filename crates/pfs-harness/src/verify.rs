//! Differential verification: recursive tree comparison, then an
//! unmount/remount cycle and a second comparison for durability.

use pfs_error::{HarnessError, Result};
use pfs_types::LaunchMode;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::provision::{remount, unmount};
use crate::session::Session;
use crate::system::System;

const COMPARE_CHUNK: usize = 64 * 1024;

/// Directory entry kind, for structural comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Dir,
    File,
    Symlink,
    Other,
}

/// A single observed difference between the live mount and the mirror.
/// Serializable so failure reports can be captured by outer tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Divergence {
    MissingInLive { path: PathBuf },
    MissingInMirror { path: PathBuf },
    KindMismatch { path: PathBuf },
    LengthMismatch { path: PathBuf, live: u64, mirror: u64 },
    ContentMismatch { path: PathBuf, offset: u64 },
    TargetMismatch { path: PathBuf },
}

impl Divergence {
    /// The relative path this divergence names.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::MissingInLive { path }
            | Self::MissingInMirror { path }
            | Self::KindMismatch { path }
            | Self::LengthMismatch { path, .. }
            | Self::ContentMismatch { path, .. }
            | Self::TargetMismatch { path } => path,
        }
    }
}

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingInLive { path } => {
                write!(f, "{} exists in mirror but not in live mount", path.display())
            }
            Self::MissingInMirror { path } => {
                write!(f, "{} exists in live mount but not in mirror", path.display())
            }
            Self::KindMismatch { path } => {
                write!(f, "{} has different entry kinds", path.display())
            }
            Self::LengthMismatch { path, live, mirror } => write!(
                f,
                "{} length differs: live {live}, mirror {mirror}",
                path.display()
            ),
            Self::ContentMismatch { path, offset } => {
                write!(f, "{} content differs at offset {offset}", path.display())
            }
            Self::TargetMismatch { path } => {
                write!(f, "{} symlink targets differ", path.display())
            }
        }
    }
}

/// Recursively collect all entries under `root`, keyed by relative path.
pub(crate) fn walk_entries(root: &Path) -> std::io::Result<BTreeMap<PathBuf, EntryKind>> {
    let mut entries = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let abs = entry.path();
            let rel = abs
                .strip_prefix(root)
                .map_err(|_| std::io::Error::other("entry escaped walk root"))?
                .to_path_buf();
            let kind = if file_type.is_dir() {
                pending.push(abs);
                EntryKind::Dir
            } else if file_type.is_file() {
                EntryKind::File
            } else if file_type.is_symlink() {
                EntryKind::Symlink
            } else {
                EntryKind::Other
            };
            entries.insert(rel, kind);
        }
    }
    Ok(entries)
}

enum FileDiff {
    Length { live: u64, mirror: u64 },
    Content { offset: u64 },
}

/// First byte offset at which the two files differ, if any, after a cheap
/// length check.
fn compare_file_contents(live: &Path, mirror: &Path) -> std::io::Result<Option<FileDiff>> {
    let live_len = fs::metadata(live)?.len();
    let mirror_len = fs::metadata(mirror)?.len();
    if live_len != mirror_len {
        return Ok(Some(FileDiff::Length {
            live: live_len,
            mirror: mirror_len,
        }));
    }
    let mut live_reader = BufReader::new(File::open(live)?);
    let mut mirror_reader = BufReader::new(File::open(mirror)?);
    let mut live_buf = vec![0_u8; COMPARE_CHUNK];
    let mut mirror_buf = vec![0_u8; COMPARE_CHUNK];
    let mut offset = 0_u64;
    loop {
        let n = live_reader.read(&mut live_buf)?;
        if n == 0 {
            return Ok(None);
        }
        mirror_reader.read_exact(&mut mirror_buf[..n])?;
        if live_buf[..n] != mirror_buf[..n] {
            let first = live_buf[..n]
                .iter()
                .zip(&mirror_buf[..n])
                .position(|(a, b)| a != b)
                .unwrap_or(0);
            return Ok(Some(FileDiff::Content {
                offset: offset + first as u64,
            }));
        }
        offset += n as u64;
    }
}

/// Recursive, order-independent comparison of two directory trees:
/// structure, names, and byte content.
pub fn compare_trees(live_root: &Path, mirror_root: &Path) -> Result<Vec<Divergence>> {
    let live = walk_entries(live_root)?;
    let mirror = walk_entries(mirror_root)?;
    let mut divergences = Vec::new();

    for (path, mirror_kind) in &mirror {
        match live.get(path) {
            None => divergences.push(Divergence::MissingInLive { path: path.clone() }),
            Some(live_kind) if live_kind != mirror_kind => {
                divergences.push(Divergence::KindMismatch { path: path.clone() });
            }
            Some(EntryKind::File) => {
                let found = compare_file_contents(&live_root.join(path), &mirror_root.join(path))?;
                if let Some(diff) = found {
                    divergences.push(match diff {
                        FileDiff::Length { live, mirror } => Divergence::LengthMismatch {
                            path: path.clone(),
                            live,
                            mirror,
                        },
                        FileDiff::Content { offset } => Divergence::ContentMismatch {
                            path: path.clone(),
                            offset,
                        },
                    });
                }
            }
            Some(EntryKind::Symlink) => {
                let live_target = fs::read_link(live_root.join(path))?;
                let mirror_target = fs::read_link(mirror_root.join(path))?;
                if live_target != mirror_target {
                    divergences.push(Divergence::TargetMismatch { path: path.clone() });
                }
            }
            Some(_) => {}
        }
    }
    for path in live.keys() {
        if !mirror.contains_key(path) {
            divergences.push(Divergence::MissingInMirror { path: path.clone() });
        }
    }
    Ok(divergences)
}

fn fail_on_divergence(divergences: Vec<Divergence>, phase: &str) -> Result<()> {
    if divergences.is_empty() {
        return Ok(());
    }
    tracing::error!(count = divergences.len(), phase, "trees diverged");
    for divergence in &divergences {
        tracing::error!(%divergence, phase);
    }
    let first = &divergences[0];
    Err(HarnessError::divergence(
        first.path(),
        format!("{first} ({phase}, {} total)", divergences.len()),
    ))
}

/// Full verification protocol: sync, live diff, unmount (collecting the
/// checker's exit status in Checked mode), remount, diff again.
///
/// A divergence in the second comparison indicates a persistence bug: the
/// service failed to reconstruct identical state from storage alone.
pub fn verify(session: &mut Session, system: &dyn System) -> Result<()> {
    system.sync_all()?;
    let live_diff = compare_trees(session.mount_dir(), session.mirror_dir())?;
    fail_on_divergence(live_diff, "live")?;

    unmount(session, system)?;
    if session.config().launch == LaunchMode::Checked {
        let report = session.collect_process_report()?;
        if report.status == session.config().service.checker_error_exit {
            return Err(HarnessError::Process {
                status: report.status,
                detail: "memory checker detected errors in the service".to_owned(),
            });
        }
        if report.status != 0 {
            return Err(HarnessError::Process {
                status: report.status,
                detail: "service exited abnormally under the checker".to_owned(),
            });
        }
    }

    remount(session, system)?;
    let remount_diff = compare_trees(session.mount_dir(), session.mirror_dir())?;
    fail_on_divergence(remount_diff, "after remount")?;
    tracing::info!(run_id = session.run_id(), "verification passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::provision;
    use crate::testutil::{test_session, FakeSystem};
    use std::fs;

    fn write(root: &Path, rel: &str, bytes: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn identical_trees_produce_no_divergence() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        for root in [a.path(), b.path()] {
            write(root, "d1/f1.bin", b"hello");
            write(root, "d1/d2/f2.bin", b"");
            fs::create_dir_all(root.join("empty")).unwrap();
        }
        assert!(compare_trees(a.path(), b.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_entries_are_reported_by_side() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write(a.path(), "only-live.bin", b"x");
        write(b.path(), "only-mirror.bin", b"y");

        let diff = compare_trees(a.path(), b.path()).unwrap();
        assert!(diff.contains(&Divergence::MissingInMirror {
            path: PathBuf::from("only-live.bin")
        }));
        assert!(diff.contains(&Divergence::MissingInLive {
            path: PathBuf::from("only-mirror.bin")
        }));
    }

    #[test]
    fn content_mismatch_names_the_first_differing_offset() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let mut live = vec![0_u8; 200_000];
        let mirror = live.clone();
        live[131_072] = 0xFF;
        write(a.path(), "f.bin", &live);
        write(b.path(), "f.bin", &mirror);

        let diff = compare_trees(a.path(), b.path()).unwrap();
        assert_eq!(
            diff,
            vec![Divergence::ContentMismatch {
                path: PathBuf::from("f.bin"),
                offset: 131_072,
            }]
        );
    }

    #[test]
    fn length_mismatch_is_distinct_from_content_mismatch() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write(a.path(), "f.bin", b"short");
        write(b.path(), "f.bin", b"longer content");

        let diff = compare_trees(a.path(), b.path()).unwrap();
        assert_eq!(
            diff,
            vec![Divergence::LengthMismatch {
                path: PathBuf::from("f.bin"),
                live: 5,
                mirror: 14,
            }]
        );
    }

    #[test]
    fn kind_mismatch_when_file_and_directory_share_a_name() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::create_dir_all(a.path().join("x")).unwrap();
        write(b.path(), "x", b"i am a file");

        let diff = compare_trees(a.path(), b.path()).unwrap();
        assert_eq!(
            diff,
            vec![Divergence::KindMismatch {
                path: PathBuf::from("x")
            }]
        );
    }

    #[test]
    fn divergence_serializes_with_a_kind_tag() {
        let divergence = Divergence::ContentMismatch {
            path: PathBuf::from("d1/f.bin"),
            offset: 4096,
        };
        let json = serde_json::to_string(&divergence).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"content_mismatch","path":"d1/f.bin","offset":4096}"#
        );
    }

    #[test]
    fn verify_passes_when_both_roots_match_and_remounts() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), pfs_types::LaunchMode::Direct);
        let system = FakeSystem::default();
        provision(&mut session, &system).unwrap();

        write(session.mount_dir(), "f.bin", b"same");
        write(session.mirror_dir(), "f.bin", b"same");

        verify(&mut session, &system).unwrap();
        // unmount ran once and the mount was relaunched for durability.
        assert_eq!(system.ran_program("umount").len(), 1);
        assert_eq!(system.spawns.borrow().len(), 2);
    }

    #[test]
    fn verify_fails_fast_on_live_divergence() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), pfs_types::LaunchMode::Direct);
        let system = FakeSystem::default();
        provision(&mut session, &system).unwrap();

        write(session.mount_dir(), "f.bin", b"live");
        write(session.mirror_dir(), "f.bin", b"mirr");

        let err = verify(&mut session, &system).unwrap_err();
        assert!(matches!(err, HarnessError::Divergence { .. }));
        // Failed before the unmount/remount cycle.
        assert!(system.ran_program("umount").is_empty());
    }

    #[test]
    fn checked_mode_surfaces_checker_exit_status() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), pfs_types::LaunchMode::Checked);
        let system = FakeSystem {
            child_status: 42,
            ..FakeSystem::default()
        };
        provision(&mut session, &system).unwrap();

        let err = verify(&mut session, &system).unwrap_err();
        match err {
            HarnessError::Process { status, detail } => {
                assert_eq!(status, 42);
                assert!(detail.contains("memory checker"), "unexpected detail: {detail}");
            }
            other => panic!("expected Process, got {other}"),
        }
    }

    #[test]
    fn checked_mode_distinguishes_crashes_from_checker_findings() {
        let base = tempfile::tempdir().unwrap();
        let mut session = test_session(base.path(), pfs_types::LaunchMode::Checked);
        let system = FakeSystem {
            child_status: 1,
            ..FakeSystem::default()
        };
        provision(&mut session, &system).unwrap();

        let err = verify(&mut session, &system).unwrap_err();
        match err {
            HarnessError::Process { status, detail } => {
                assert_eq!(status, 1);
                assert!(!detail.contains("memory checker"), "unexpected detail: {detail}");
            }
            other => panic!("expected Process, got {other}"),
        }
    }

    #[test]
    fn symlinks_with_different_targets_diverge() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("target-one", a.path().join("link")).unwrap();
        std::os::unix::fs::symlink("target-two", b.path().join("link")).unwrap();

        let diff = compare_trees(a.path(), b.path()).unwrap();
        assert_eq!(
            diff,
            vec![Divergence::TargetMismatch {
                path: PathBuf::from("link")
            }]
        );
    }

    #[test]
    fn symlinks_with_matching_targets_pass() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        for root in [a.path(), b.path()] {
            write(root, "f.bin", b"payload");
            std::os::unix::fs::symlink("f.bin", root.join("link")).unwrap();
        }
        assert!(compare_trees(a.path(), b.path()).unwrap().is_empty());
    }
}
