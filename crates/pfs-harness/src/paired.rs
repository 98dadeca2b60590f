//! Paired I/O: the same logical file open on both roots, driven through an
//! identical operation sequence, with immediate byte-compare on reads.

use pfs_error::{HarnessError, Result};
use pfs_types::{FileOp, Root, TestPath};
use rand::Rng;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use crate::session::Session;
use crate::workload::WorkloadGen;

/// How far past the current end-of-file a random write may extend the file.
pub const GROWTH_SLACK: u64 = 128 * 1024;

/// The same relative path open read/write under both roots.
pub struct PairedFile {
    path: TestPath,
    live: File,
    mirror: File,
}

fn open_pair(session: &Session, path: &TestPath, create: bool) -> Result<PairedFile> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(create);
    let live = options.open(session.resolve(Root::Live, path))?;
    let mirror = options.open(session.resolve(Root::Mirror, path))?;
    Ok(PairedFile {
        path: path.clone(),
        live,
        mirror,
    })
}

/// Create the file on both roots (or open it if it already exists).
pub fn create_paired(session: &Session, path: &TestPath) -> Result<PairedFile> {
    open_pair(session, path, true)
}

/// Open an existing file on both roots.
pub fn open_paired(session: &Session, path: &TestPath) -> Result<PairedFile> {
    open_pair(session, path, false)
}

impl PairedFile {
    #[must_use]
    pub fn path(&self) -> &TestPath {
        &self.path
    }

    /// Current size of the mirror side, the ground truth for legal offsets.
    pub fn mirror_len(&self) -> Result<u64> {
        Ok(self.mirror.metadata()?.len())
    }

    /// Apply one operation to both descriptors.
    ///
    /// Reads compare the two byte sequences immediately and fail with a
    /// divergence naming the path, offset, and first differing byte. Writes
    /// generate their payload once and send identical bytes to both sides.
    pub fn apply(&mut self, gen: &mut WorkloadGen, op: FileOp) -> Result<()> {
        tracing::trace!(path = %self.path, ?op, "paired op");
        match op {
            FileOp::Read { offset, len } => {
                if len == 0 {
                    return Ok(());
                }
                let live_bytes = read_at(&mut self.live, offset, len)?;
                let mirror_bytes = read_at(&mut self.mirror, offset, len)?;
                if live_bytes != mirror_bytes {
                    let detail = match first_difference(&live_bytes, &mirror_bytes) {
                        Some(index) => format!(
                            "read of {len} bytes at offset {offset} differs at offset {}",
                            offset + index as u64
                        ),
                        None => format!(
                            "read of {len} bytes at offset {offset} returned {} live / {} mirror bytes",
                            live_bytes.len(),
                            mirror_bytes.len()
                        ),
                    };
                    return Err(HarnessError::divergence(self.path.rel(), detail));
                }
            }
            FileOp::Write { offset, len } => {
                let payload = gen.payload(len);
                write_at(&mut self.live, offset, &payload)?;
                write_at(&mut self.mirror, offset, &payload)?;
            }
            FileOp::Flush => {
                self.live.sync_all()?;
                self.mirror.sync_all()?;
            }
            FileOp::Truncate { len } => {
                self.live.set_len(len)?;
                self.mirror.set_len(len)?;
            }
        }
        Ok(())
    }

    /// Self-select and apply a random read or write, bounded by the mirror
    /// descriptor's current size; writes may grow the file by up to
    /// [`GROWTH_SLACK`].
    pub fn random_op(&mut self, gen: &mut WorkloadGen) -> Result<FileOp> {
        let len = self.mirror_len()?;
        let op = if gen.rng().gen_bool(0.5) {
            if len == 0 {
                FileOp::Read { offset: 0, len: 0 }
            } else {
                let offset = gen.rng().gen_range(0..len);
                let max = usize::try_from(len - offset).unwrap_or(usize::MAX);
                FileOp::Read {
                    offset,
                    len: gen.rng().gen_range(0..=max),
                }
            }
        } else {
            let offset = gen.rng().gen_range(0..=len);
            // Write end stays at or below len - 1 + GROWTH_SLACK.
            let cap = (len + GROWTH_SLACK - offset).saturating_sub(1);
            let max = usize::try_from(cap).unwrap_or(usize::MAX);
            FileOp::Write {
                offset,
                len: gen.rng().gen_range(0..=max),
            }
        };
        self.apply(gen, op)?;
        Ok(op)
    }

    /// Release both descriptors.
    pub fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }
}

fn read_at(file: &mut File, offset: u64, len: usize) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut bytes = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn write_at(file: &mut File, offset: u64, payload: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(payload)?;
    Ok(())
}

fn first_difference(a: &[u8], b: &[u8]) -> Option<usize> {
    a.iter().zip(b.iter()).position(|(x, y)| x != y)
}
