//! Random workload generation over the mirror tree.
//!
//! The mirror is the ground truth for what exists: every generated operation
//! is legal against the mirror's current state, and path-returning methods
//! yield logical [`TestPath`] values so callers stay agnostic of which root
//! they will ultimately target.
//!
//! All randomness flows from one seeded [`StdRng`], so a failing workload
//! replays exactly from the seed logged at session start.

use pfs_error::{HarnessError, Result};
use pfs_types::{Root, TestPath};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use crate::session::Session;
use crate::verify::{walk_entries, EntryKind};

const MAX_NAME_LEN: usize = 64;
const FIXTURE_CHUNK: usize = 1024 * 1024;

/// Seeded generator for random paths, names, and fixture files.
pub struct WorkloadGen {
    rng: StdRng,
    fixture_counter: u32,
}

impl WorkloadGen {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            fixture_counter: 0,
        }
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// `len` random bytes.
    pub fn payload(&mut self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0_u8; len];
        self.rng.fill_bytes(&mut bytes);
        bytes
    }

    /// A uniformly chosen existing directory under the mirror root.
    /// Fails when the mirror holds no directories.
    pub fn random_dir(&mut self, session: &Session) -> Result<TestPath> {
        let dirs = self.collect(session, EntryKind::Dir)?;
        if dirs.is_empty() {
            return Err(HarnessError::Environment(
                "mirror has no directories to choose from".to_owned(),
            ));
        }
        let index = self.rng.gen_range(0..dirs.len());
        to_test_path(&dirs[index])
    }

    /// A uniformly chosen existing file under the mirror root.
    pub fn random_file(&mut self, session: &Session) -> Result<TestPath> {
        let files = self.collect(session, EntryKind::File)?;
        if files.is_empty() {
            return Err(HarnessError::Environment(
                "mirror has no files to choose from".to_owned(),
            ));
        }
        let index = self.rng.gen_range(0..files.len());
        to_test_path(&files[index])
    }

    /// A fresh random name composed with a random existing directory (the
    /// root itself is a candidate parent), retried until the composed path
    /// does not exist in the mirror.
    pub fn random_new_name(&mut self, session: &Session) -> Result<TestPath> {
        let mut parents = self.collect(session, EntryKind::Dir)?;
        parents.push(PathBuf::new());
        loop {
            let parent = to_test_path(&parents[self.rng.gen_range(0..parents.len())])?;
            let len = self.rng.gen_range(1..=MAX_NAME_LEN);
            let name: String = (0..len)
                .map(|_| char::from(self.rng.sample(Alphanumeric)))
                .collect();
            let candidate = parent.join(&name).map_err(|err| {
                HarnessError::Environment(format!("generated an invalid name: {err}"))
            })?;
            if !session.resolve(Root::Mirror, &candidate).exists() {
                return Ok(candidate);
            }
        }
    }

    /// Create a session-owned fixture file filled with random bytes, of size
    /// exactly `max_size` or uniformly drawn from `[0, max_size]`, and
    /// register it for teardown.
    pub fn random_fixture_file(
        &mut self,
        session: &mut Session,
        max_size: usize,
        exact: bool,
    ) -> Result<PathBuf> {
        let size = if exact {
            max_size
        } else {
            self.rng.gen_range(0..=max_size)
        };
        let suffix: String = (0..8)
            .map(|_| char::from(self.rng.sample(Alphanumeric)))
            .collect();
        let name = format!("fixture-{:04}-{suffix}.bin", self.fixture_counter);
        self.fixture_counter += 1;

        let path = session.fixture_dir().join(name);
        let mut file = File::create(&path)?;
        let mut remaining = size;
        let mut chunk = vec![0_u8; FIXTURE_CHUNK.min(size.max(1))];
        while remaining > 0 {
            let n = remaining.min(chunk.len());
            self.rng.fill_bytes(&mut chunk[..n]);
            file.write_all(&chunk[..n])?;
            remaining -= n;
        }
        file.sync_all()?;
        tracing::debug!(path = %path.display(), size, "fixture file created");
        session.register_fixture(path.clone());
        Ok(path)
    }

    fn collect(&self, session: &Session, kind: EntryKind) -> Result<Vec<PathBuf>> {
        let entries = walk_entries(session.mirror_dir()).map_err(|err| {
            HarnessError::Environment(format!(
                "cannot walk mirror {}: {err}",
                session.mirror_dir().display()
            ))
        })?;
        Ok(entries
            .into_iter()
            .filter(|(_, entry_kind)| *entry_kind == kind)
            .map(|(path, _)| path)
            .collect())
    }
}

fn to_test_path(rel: &std::path::Path) -> Result<TestPath> {
    TestPath::new(rel.to_path_buf())
        .map_err(|err| HarnessError::Environment(format!("mirror produced an odd path: {err}")))
}
