//! One directory per user holding `vectors.bin`, `chunks.bin` and `ledger.json`.

use memmap2::Mmap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{IndexStore, UserIndexState};
use crate::chunker::Chunk;
use crate::documents::user_dir_name;
use crate::error::{RagError, Result};
use crate::index::{FlatL2Index, HEADER_LEN};
use crate::ledger::Ledger;

const VECTORS_FILE: &str = "vectors.bin";
const CHUNKS_FILE: &str = "chunks.bin";
const LEDGER_FILE: &str = "ledger.json";

pub struct FsIndexStore {
    root: PathBuf,
}

impl FsIndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn user_dir(&self, user_id: &str) -> PathBuf {
        self.root.join(user_dir_name(user_id))
    }

    fn read_index(path: &Path) -> Result<FlatL2Index> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN as u64 {
            return Err(RagError::CorruptArtifact(format!(
                "'{}' is only {len} bytes",
                path.display()
            )));
        }
        // The map is dropped before this function returns; the file is only
        // ever replaced by rename, never truncated in place.
        let mmap = unsafe { Mmap::map(&file)? };
        FlatL2Index::from_bytes(&mmap)
    }

    fn read_chunks(path: &Path) -> Result<Vec<Chunk>> {
        let bytes = fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// `(ledger, found)`. A missing or unreadable ledger yields an empty one.
    fn read_ledger(path: &Path, user_id: &str) -> (Ledger, bool) {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return (Ledger::default(), false),
            Err(e) => {
                warn!(user = user_id, error = %e, "failed to read ledger, starting empty");
                return (Ledger::default(), false);
            }
        };
        match Ledger::from_json(&json) {
            Ok(ledger) => (ledger, true),
            Err(e) => {
                warn!(user = user_id, error = %e, "corrupt ledger, starting empty");
                (Ledger::default(), false)
            }
        }
    }

    /// Index and chunks, or `None` if either is missing or unreadable.
    fn read_vectors(dir: &Path, user_id: &str) -> Option<(FlatL2Index, Vec<Chunk>)> {
        let vectors_path = dir.join(VECTORS_FILE);
        let chunks_path = dir.join(CHUNKS_FILE);
        if !vectors_path.exists() || !chunks_path.exists() {
            if vectors_path.exists() || chunks_path.exists() {
                warn!(user = user_id, "only one of the vector artifacts exists, ignoring it");
            }
            return None;
        }

        let index = match Self::read_index(&vectors_path) {
            Ok(index) => index,
            Err(e) => {
                warn!(user = user_id, error = %e, "failed to load index, it will be rebuilt");
                return None;
            }
        };
        let chunks = match Self::read_chunks(&chunks_path) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(user = user_id, error = %e, "failed to load chunks, index will be rebuilt");
                return None;
            }
        };
        Some((index, chunks))
    }
}

/// Write through a temporary sibling and rename over the target.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl IndexStore for FsIndexStore {
    fn load(&self, user_id: &str) -> Result<Option<UserIndexState>> {
        let dir = self.user_dir(user_id);
        if !dir.is_dir() {
            debug!(user = user_id, "no persisted index");
            return Ok(None);
        }

        let (ledger, ledger_found) = Self::read_ledger(&dir.join(LEDGER_FILE), user_id);
        let vectors = Self::read_vectors(&dir, user_id);
        if vectors.is_none() && !ledger_found {
            return Ok(None);
        }

        let state = match vectors {
            Some((index, chunks)) => {
                match UserIndexState::new(Some(index), chunks, ledger.clone()) {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(user = user_id, error = %e, "vector artifacts out of sync, index will be rebuilt");
                        UserIndexState::with_ledger(ledger)
                    }
                }
            }
            None => UserIndexState::with_ledger(ledger),
        };
        info!(user = user_id, chunks = state.len(), "loaded persisted index");
        Ok(Some(state))
    }

    fn save(&self, user_id: &str, state: &UserIndexState) -> Result<()> {
        let dir = self.user_dir(user_id);
        fs::create_dir_all(&dir)
            .map_err(|e| RagError::Persistence(format!("cannot create '{}': {e}", dir.display())))?;

        if let Some(index) = state.index().filter(|_| state.has_vectors()) {
            write_atomic(&dir.join(VECTORS_FILE), &index.to_bytes())?;
            write_atomic(&dir.join(CHUNKS_FILE), &bincode::serialize(state.chunks())?)?;
        }
        write_atomic(&dir.join(LEDGER_FILE), state.ledger().to_json()?.as_bytes())?;

        debug!(user = user_id, chunks = state.len(), "saved index");
        Ok(())
    }

    fn purge_vectors(&self, user_id: &str) -> Result<()> {
        let dir = self.user_dir(user_id);
        remove_if_exists(&dir.join(VECTORS_FILE))?;
        remove_if_exists(&dir.join(CHUNKS_FILE))?;
        Ok(())
    }
}
