//! Per-user index state and the stores that persist it.

mod fs;
mod memory;

pub use fs::FsIndexStore;
pub use memory::MemoryIndexStore;

use std::collections::HashSet;

use crate::chunker::Chunk;
use crate::config::Number;
use crate::error::{RagError, Result};
use crate::index::FlatL2Index;
use crate::ledger::Ledger;

/// Persists [`UserIndexState`] per user.
///
/// The index and chunk artifacts always describe the same rows. The ledger
/// is stored separately and may exist without them.
pub trait IndexStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted for the user.
    fn load(&self, user_id: &str) -> Result<Option<UserIndexState>>;

    /// Writes the ledger, plus the index and chunks when there are any rows.
    /// Every write replaces the previous artifact.
    fn save(&self, user_id: &str, state: &UserIndexState) -> Result<()>;

    /// Removes the index and chunk artifacts, keeping the ledger.
    fn purge_vectors(&self, user_id: &str) -> Result<()>;
}

/// Everything the registry holds for one user. `index.len() == chunks.len()`
/// holds for every value of this type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserIndexState {
    index: Option<FlatL2Index>,
    chunks: Vec<Chunk>,
    ledger: Ledger,
}

impl UserIndexState {
    pub fn new(index: Option<FlatL2Index>, chunks: Vec<Chunk>, ledger: Ledger) -> Result<Self> {
        let rows = index.as_ref().map(FlatL2Index::len).unwrap_or(0);
        if rows != chunks.len() {
            return Err(RagError::CorruptArtifact(format!(
                "index has {rows} rows but there are {} chunks",
                chunks.len()
            )));
        }
        Ok(Self {
            index,
            chunks,
            ledger,
        })
    }

    pub fn with_ledger(ledger: Ledger) -> Self {
        Self {
            index: None,
            chunks: Vec::new(),
            ledger,
        }
    }

    pub fn index(&self) -> Option<&FlatL2Index> {
        self.index.as_ref()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// True when there is at least one searchable row.
    pub fn has_vectors(&self) -> bool {
        self.index.as_ref().is_some_and(|i| !i.is_empty())
    }

    /// Append embedded chunks, creating the index from the first vector's
    /// dimension if there is none yet. Nothing changes on error.
    pub fn append(&mut self, vectors: Vec<Vec<Number>>, chunks: Vec<Chunk>) -> Result<()> {
        if vectors.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "got {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        match self.index.as_mut() {
            Some(index) => index.add(&vectors)?,
            None => {
                let mut index = FlatL2Index::new(first.len())?;
                index.add(&vectors)?;
                self.index = Some(index);
            }
        }
        self.chunks.extend(chunks);
        Ok(())
    }

    /// A new state without the rows sourced from `filename`, indexed from
    /// scratch. The ledger is copied unchanged.
    pub fn without_source(&self, filename: &str) -> Result<Self> {
        let Some(index) = self.index.as_ref() else {
            return Ok(Self::with_ledger(self.ledger.clone()));
        };

        let (rows, chunks): (Vec<&[Number]>, Vec<Chunk>) = index
            .rows()
            .zip(&self.chunks)
            .filter(|(_, chunk)| chunk.source != filename)
            .map(|(row, chunk)| (row, chunk.clone()))
            .unzip();

        let index = if rows.is_empty() {
            None
        } else {
            Some(FlatL2Index::from_rows(index.dimension(), &rows)?)
        };
        Self::new(index, chunks, self.ledger.clone())
    }

    pub fn clear_vectors(&mut self) {
        self.index = None;
        self.chunks.clear();
    }

    /// Bring the ledger in line with the rows actually present: without rows
    /// the ledger is cleared so every document gets embedded again; with rows,
    /// any chunk source missing from the ledger is recorded. Returns whether
    /// anything changed.
    pub fn reconcile(&mut self) -> bool {
        if !self.has_vectors() {
            self.clear_vectors();
            if self.ledger.is_empty() {
                return false;
            }
            self.ledger.clear();
            return true;
        }

        let mut seen = HashSet::new();
        let mut changed = false;
        for chunk in &self.chunks {
            if seen.insert(chunk.source.as_str()) && self.ledger.insert(&chunk.source) {
                changed = true;
            }
        }
        changed
    }
}
