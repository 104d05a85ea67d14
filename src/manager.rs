//! RAG registry: orchestrates chunking, embedding, indexing and persistence
//! for every user.
//!
//! Each user's state lives behind its own slot. Mutations (`update`,
//! `delete_file`, `rebuild_index`) hold the slot's writer lock for their whole
//! run, build the next state on a private copy and publish it with a single
//! pointer swap. Readers clone the current `Arc` and search it without
//! holding any lock, so they see either the old or the new state in full.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

use crate::chunker::{chunk_document, Chunk, ChunkParams};
use crate::config::{Number, RagConfig};
use crate::documents::{DirectoryDocumentSource, DocumentSource, SourceDocument};
use crate::embedding::LazyEmbedder;
use crate::error::{RagError, Result};
use crate::store::{FsIndexStore, IndexStore, UserIndexState};
use crate::vector_ops::sanitize_vector;

const CONTEXT_HEADER: &str = "Here is some relevant information from your documents:\n\n";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub distance: Number,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSummary {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub documents: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub dimension: Option<usize>,
}

#[derive(Default)]
struct UserSlot {
    writer: Mutex<()>,
    /// `None` until the user's state is first loaded.
    state: RwLock<Option<Arc<UserIndexState>>>,
}

pub struct RagRegistry {
    store: Arc<dyn IndexStore>,
    documents: Arc<dyn DocumentSource>,
    embedder: LazyEmbedder,
    params: ChunkParams,
    min_query_chars: usize,
    users: Mutex<HashMap<String, Arc<UserSlot>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Format retrieved chunks as labelled prompt context.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return String::new();
    }
    let mut context = String::from(CONTEXT_HEADER);
    for hit in chunks {
        context.push_str(&format!(
            "Document: {}\nContent: {}\n\n",
            hit.chunk.source, hit.chunk.text
        ));
    }
    context
}

impl RagRegistry {
    pub fn new(
        store: Arc<dyn IndexStore>,
        documents: Arc<dyn DocumentSource>,
        embedder: LazyEmbedder,
        params: ChunkParams,
    ) -> Self {
        Self {
            store,
            documents,
            embedder,
            params,
            min_query_chars: crate::config::DEFAULT_MIN_QUERY_CHARS,
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Filesystem-backed registry rooted at `config.data_dir`.
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let params = config.chunk_params()?;
        Ok(Self::new(
            Arc::new(FsIndexStore::new(config.index_dir())),
            Arc::new(DirectoryDocumentSource::new(config.uploads_dir())),
            LazyEmbedder::from_config(config),
            params,
        )
        .with_min_query_chars(config.min_query_chars))
    }

    pub fn with_min_query_chars(mut self, min_query_chars: usize) -> Self {
        self.min_query_chars = min_query_chars;
        self
    }

    fn slot(&self, user_id: &str) -> Arc<UserSlot> {
        let mut users = lock(&self.users);
        Arc::clone(users.entry(user_id.to_string()).or_default())
    }

    /// Current state, loading it from the store on first access.
    fn snapshot(&self, user_id: &str, slot: &UserSlot) -> Arc<UserIndexState> {
        {
            let state = slot.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(state) = state.as_ref() {
                return Arc::clone(state);
            }
        }

        let mut state = slot.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = state.as_ref() {
            return Arc::clone(state);
        }
        let loaded = Arc::new(self.load_state(user_id));
        *state = Some(Arc::clone(&loaded));
        loaded
    }

    fn load_state(&self, user_id: &str) -> UserIndexState {
        let mut state = match self.store.load(user_id) {
            Ok(Some(state)) => state,
            Ok(None) => UserIndexState::default(),
            Err(e) => {
                warn!(user = user_id, error = %e, "failed to load index, starting empty");
                UserIndexState::default()
            }
        };
        if state.reconcile() {
            info!(
                user = user_id,
                documents = state.ledger().len(),
                "ledger reconciled with stored chunks"
            );
        }
        state
    }

    fn publish(slot: &UserSlot, state: UserIndexState) {
        let mut current = slot.state.write().unwrap_or_else(PoisonError::into_inner);
        *current = Some(Arc::new(state));
    }

    /// Save failures are logged; the in-memory state stays authoritative for
    /// the rest of the process.
    fn persist(&self, user_id: &str, state: &UserIndexState) {
        if let Err(e) = self.store.save(user_id, state) {
            error!(user = user_id, error = %e, "failed to persist index");
        }
    }

    /// Chunk and embed every available document not yet in the ledger.
    ///
    /// Returns whether the user ends up with a usable index. Only a failure to
    /// initialize the embedding provider or a dimension change is an error.
    pub fn update_with_new_files(&self, user_id: &str) -> Result<bool> {
        let slot = self.slot(user_id);
        let _writer = lock(&slot.writer);
        self.update_locked(user_id, &slot)
    }

    fn update_locked(&self, user_id: &str, slot: &UserSlot) -> Result<bool> {
        let current = self.snapshot(user_id, slot);

        let documents = match self.documents.list_documents(user_id) {
            Ok(documents) => documents,
            Err(e) => {
                warn!(user = user_id, error = %e, "failed to list documents");
                Vec::new()
            }
        };

        let mut seen = HashSet::new();
        let mut new_docs: Vec<&SourceDocument> = Vec::new();
        for doc in &documents {
            if !current.ledger().contains(&doc.filename) && seen.insert(doc.filename.as_str()) {
                new_docs.push(doc);
            }
        }

        if new_docs.is_empty() {
            debug!(
                user = user_id,
                available = documents.len(),
                "no new documents to process"
            );
            return Ok(current.has_vectors());
        }

        info!(user = user_id, count = new_docs.len(), "processing new documents");
        let mut new_chunks = Vec::new();
        for doc in &new_docs {
            let chunks = chunk_document(&doc.text, &doc.filename, &self.params);
            debug!(user = user_id, file = %doc.filename, chunks = chunks.len(), "chunked document");
            new_chunks.extend(chunks);
        }

        let mut next = UserIndexState::clone(&current);

        if new_chunks.is_empty() {
            info!(user = user_id, "new documents produced no usable chunks");
            for doc in &new_docs {
                next.ledger_mut().insert(&doc.filename);
            }
            next.ledger_mut().touch();
            self.persist(user_id, &next);
            let usable = next.has_vectors();
            Self::publish(slot, next);
            return Ok(usable);
        }

        let embedder = self.embedder.get()?;
        let texts: Vec<String> = new_chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors = match embedder.embed(&texts) {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(user = user_id, error = %e, "embedding failed, index left unchanged");
                return Ok(false);
            }
        };
        if vectors.len() != texts.len() || vectors.iter().any(|v| v.is_empty()) {
            warn!(
                user = user_id,
                expected = texts.len(),
                got = vectors.len(),
                "embedding provider returned malformed output, index left unchanged"
            );
            return Ok(false);
        }

        let replaced: usize = vectors.iter_mut().map(|v| sanitize_vector(v)).sum();
        if replaced > 0 {
            warn!(user = user_id, replaced, "replaced non-finite embedding values with zeros");
        }

        if let Err(e) = next.append(vectors, new_chunks) {
            error!(user = user_id, error = %e, "could not add embeddings to index");
            return Err(e);
        }
        for doc in &new_docs {
            next.ledger_mut().insert(&doc.filename);
        }
        next.ledger_mut().touch();

        self.persist(user_id, &next);
        info!(user = user_id, total_chunks = next.len(), "index updated");
        Self::publish(slot, next);
        Ok(true)
    }

    /// The `top_k` chunks nearest to `query`, nearest first, without repeated
    /// texts. Builds the index on demand; an empty result is a normal outcome.
    pub fn retrieve(&self, user_id: &str, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        let slot = self.slot(user_id);
        let mut state = self.snapshot(user_id, &slot);

        if !state.has_vectors() {
            {
                let _writer = lock(&slot.writer);
                state = self.snapshot(user_id, &slot);
                if !state.has_vectors() {
                    match self.update_locked(user_id, &slot) {
                        Ok(_) => {}
                        Err(e @ RagError::EmbedderInit(_)) => return Err(e),
                        Err(e) => warn!(user = user_id, error = %e, "could not build index"),
                    }
                    state = self.snapshot(user_id, &slot);
                }
            }
            if !state.has_vectors() {
                debug!(user = user_id, "no indexed content");
                return Ok(Vec::new());
            }
        }

        let Some(index) = state.index() else {
            return Ok(Vec::new());
        };

        let embedder = self.embedder.get()?;
        let mut query_vector = match embedder.embed_one(query) {
            Ok(vector) => vector,
            Err(e) => {
                warn!(user = user_id, error = %e, "query embedding failed");
                return Ok(Vec::new());
            }
        };
        if sanitize_vector(&mut query_vector) > 0 {
            warn!(user = user_id, "replaced non-finite query embedding values with zeros");
        }

        let neighbors = match index.search(&query_vector, top_k.min(index.len())) {
            Ok(neighbors) => neighbors,
            Err(e) => {
                warn!(user = user_id, error = %e, "search failed");
                return Ok(Vec::new());
            }
        };

        let mut seen = HashSet::new();
        let mut results = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let Some(chunk) = state.chunks().get(neighbor.row) else {
                continue;
            };
            if seen.insert(chunk.text.as_str()) {
                results.push(RetrievedChunk {
                    chunk: chunk.clone(),
                    distance: neighbor.distance,
                });
            }
        }
        Ok(results)
    }

    /// Retrieved chunks formatted for prompt injection, or an empty string
    /// when the query is too short or nothing relevant is indexed.
    pub fn context_for_prompt(&self, user_id: &str, query: &str, max_chunks: usize) -> Result<String> {
        if query.trim().chars().count() < self.min_query_chars {
            return Ok(String::new());
        }
        let chunks = self.retrieve(user_id, query, max_chunks)?;
        Ok(format_context(&chunks))
    }

    /// Remove a processed document and every chunk sourced from it, then pick
    /// up any documents not processed yet. Returns whether `filename` was in
    /// the ledger. The removal is kept even when the embedding provider then
    /// fails to initialize; that failure is still returned.
    pub fn delete_file(&self, user_id: &str, filename: &str) -> Result<bool> {
        let slot = self.slot(user_id);
        let _writer = lock(&slot.writer);
        let current = self.snapshot(user_id, &slot);

        if !current.ledger().contains(filename) {
            debug!(user = user_id, file = filename, "delete requested for unknown document");
            return Ok(false);
        }

        if let Err(e) = self.documents.remove_document(user_id, filename) {
            warn!(user = user_id, file = filename, error = %e, "failed to remove source document");
        }

        let mut next = match current.without_source(filename) {
            Ok(state) => state,
            Err(e) => {
                warn!(user = user_id, error = %e, "could not reuse remaining rows, re-embedding all documents");
                UserIndexState::default()
            }
        };
        next.ledger_mut().remove(filename);
        next.ledger_mut().touch();

        if let Err(e) = self.store.purge_vectors(user_id) {
            warn!(user = user_id, error = %e, "failed to remove stored vectors");
        }
        self.persist(user_id, &next);
        info!(user = user_id, file = filename, remaining_chunks = next.len(), "document deleted");
        Self::publish(&slot, next);

        match self.update_locked(user_id, &slot) {
            Ok(_) => {}
            Err(e @ RagError::EmbedderInit(_)) => return Err(e),
            Err(e) => warn!(user = user_id, error = %e, "update after delete failed"),
        }
        Ok(true)
    }

    /// Forget everything indexed for the user and embed every available
    /// document again.
    pub fn rebuild_index(&self, user_id: &str) -> Result<bool> {
        let slot = self.slot(user_id);
        let _writer = lock(&slot.writer);

        let mut next = UserIndexState::default();
        next.ledger_mut().touch();

        if let Err(e) = self.store.purge_vectors(user_id) {
            warn!(user = user_id, error = %e, "failed to remove stored vectors");
        }
        self.persist(user_id, &next);
        Self::publish(&slot, next);
        info!(user = user_id, "index cleared, rebuilding");

        self.update_locked(user_id, &slot)
    }

    pub fn summary(&self, user_id: &str) -> IndexSummary {
        let slot = self.slot(user_id);
        let state = self.snapshot(user_id, &slot);
        IndexSummary {
            total_documents: state.ledger().len(),
            total_chunks: state.len(),
            documents: state.ledger().files().to_vec(),
            last_updated: state.ledger().last_updated(),
            dimension: state.index().map(|i| i.dimension()),
        }
    }
}
