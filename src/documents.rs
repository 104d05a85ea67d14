//! Where already-extracted document text comes from.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{RagError, Result};

const HASHED_PREFIX: &str = "u-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub filename: String,
    pub text: String,
}

/// Supplies a user's extracted documents. The upload/OCR pipeline owns it.
pub trait DocumentSource: Send + Sync {
    fn list_documents(&self, user_id: &str) -> Result<Vec<SourceDocument>>;

    /// Delete the stored source document behind `filename`. Missing files are
    /// not an error.
    fn remove_document(&self, user_id: &str, filename: &str) -> Result<()>;
}

/// Maps a user id to a single safe directory name. Ids made of
/// `[A-Za-z0-9._@-]` that start with neither a dot nor the reserved `u-`
/// prefix are kept as they are; anything else is replaced by a hash-derived
/// `u-` name.
pub fn user_dir_name(user_id: &str) -> String {
    let safe = !user_id.is_empty()
        && !user_id.starts_with('.')
        && !user_id.starts_with(HASHED_PREFIX)
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-'));
    if safe {
        return user_id.to_string();
    }
    let digest = Sha256::digest(user_id.as_bytes());
    let hex: String = digest.iter().take(12).map(|b| format!("{b:02x}")).collect();
    format!("{HASHED_PREFIX}{hex}")
}

/// UTF-8 when valid, otherwise latin-1 so accented text keeps its letters.
fn decode_text(bytes: Vec<u8>, user_id: &str, filename: &str) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            debug!(user = user_id, file = filename, "not valid UTF-8, decoding as latin-1");
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    }
}

/// Reads `*.txt` files from `<root>/<user-dir>/`, sorted by filename.
pub struct DirectoryDocumentSource {
    root: PathBuf,
}

impl DirectoryDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn user_dir(&self, user_id: &str) -> PathBuf {
        self.root.join(user_dir_name(user_id))
    }

    fn is_text_file(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("txt"))
            .unwrap_or(false)
    }
}

impl DocumentSource for DirectoryDocumentSource {
    fn list_documents(&self, user_id: &str) -> Result<Vec<SourceDocument>> {
        let dir = self.user_dir(user_id);
        if !dir.is_dir() {
            debug!(user = user_id, dir = %dir.display(), "no upload directory");
            return Ok(Vec::new());
        }

        let mut documents = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .flatten()
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !Self::is_text_file(path) {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match fs::read(path) {
                Ok(bytes) => documents.push(SourceDocument {
                    filename: filename.to_string(),
                    text: decode_text(bytes, user_id, filename),
                }),
                Err(e) => {
                    warn!(user = user_id, file = filename, error = %e, "failed to read document");
                }
            }
        }
        Ok(documents)
    }

    fn remove_document(&self, user_id: &str, filename: &str) -> Result<()> {
        if filename.contains(|c: char| c == '/' || c == '\\')
            || filename == ".."
            || filename == "."
        {
            return Err(RagError::Persistence(format!(
                "refusing to remove '{filename}': not a plain filename"
            )));
        }
        let path = self.user_dir(user_id).join(filename);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Documents held in memory, keyed by user.
#[derive(Default)]
pub struct InMemoryDocumentSource {
    documents: Mutex<HashMap<String, Vec<SourceDocument>>>,
}

impl InMemoryDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document, replacing any existing one with the same filename.
    pub fn put(&self, user_id: &str, filename: &str, text: &str) {
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let docs = documents.entry(user_id.to_string()).or_default();
        docs.retain(|d| d.filename != filename);
        docs.push(SourceDocument {
            filename: filename.to_string(),
            text: text.to_string(),
        });
    }
}

impl DocumentSource for InMemoryDocumentSource {
    fn list_documents(&self, user_id: &str) -> Result<Vec<SourceDocument>> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(user_id).cloned().unwrap_or_default())
    }

    fn remove_document(&self, user_id: &str, filename: &str) -> Result<()> {
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(docs) = documents.get_mut(user_id) {
            docs.retain(|d| d.filename != filename);
        }
        Ok(())
    }
}
