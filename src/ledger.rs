//! Record of which source documents have been chunked and embedded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Serialized as `{"processed_files": [...], "last_updated": "..." | null}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default)]
    processed_files: Vec<String>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

impl Ledger {
    pub fn contains(&self, filename: &str) -> bool {
        self.processed_files.iter().any(|f| f == filename)
    }

    /// Returns false when the filename was already recorded.
    pub fn insert(&mut self, filename: &str) -> bool {
        if self.contains(filename) {
            return false;
        }
        self.processed_files.push(filename.to_string());
        true
    }

    /// Returns false when the filename was not recorded.
    pub fn remove(&mut self, filename: &str) -> bool {
        let before = self.processed_files.len();
        self.processed_files.retain(|f| f != filename);
        self.processed_files.len() != before
    }

    pub fn files(&self) -> &[String] {
        &self.processed_files
    }

    pub fn len(&self) -> usize {
        self.processed_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed_files.is_empty()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
    }

    pub fn clear(&mut self) {
        self.processed_files.clear();
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut ledger: Ledger = serde_json::from_str(json)?;
        ledger.dedup();
        Ok(ledger)
    }

    fn dedup(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.processed_files.retain(|f| seen.insert(f.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut ledger = Ledger::default();
        assert!(ledger.insert("a.txt"));
        assert!(!ledger.insert("a.txt"));
        assert!(ledger.insert("b.txt"));
        assert_eq!(ledger.files(), &["a.txt".to_string(), "b.txt".to_string()]);
    }

    #[test]
    fn test_remove() {
        let mut ledger = Ledger::default();
        ledger.insert("a.txt");
        assert!(ledger.remove("a.txt"));
        assert!(!ledger.remove("a.txt"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_json_shape() {
        let mut ledger = Ledger::default();
        ledger.insert("labs.txt");
        let value: serde_json::Value = serde_json::from_str(&ledger.to_json().unwrap()).unwrap();
        assert_eq!(value["processed_files"][0], "labs.txt");
        assert!(value["last_updated"].is_null());

        ledger.touch();
        let parsed = Ledger::from_json(&ledger.to_json().unwrap()).unwrap();
        assert_eq!(parsed, ledger);
    }

    #[test]
    fn test_duplicates_collapse_on_read() {
        let json = r#"{"processed_files": ["a.txt", "a.txt", "b.txt"], "last_updated": null}"#;
        let ledger = Ledger::from_json(json).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.last_updated().is_none());

        let ledger = Ledger::from_json("{}").unwrap();
        assert!(ledger.is_empty());
    }
}
