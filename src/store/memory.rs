use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{IndexStore, UserIndexState};
use crate::error::Result;

/// Keeps "persisted" state in a map. Follows the same rules as the
/// filesystem store: empty vector sets are not written over earlier ones.
#[derive(Default)]
pub struct MemoryIndexStore {
    users: Mutex<HashMap<String, UserIndexState>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of what is currently stored for `user_id`.
    pub fn stored(&self, user_id: &str) -> Option<UserIndexState> {
        let users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        users.get(user_id).cloned()
    }
}

impl IndexStore for MemoryIndexStore {
    fn load(&self, user_id: &str) -> Result<Option<UserIndexState>> {
        Ok(self.stored(user_id))
    }

    fn save(&self, user_id: &str, state: &UserIndexState) -> Result<()> {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = users.entry(user_id.to_string()).or_default();
        if state.has_vectors() {
            *stored = state.clone();
        } else {
            *stored.ledger_mut() = state.ledger().clone();
        }
        Ok(())
    }

    fn purge_vectors(&self, user_id: &str) -> Result<()> {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stored) = users.get_mut(user_id) {
            stored.clear_vectors();
        }
        Ok(())
    }
}
