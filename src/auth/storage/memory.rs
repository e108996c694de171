//! In-process credential storage.

use std::sync::Arc;

use dashmap::DashMap;

use super::{CredentialKey, CredentialStore};
use crate::Result;

/// Thread-safe in-memory store. Clones share the same entries.
#[derive(Clone, Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Arc<DashMap<CredentialKey, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: CredentialKey) -> Option<String> {
        self.entries.get(&key).map(|v| v.value().clone())
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<()> {
        self.entries.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: CredentialKey) -> Result<()> {
        self.entries.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryCredentialStore::new();
        assert!(store.is_empty());

        store.set(CredentialKey::AccessToken, "token").unwrap();
        assert_eq!(store.get(CredentialKey::AccessToken).as_deref(), Some("token"));

        store.remove(CredentialKey::AccessToken).unwrap();
        assert!(store.get(CredentialKey::AccessToken).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let store = MemoryCredentialStore::new();
        let other = store.clone();
        store.set(CredentialKey::RefreshToken, "r").unwrap();
        assert_eq!(other.get(CredentialKey::RefreshToken).as_deref(), Some("r"));
    }
}
