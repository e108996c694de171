//! File-based credential storage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use directories::BaseDirs;

use super::{CredentialKey, CredentialStore};
use crate::{Error, Result};

const APP_DIR: &str = ".species-gateway";
const CREDENTIALS_FILE: &str = "credentials.json";

/// JSON file store, persisted on every write.
///
/// The file is a flat object keyed by [`CredentialKey::as_str`].
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileCredentialStore {
    /// `~/.species-gateway/credentials.json`
    pub fn default_path() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.home_dir().join(APP_DIR).join(CREDENTIALS_FILE))
    }

    pub fn open_default() -> Result<Self> {
        let path = Self::default_path()
            .ok_or_else(|| Error::Config("Cannot determine home directory".into()))?;
        Self::open(path)
    }

    /// Open a store, loading existing entries if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: CredentialKey) -> Option<String> {
        self.entries().get(key.as_str()).cloned()
    }

    fn set(&self, key: CredentialKey, value: &str) -> Result<()> {
        let mut entries = self.entries();
        let mut next = entries.clone();
        next.insert(key.as_str().to_string(), value.to_string());
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove(&self, key: CredentialKey) -> Result<()> {
        let mut entries = self.entries();
        if !entries.contains_key(key.as_str()) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key.as_str());
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}
