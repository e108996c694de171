//! Credential storage implementations.

mod file;
mod memory;

use crate::Result;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

/// Keys the client reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    AccessToken,
    RefreshToken,
    ExpiresAt,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 3] = [
        CredentialKey::AccessToken,
        CredentialKey::RefreshToken,
        CredentialKey::ExpiresAt,
    ];

    /// Storage name, shared with the web dashboard's local storage layout.
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKey::AccessToken => "accessToken",
            CredentialKey::RefreshToken => "refreshToken",
            CredentialKey::ExpiresAt => "expires_at",
        }
    }
}

impl std::fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key-value store holding the session's tokens.
///
/// Only the client writes to it; callers observe it indirectly through the
/// requests they make.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: CredentialKey) -> Option<String>;

    fn set(&self, key: CredentialKey, value: &str) -> Result<()>;

    fn remove(&self, key: CredentialKey) -> Result<()>;
}
