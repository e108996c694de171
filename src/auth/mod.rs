//! Session credentials.
//!
//! - [`Credentials`]: access/refresh token pair with expiry helpers
//! - [`CredentialStore`]: injected key-value persistence, with in-memory and
//!   JSON file implementations
//! - [`SessionExpired`]: notification fired when the session cannot be renewed

mod credential;
mod session;
mod storage;

pub use credential::Credentials;
pub use session::{SessionExpired, SessionListener};
pub use storage::{CredentialKey, CredentialStore, FileCredentialStore, MemoryCredentialStore};
