//! Credential types.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use super::storage::{CredentialKey, CredentialStore};
use crate::Result;

/// Access/refresh token pair issued by the backend.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// Bearer token sent with every request.
    pub access_token: SecretString,
    /// Exchanged for a new access token on `401`.
    pub refresh_token: SecretString,
    /// Expiration timestamp (Unix seconds).
    pub expires_at: Option<i64>,
}

impl Credentials {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: Option<i64>,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
            expires_at,
        }
    }

    /// Read the stored token pair. `None` unless both tokens are present.
    pub fn load(store: &dyn CredentialStore) -> Option<Self> {
        let access_token = store.get(CredentialKey::AccessToken)?;
        let refresh_token = store.get(CredentialKey::RefreshToken)?;
        let expires_at = store
            .get(CredentialKey::ExpiresAt)
            .and_then(|raw| raw.trim().parse().ok());

        Some(Self::new(access_token, refresh_token, expires_at))
    }

    /// Persist the token pair. A missing expiry leaves the stored one untouched.
    pub fn save(&self, store: &dyn CredentialStore) -> Result<()> {
        store.set(CredentialKey::AccessToken, self.access_token.expose_secret())?;
        store.set(CredentialKey::RefreshToken, self.refresh_token.expose_secret())?;
        if let Some(expires_at) = self.expires_at {
            store.set(CredentialKey::ExpiresAt, &expires_at.to_string())?;
        }
        Ok(())
    }

    /// Remove every credential key from the store.
    pub fn clear(store: &dyn CredentialStore) -> Result<()> {
        for key in CredentialKey::ALL {
            store.remove(key)?;
        }
        Ok(())
    }

    /// Stored expiry as a timestamp. `None` when unknown or out of range.
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires_at.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}
