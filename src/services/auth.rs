//! Admin authentication endpoints.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::auth::{CredentialKey, Credentials};
use crate::client::{Client, RequestConfig};
use crate::{Error, Result};

const SIGN_IN_PATH: &str = "/auth/sign-in";
const ME_PATH: &str = "/auth/me";

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Superadmin,
    Admin,
    Editor,
    Viewer,
    Superuser,
    User,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUser {
    pub id: String,
    #[serde(default)]
    pub supabase_id: Option<String>,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub role: UserRole,
    #[serde(default)]
    pub banned: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignInResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
    pub user: AdminUser,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

pub struct AuthService<'a> {
    client: &'a Client,
}

impl<'a> AuthService<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// Sign in and store the issued tokens.
    ///
    /// Input is validated before any network call. A banned account is
    /// rejected with [`Error::Auth`] and nothing is stored.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AdminUser> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(Error::InvalidRequest(
                "email and password are required".into(),
            ));
        }
        if !email_regex().is_match(email) {
            return Err(Error::InvalidRequest(format!("invalid email: {email}")));
        }

        let response = self
            .client
            .post_json(SIGN_IN_PATH, &SignInRequest { email, password })
            .await?;
        let signed_in: SignInResponse = response.json()?;

        if signed_in.user.banned {
            tracing::warn!(user_id = %signed_in.user.id, "Sign-in refused for locked account");
            return Err(Error::auth("account is locked"));
        }

        Credentials::new(
            signed_in.access_token,
            signed_in.refresh_token,
            signed_in.expires_at,
        )
        .save(self.client.credential_store())?;

        tracing::info!(user_id = %signed_in.user.id, role = ?signed_in.user.role, "Signed in");
        Ok(signed_in.user)
    }

    /// Current admin profile.
    pub async fn me(&self) -> Result<AdminUser> {
        self.me_with(RequestConfig::default()).await
    }

    pub async fn me_with(&self, config: RequestConfig) -> Result<AdminUser> {
        self.client.get_with(ME_PATH, config).await?.json()
    }

    /// Forget stored credentials. Local only; the listener is not notified.
    pub fn sign_out(&self) -> Result<()> {
        Credentials::clear(self.client.credential_store())?;
        tracing::debug!("Signed out");
        Ok(())
    }

    pub fn is_signed_in(&self) -> bool {
        self.client
            .credential_store()
            .get(CredentialKey::AccessToken)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        let re = email_regex();
        assert!(re.is_match("admin@example.com"));
        assert!(re.is_match("first.last+tag@reef.org.vn"));
        assert!(!re.is_match("admin@example"));
        assert!(!re.is_match("admin example.com"));
        assert!(!re.is_match("@example.com"));
    }

    #[test]
    fn test_sign_in_response_wire_names() {
        let raw = r#"{
            "accessToken": "a",
            "refreshToken": "r",
            "expires_at": 1700000000,
            "user": {
                "id": "u1",
                "supabase_id": "s1",
                "name": "Lan",
                "email": "lan@example.com",
                "phone_number": null,
                "role": "superadmin",
                "banned": false,
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z"
            }
        }"#;
        let parsed: SignInResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.access_token, "a");
        assert_eq!(parsed.refresh_token, "r");
        assert_eq!(parsed.expires_at, Some(1_700_000_000));
        assert_eq!(parsed.user.role, UserRole::Superadmin);
        assert!(parsed.user.phone_number.is_none());
    }

    #[test]
    fn test_unknown_role() {
        let role: UserRole = serde_json::from_str(r#""auditor""#).unwrap();
        assert_eq!(role, UserRole::Unknown);
    }

    #[tokio::test]
    async fn test_sign_in_rejects_bad_input_without_network() {
        let client = Client::builder()
            .base_url("http://127.0.0.1:9")
            .build()
            .unwrap();
        let auth = AuthService::new(&client);

        assert!(matches!(
            auth.sign_in("", "pw").await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            auth.sign_in("admin@example.com", "").await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            auth.sign_in("not-an-email", "pw").await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(!auth.is_signed_in());
    }
}
