//! # species-gateway
//!
//! Rust client for the marine species admin backend.
//!
//! Every request goes through an authenticated [`Client`] that attaches the
//! stored bearer token and transparently recovers from an expired access
//! token: the first `401` starts a single refresh call, every other request
//! that fails meanwhile waits for it, and all of them are replayed once with
//! the new token.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use species_gateway::{Client, GatewayConfig, MemoryCredentialStore};
//! use species_gateway::services::{AuthService, SpeciesQuery, SpeciesService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), species_gateway::Error> {
//!     let client = Client::builder()
//!         .config(GatewayConfig::base_url("https://api.example.com"))
//!         .credential_store(Arc::new(MemoryCredentialStore::new()))
//!         .on_session_expired(|event| eprintln!("{}", event.message))
//!         .build()?;
//!
//!     let user = AuthService::new(&client)
//!         .sign_in("admin@example.com", "secret")
//!         .await?;
//!     println!("signed in as {}", user.name);
//!
//!     let page = SpeciesService::new(&client)
//!         .list(&SpeciesQuery::default())
//!         .await?;
//!     println!("{} species", page.pagination.total);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod auth;
pub mod client;
pub mod config;
pub mod services;

pub use auth::{
    CredentialKey, CredentialStore, Credentials, FileCredentialStore, MemoryCredentialStore,
    SessionExpired, SessionListener,
};
pub use client::{
    Client, ClientBuilder, HttpRequest, HttpResponse, MultipartForm, Part, RefreshCoordinator,
    RefreshPhase, ReqwestTransport, RequestBody, RequestConfig, Transport, TransportRequest,
};
pub use config::{DEFAULT_TIMEOUT, GatewayConfig};

/// Error type for gateway operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Backend answered with a non-success status.
    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
        body: Option<String>,
    },

    /// Transport-level failure (DNS, connect, reset, body read).
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),

    /// Request exceeded its timeout.
    #[error("Request timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(std::time::Duration),

    /// Request was cancelled by its caller.
    #[error("Request cancelled")]
    Cancelled,

    /// Authentication rejected locally (e.g. locked account).
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// Request was rejected before reaching the network.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Request URL could not be built.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential storage failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure classes the refresh protocol reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport failure or timeout. Not retried.
    Network,
    /// Caller-initiated abort. Never refreshes, never clears credentials.
    Cancelled,
    /// `401` from a protected endpoint; the only refresh trigger.
    AuthExpired,
    /// Any other HTTP error status.
    OtherHttp,
    /// Rejected locally: validation, configuration, locked account.
    Configuration,
    /// Serialization, URL or storage failure.
    Internal,
}

impl Error {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status,
            message: message.into(),
            body: None,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(_) | Error::Timeout(_) => ErrorKind::Network,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Api { status: 401, .. } => ErrorKind::AuthExpired,
            Error::Api { .. } => ErrorKind::OtherHttp,
            Error::Auth { .. } | Error::InvalidRequest(_) | Error::Config(_) => {
                ErrorKind::Configuration
            }
            Error::Json(_) | Error::Url(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind() == ErrorKind::AuthExpired
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// Transient failures a caller may choose to retry itself.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout(_) => true,
            Error::Api { status, .. } => matches!(status, 429 | 500..=599),
            _ => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
