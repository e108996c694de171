//! Backend gateway configuration.

use std::env;
use std::time::Duration;

use url::Url;

use super::{
    DEFAULT_PUBLIC_PATHS, DEFAULT_REFRESH_PATH, DEFAULT_SESSION_EXPIRED_MESSAGE, DEFAULT_TIMEOUT,
};
use crate::{Error, Result};

/// Where and how the client talks to the species backend.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Base URL prepended to relative request paths
    pub base_url: Option<String>,
    /// Default per-request timeout
    pub timeout: Duration,
    /// Headers sent with every request
    pub default_headers: Vec<(String, String)>,
    /// Path fragments exempt from refresh/retry
    pub public_paths: Vec<String>,
    /// Token refresh endpoint
    pub refresh_path: String,
    /// Message handed to the session-expired listener
    pub session_expired_message: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            default_headers: Vec::new(),
            public_paths: DEFAULT_PUBLIC_PATHS.iter().map(|p| p.to_string()).collect(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            session_expired_message: DEFAULT_SESSION_EXPIRED_MESSAGE.to_string(),
        }
    }
}

impl GatewayConfig {
    /// Create from environment variables.
    ///
    /// `SPECIES_API_URL` wins over `SPECIES_API_URL_LOCAL`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.base_url = env::var("SPECIES_API_URL")
            .ok()
            .or_else(|| env::var("SPECIES_API_URL_LOCAL").ok())
            .filter(|url| !url.trim().is_empty());

        if let Ok(raw) = env::var("SPECIES_API_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                Error::Config(format!("SPECIES_API_TIMEOUT_SECS is not a number: {raw}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        if let Ok(raw) = env::var("SPECIES_API_HEADERS") {
            config.default_headers = parse_header_lines(&raw);
        }

        Ok(config)
    }

    /// Create with base URL.
    pub fn base_url(url: impl Into<String>) -> Self {
        Self {
            base_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a default header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Add a path to the public allow-list.
    pub fn public_path(mut self, path: impl Into<String>) -> Self {
        self.public_paths.push(path.into());
        self
    }

    /// Replace the public allow-list.
    pub fn public_paths(mut self, paths: impl IntoIterator<Item = String>) -> Self {
        self.public_paths = paths.into_iter().collect();
        self
    }

    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    pub fn session_expired_message(mut self, message: impl Into<String>) -> Self {
        self.session_expired_message = message.into();
        self
    }

    /// Public endpoints never enter the refresh protocol.
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path.contains(p.as_str()))
    }

    /// Resolve a request path against the base URL.
    ///
    /// Absolute `http(s)://` paths are used as-is. Relative paths are appended
    /// to the base URL, keeping any path prefix the base carries.
    pub fn resolve_url(&self, path: &str) -> Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(Url::parse(path)?);
        }

        let base = self.base_url.as_deref().ok_or_else(|| {
            Error::Config(format!("No base URL configured for relative path {path}"))
        })?;

        let joined = match (base.ends_with('/'), path.starts_with('/')) {
            (true, true) => format!("{}{}", base, &path[1..]),
            (false, false) if !path.is_empty() => format!("{}/{}", base, path),
            _ => format!("{}{}", base, path),
        };

        Ok(Url::parse(&joined)?)
    }
}

/// Parse `Name: Value` header lines.
fn parse_header_lines(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_config_builder() {
        let config = GatewayConfig::base_url("https://api.example.com")
            .timeout(Duration::from_secs(5))
            .header("X-Client", "admin")
            .public_path("/auth/verify-otp")
            .refresh_path("/v2/auth/refresh");

        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.default_headers.len(), 1);
        assert!(config.is_public("/auth/verify-otp"));
        assert_eq!(config.refresh_path, "/v2/auth/refresh");
    }

    #[test]
    fn test_default_public_paths() {
        let config = GatewayConfig::default();
        assert!(config.is_public("/auth/login"));
        assert!(config.is_public("/auth/sign-in"));
        assert!(config.is_public("/auth/register"));
        assert!(config.is_public("/auth/forgot-password"));
        assert!(config.is_public("/auth/require-reset?email=a@b.c"));
        assert!(!config.is_public("/auth/me"));
        assert!(!config.is_public("/species/get-all"));
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_resolve_url() {
        let config = GatewayConfig::base_url("https://api.example.com/v1");
        assert_eq!(
            config.resolve_url("/species/get-all").unwrap().as_str(),
            "https://api.example.com/v1/species/get-all"
        );
        assert_eq!(
            config.resolve_url("species").unwrap().as_str(),
            "https://api.example.com/v1/species"
        );

        let config = GatewayConfig::base_url("https://api.example.com/");
        assert_eq!(
            config.resolve_url("/auth/me").unwrap().as_str(),
            "https://api.example.com/auth/me"
        );
        assert_eq!(
            config.resolve_url("https://cdn.example.com/x").unwrap().as_str(),
            "https://cdn.example.com/x"
        );
    }

    #[test]
    fn test_resolve_relative_without_base() {
        let config = GatewayConfig::default();
        assert!(matches!(
            config.resolve_url("/auth/me"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parse_header_lines() {
        let headers = parse_header_lines("X-One: 1\nbroken line\nX-Two:  two words \n: empty");
        assert_eq!(
            headers,
            vec![
                ("X-One".to_string(), "1".to_string()),
                ("X-Two".to_string(), "two words".to_string()),
            ]
        );
    }
}
