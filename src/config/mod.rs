//! Client configuration.
//!
//! ```rust
//! use std::time::Duration;
//! use species_gateway::GatewayConfig;
//!
//! let config = GatewayConfig::base_url("https://api.example.com")
//!     .timeout(Duration::from_secs(30))
//!     .header("X-Client", "species-admin");
//! assert!(config.is_public("/auth/login"));
//! ```

mod gateway;

use std::time::Duration;

pub use gateway::GatewayConfig;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Token refresh endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Endpoints whose `401` is returned as-is.
pub const DEFAULT_PUBLIC_PATHS: &[&str] = &[
    "/auth/login",
    "/auth/sign-in",
    "/auth/register",
    "/auth/forgot-password",
    "/auth/require-reset",
];

pub const DEFAULT_SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";
