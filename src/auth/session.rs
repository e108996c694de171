//! Session termination notification.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Emitted once when the backend rejects the refresh token.
///
/// The stored credentials are already cleared when listeners see this; the
/// application is expected to show `message` and navigate to its sign-in
/// screen.
#[derive(Clone, Debug)]
pub struct SessionExpired {
    pub message: String,
    pub at: DateTime<Utc>,
}

impl SessionExpired {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            at: Utc::now(),
        }
    }
}

pub type SessionListener = Arc<dyn Fn(&SessionExpired) + Send + Sync>;
