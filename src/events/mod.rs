use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod streams;
pub use streams::{EventStream, EventStreamStats, Subscriber};

// Session event stream sizing
pub const SESSION_EVENT_CAPACITY: usize = 64;
pub const SESSION_EVENT_BUFFER_SIZE: usize = 16;

/// Lifecycle events for the authenticated session.
///
/// Host applications subscribe to these instead of the client navigating
/// anywhere itself. `SessionExpired` is the signal to send the user back to
/// the login screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Credentials were stored after a successful login
    LoggedIn { at: DateTime<Utc> },

    /// The access token was refreshed
    TokensRefreshed {
        /// Whether the backend also issued a new refresh token
        refresh_token_rotated: bool,
        /// Number of queued requests released with the new token
        released: usize,
        at: DateTime<Utc>,
    },

    /// The session could not be refreshed; tokens have been cleared
    SessionExpired {
        reason: String,
        redirect_to: String,
        at: DateTime<Utc>,
    },

    /// Credentials were cleared on request
    LoggedOut { at: DateTime<Utc> },
}

impl SessionEvent {
    /// Short name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::LoggedIn { .. } => "session.logged_in",
            SessionEvent::TokensRefreshed { .. } => "session.tokens_refreshed",
            SessionEvent::SessionExpired { .. } => "session.expired",
            SessionEvent::LoggedOut { .. } => "session.logged_out",
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            SessionEvent::LoggedIn { at }
            | SessionEvent::TokensRefreshed { at, .. }
            | SessionEvent::SessionExpired { at, .. }
            | SessionEvent::LoggedOut { at } => at,
        }
    }
}
