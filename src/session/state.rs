//! Session lifecycle states.
//!
//! ```text
//! Disconnected ──► Dialing ──► Draining ──► Connected
//!      ▲              │            │            │
//!      └──────────────┴────────────┴────────────┘   (error / backoff)
//!
//! any ──► Closed   (terminal)
//! ```

use std::fmt;

// ============================================================================
// SessionState
// ============================================================================

/// Where a session is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No connection; sends go to the outbound cache.
    Disconnected,
    /// Establishing a connection.
    Dialing,
    /// Connection up and the cache empty; sends go to the wire.
    Connected,
    /// Connection up, flushing cached messages.
    Draining,
    /// Closed by the application. Terminal.
    Closed,
}

impl SessionState {
    /// Returns the lowercase state name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Dialing => "dialing",
            Self::Connected => "connected",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }

    /// Returns `true` for [`Connected`](Self::Connected).
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` for [`Closed`](Self::Closed).
    #[inline]
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// StateHandler
// ============================================================================

/// Callback invoked on every state transition.
///
/// Runs on the task that caused the transition; keep it short. Panics are
/// caught and logged.
pub type StateHandler = Box<dyn Fn(SessionState) + Send + Sync>;

// ============================================================================
// Tests
// ============================================================================
