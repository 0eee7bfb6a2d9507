//! Builder for session startup.
//!
//! # Example
//!
//! ```ignore
//! use edgelink::{Session, SessionConfig};
//!
//! let (session, mut inbox) = Session::builder(SessionConfig::new("cloudhub:10000"))
//!     .on_state_change(|state| println!("session is {state}"))
//!     .start()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::transport::{TcpTransport, Transport};

use super::config::SessionConfig;
use super::core::{Inbox, Session};
use super::state::{SessionState, StateHandler};

// ============================================================================
// SessionBuilder
// ============================================================================

/// Configures and starts a [`Session`].
///
/// Use [`Session::builder()`] to create one.
pub struct SessionBuilder {
    /// Session configuration.
    config: SessionConfig,
    /// Connection source; plain TCP to `dial_address` when unset.
    transport: Option<Arc<dyn Transport>>,
    /// Optional state callback.
    state_handler: Option<StateHandler>,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("transport", &self.transport.as_ref().map(|t| t.peer()))
            .field("state_handler", &self.state_handler.is_some())
            .finish()
    }
}

// ============================================================================
// SessionBuilder Implementation
// ============================================================================

impl SessionBuilder {
    /// Creates a builder for `config`.
    #[inline]
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            transport: None,
            state_handler: None,
        }
    }

    /// Uses `transport` to produce connections.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Uses an already shared transport.
    #[inline]
    #[must_use]
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Registers a callback for state transitions.
    #[inline]
    #[must_use]
    pub fn on_state_change<F>(mut self, handler: F) -> Self
    where
        F: Fn(SessionState) + Send + Sync + 'static,
    {
        self.state_handler = Some(Box::new(handler));
        self
    }

    /// Validates the configuration and starts the session.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if the configuration is
    ///   invalid, no runtime is available, or no transport was given and
    ///   the default TCP transport cannot be built
    pub fn start(self) -> Result<(Session, Inbox)> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(TcpTransport::from_config(&self.config)?),
        };

        Session::launch(self.config, transport, self.state_handler)
    }
}

// ============================================================================
// Tests
// ============================================================================
