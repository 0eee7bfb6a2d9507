//! Shared helpers for session tests.

#![allow(dead_code)]

use std::time::Duration;

use edgelink::transport::memory;
use edgelink::{Inbox, MemoryListener, Session, SessionConfig, SessionState};
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for anything that should happen "soon".
pub const WAIT: Duration = Duration::from_secs(5);

/// Reconnect period used by test sessions.
pub const RECONNECT: Duration = Duration::from_millis(50);

// ============================================================================
// Functions
// ============================================================================

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Session configuration with a short reconnect period.
pub fn config() -> SessionConfig {
    SessionConfig::new("memory").with_reconnect_period(RECONNECT)
}

/// Waits until `session` reaches `state`.
pub async fn reach(session: &Session, state: SessionState) {
    timeout(WAIT, session.wait_for_state(state))
        .await
        .expect("state reached in time")
        .expect("session open");
}

/// Receives the next inbox message or panics.
pub async fn next(inbox: &mut Inbox) -> edgelink::Message {
    timeout(WAIT, inbox.recv())
        .await
        .expect("message in time")
        .expect("inbox open")
}

// ============================================================================
// Pair
// ============================================================================

/// Hub and edge sessions joined in memory.
pub struct Pair {
    pub client: Session,
    pub client_inbox: Inbox,
    pub server: Session,
    pub server_inbox: Inbox,
    pub listener: MemoryListener,
}

impl Pair {
    /// Starts both sides with `config()` and waits until both are connected.
    pub async fn connect() -> Self {
        Self::connect_with(config(), config()).await
    }

    /// Starts both sides with the given configurations.
    pub async fn connect_with(server_config: SessionConfig, client_config: SessionConfig) -> Self {
        init_logging();

        let (connector, listener) = memory::channel(64 * 1024);
        let (server, server_inbox) = Session::builder(server_config)
            .transport(listener.clone())
            .start()
            .expect("server start");
        let (client, client_inbox) = Session::builder(client_config)
            .transport(connector)
            .start()
            .expect("client start");

        reach(&client, SessionState::Connected).await;
        reach(&server, SessionState::Connected).await;

        Self {
            client,
            client_inbox,
            server,
            server_inbox,
            listener,
        }
    }
}
