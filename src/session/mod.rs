//! Transport session.
//!
//! The session owns one connection at a time, correlates synchronous
//! requests with their responses, and parks outgoing messages while the
//! wire is down.
//!
//! # Architecture
//!
//! ```text
//!  application ──send/send_sync──► Session ──► OutboundCache (disconnected)
//!                                    │
//!                                    ▼
//!                               Connection ◄──► peer
//!                                    │
//!                        read loop ──┴──► SyncKeeper (responses)
//!                                    └──► Inbox (everything else)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`SessionBuilder`] |
//! | `cache` | [`OutboundCache`], ordered latest-wins store |
//! | `config` | [`SessionConfig`] and TLS material |
//! | `core` | [`Session`], [`Inbox`], background tasks |
//! | `keeper` | [`SyncKeeper`], response correlation |
//! | `state` | [`SessionState`] |

// ============================================================================
// Submodules
// ============================================================================

/// Session builder.
pub mod builder;

/// Outbound cache.
pub mod cache;

/// Session configuration.
pub mod config;

/// Session handle and background tasks.
pub mod core;

/// Response correlation.
pub mod keeper;

/// Lifecycle states.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::SessionBuilder;
pub use cache::OutboundCache;
pub use config::{LoadedTls, PemSource, SessionConfig, TlsMaterial};
pub use self::core::{Inbox, Session, keepalive_message};
pub use keeper::{Slot, SyncKeeper};
pub use state::{SessionState, StateHandler};
