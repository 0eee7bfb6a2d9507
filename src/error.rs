//! Error types for edgelink.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use edgelink::{Message, Result, Session};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     let request = Message::new("").with_content("ping");
//!     let response = session.send_sync(request, Duration::from_secs(1)).await?;
//!     println!("{}", response.parent_id());
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Io`], [`Error::Transport`], [`Error::Closed`] |
//! | Protocol | [`Error::ShortHeader`], [`Error::OversizedFrame`], [`Error::Malformed`] |
//! | Message | [`Error::InvalidMessage`], [`Error::Json`] |
//! | Correlation | [`Error::Timeout`], [`Error::NoWaiter`], [`Error::SlotFull`], [`Error::DuplicateId`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use prost::DecodeError;
use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when session configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport could not produce a stream (dial or accept failed).
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// Operation on a closed session or connection.
    #[error("Connection closed")]
    Closed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Buffer too short to hold a package header.
    #[error("Short header: got {len} bytes, need {needed}")]
    ShortHeader {
        /// Bytes available.
        len: usize,
        /// Bytes required.
        needed: usize,
    },

    /// Declared payload length exceeds the configured cap.
    #[error("Oversized frame: payload of {len} bytes exceeds cap of {max}")]
    OversizedFrame {
        /// Declared (or attempted) payload length.
        len: u64,
        /// Configured cap.
        max: u32,
    },

    /// Payload could not be decoded into a message.
    #[error("Malformed message: {message}")]
    Malformed {
        /// Description of the decoding failure.
        message: String,
    },

    // ========================================================================
    // Message Errors
    // ========================================================================
    /// Message rejected before encoding.
    #[error("Invalid message: {message}")]
    InvalidMessage {
        /// Why the message was rejected.
        message: String,
    },

    // ========================================================================
    // Correlation Errors
    // ========================================================================
    /// No response observed before the deadline.
    #[error("Request {id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The request ID that timed out.
        id: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Response for a request nobody is waiting on.
    #[error("No waiter for response to {parent_id}")]
    NoWaiter {
        /// Parent ID carried by the response.
        parent_id: String,
    },

    /// Waiter slot already holds an undelivered response.
    #[error("Slot for {parent_id} is full")]
    SlotFull {
        /// Parent ID carried by the response.
        parent_id: String,
    },

    /// A slot for this ID is already registered.
    #[error("Duplicate sync id: {id}")]
    DuplicateId {
        /// The duplicated request ID.
        id: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Conversions
// ============================================================================

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Self::malformed(err.to_string())
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a short header error.
    #[inline]
    pub fn short_header(len: usize, needed: usize) -> Self {
        Self::ShortHeader { len, needed }
    }

    /// Creates an oversized frame error.
    #[inline]
    pub fn oversized_frame(len: u64, max: u32) -> Self {
        Self::OversizedFrame { len, max }
    }

    /// Creates a malformed message error.
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Creates an invalid message error.
    #[inline]
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(id: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            id: id.into(),
            timeout_ms,
        }
    }

    /// Creates a no waiter error.
    #[inline]
    pub fn no_waiter(parent_id: impl Into<String>) -> Self {
        Self::NoWaiter {
            parent_id: parent_id.into(),
        }
    }

    /// Creates a slot full error.
    #[inline]
    pub fn slot_full(parent_id: impl Into<String>) -> Self {
        Self::SlotFull {
            parent_id: parent_id.into(),
        }
    }

    /// Creates a duplicate id error.
    #[inline]
    pub fn duplicate_id(id: impl Into<String>) -> Self {
        Self::DuplicateId { id: id.into() }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a closed error.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns `true` if this error invalidates the current connection.
    ///
    /// Framing violations count: the reader cannot resynchronize after them.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Transport { .. } | Self::Closed
        ) || self.is_protocol_violation()
    }

    /// Returns `true` if the peer violated the framing protocol.
    #[inline]
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ShortHeader { .. } | Self::OversizedFrame { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors are absorbed by reconnecting.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Transport { .. } | Self::Timeout { .. })
            || self.is_protocol_violation()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::transport("connection refused");
        assert_eq!(err.to_string(), "Transport error: connection refused");
    }

    #[test]
    fn test_oversized_display() {
        let err = Error::oversized_frame(2 << 30, 1 << 20);
        assert_eq!(
            err.to_string(),
            "Oversized frame: payload of 2147483648 bytes exceeds cap of 1048576"
        );
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::timeout("d", 100);
        let other_err = Error::Closed;

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        let io_err: Error = IoError::new(ErrorKind::BrokenPipe, "pipe").into();

        assert!(io_err.is_connection_error());
        assert!(Error::Closed.is_connection_error());
        assert!(Error::short_header(3, 10).is_connection_error());
        assert!(!Error::malformed("bad").is_connection_error());
        assert!(!Error::no_waiter("x").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::oversized_frame(10, 1).is_recoverable());
        assert!(!Error::Closed.is_recoverable());
        assert!(!Error::duplicate_id("x").is_recoverable());
    }

    #[test]
    fn test_from_decode_error() {
        // field 1, length 5, no bytes follow
        let decode_err = <String as prost::Message>::decode(&[0x0a, 0x05][..]).unwrap_err();
        let err: Error = decode_err.into();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
