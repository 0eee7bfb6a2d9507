//! Wire protocol types.
//!
//! This module defines the framing and the message encoding exchanged
//! between an edge agent and a cloud hub.
//!
//! # Protocol Overview
//!
//! ```text
//! Frame = Header(10) || Payload(PayloadLen)
//! ```
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Framing | [`PackageHeader`], [`PackageCodec`] | Delimit payloads on a byte stream |
//! | Encoding | [`translator`] | `Message` ⇄ payload bytes |
//! | Model | [`Message`] | Header, router labels, content |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `header` | Package header, version, framing codec |
//! | `message` | Message model and builders |
//! | `translator` | Payload encoding |

// ============================================================================
// Submodules
// ============================================================================

/// Package header and framing codec.
pub mod header;

/// Message model.
pub mod message;

/// Message payload encoding.
pub mod translator;

// ============================================================================
// Re-exports
// ============================================================================

pub use header::{
    DEFAULT_MAX_PAYLOAD_LEN, Frame, HEADER_LEN, PackageCodec, PackageHeader, PackageType,
    ProtocolVersion,
};
pub use message::{
    Content, Fingerprint, Message, MessageHeader, MessageRouter, RESPONSE_ERROR_OPERATION,
    RESPONSE_OPERATION,
};
