//! Message translator.
//!
//! Converts a [`Message`] to and from its payload bytes. The payload is a
//! length-tagged (protobuf) record:
//!
//! ```text
//! Message { 1: Header, 2: Router, 3: bytes content }
//! Header  { 1: id, 2: parent_id, 3: timestamp, 4: sync, 5: resource_version, 6: message_type }
//! Router  { 1: source, 2: group, 3: operation, 4: resource, 5: destination }
//! ```
//!
//! `Message::with_id("1").with_content("msg")` encodes to
//! `0a 03 0a 01 31 12 00 1a 03 6d 73 67`.

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;
use prost::Message as _;

use crate::error::{Error, Result};

use super::message::{Content, Message, MessageHeader, MessageRouter};

// ============================================================================
// Wire Records
// ============================================================================

#[derive(Clone, PartialEq, prost::Message)]
struct WireMessage {
    #[prost(message, optional, tag = "1")]
    header: Option<WireHeader>,
    #[prost(message, optional, tag = "2")]
    router: Option<WireRouter>,
    #[prost(bytes = "bytes", tag = "3")]
    content: Bytes,
}

#[derive(Clone, PartialEq, prost::Message)]
struct WireHeader {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, tag = "2")]
    parent_id: String,
    #[prost(int64, tag = "3")]
    timestamp: i64,
    #[prost(bool, tag = "4")]
    sync: bool,
    #[prost(string, tag = "5")]
    resource_version: String,
    #[prost(string, tag = "6")]
    message_type: String,
}

#[derive(Clone, PartialEq, prost::Message)]
struct WireRouter {
    #[prost(string, tag = "1")]
    source: String,
    #[prost(string, tag = "2")]
    group: String,
    #[prost(string, tag = "3")]
    operation: String,
    #[prost(string, tag = "4")]
    resource: String,
    #[prost(string, tag = "5")]
    destination: String,
}

// ============================================================================
// Conversions
// ============================================================================

impl From<&MessageHeader> for WireHeader {
    fn from(header: &MessageHeader) -> Self {
        Self {
            id: header.id.clone(),
            parent_id: header.parent_id.clone(),
            timestamp: header.timestamp,
            sync: header.sync,
            resource_version: header.resource_version.clone(),
            message_type: header.message_type.clone(),
        }
    }
}

impl From<WireHeader> for MessageHeader {
    fn from(wire: WireHeader) -> Self {
        Self {
            id: wire.id,
            parent_id: wire.parent_id,
            timestamp: wire.timestamp,
            sync: wire.sync,
            resource_version: wire.resource_version,
            message_type: wire.message_type,
        }
    }
}

impl From<&MessageRouter> for WireRouter {
    fn from(router: &MessageRouter) -> Self {
        Self {
            source: router.source.clone(),
            group: router.group.clone(),
            operation: router.operation.clone(),
            resource: router.resource.clone(),
            destination: router.destination.clone(),
        }
    }
}

impl From<WireRouter> for MessageRouter {
    fn from(wire: WireRouter) -> Self {
        Self {
            source: wire.source,
            destination: wire.destination,
            group: wire.group,
            operation: wire.operation,
            resource: wire.resource,
        }
    }
}

// ============================================================================
// Encode / Decode
// ============================================================================

/// Encodes `msg` into payload bytes.
///
/// # Errors
///
/// - [`Error::InvalidMessage`] if the message has no ID
/// - [`Error::Json`] if a JSON body fails to serialize
pub fn encode(msg: &Message) -> Result<Bytes> {
    if msg.header.id.is_empty() {
        return Err(Error::invalid_message("message ID is empty"));
    }

    let wire = WireMessage {
        header: Some(WireHeader::from(&msg.header)),
        router: Some(WireRouter::from(&msg.router)),
        content: msg.content.to_bytes()?,
    };

    Ok(Bytes::from(wire.encode_to_vec()))
}

/// Decodes payload bytes into a new message.
///
/// # Errors
///
/// Returns [`Error::Malformed`] on truncated or ill-formed input.
pub fn decode(payload: Bytes) -> Result<Message> {
    let wire = WireMessage::decode(payload)?;

    Ok(Message {
        header: wire.header.map(MessageHeader::from).unwrap_or_default(),
        router: wire.router.map(MessageRouter::from).unwrap_or_default(),
        content: Content::Bytes(wire.content),
    })
}

/// Decodes payload bytes into `target`, leaving it untouched on error.
///
/// # Errors
///
/// Returns [`Error::Malformed`] on truncated or ill-formed input.
pub fn decode_into(payload: Bytes, target: &mut Message) -> Result<()> {
    *target = decode(payload)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    const REFERENCE: &[u8] = &[
        0x0a, 0x03, 0x0a, 0x01, 0x31, 0x12, 0x00, 0x1a, 0x03, 0x6d, 0x73, 0x67,
    ];

    #[test]
    fn test_reference_vector_encode() {
        let msg = Message::with_id("1").with_content("msg");
        let encoded = encode(&msg).expect("encode");
        assert_eq!(&encoded[..], REFERENCE);
    }

    #[test]
    fn test_reference_vector_decode() {
        let decoded = decode(Bytes::from_static(REFERENCE)).expect("decode");

        assert_eq!(decoded.id(), "1");
        assert_eq!(decoded.parent_id(), "");
        assert_eq!(decoded.content, Content::Bytes(Bytes::from_static(b"msg")));
    }

    #[test]
    fn test_byte_content_roundtrip() {
        let mut msg = Message::new("parent")
            .build_router("edged", "resource", "pod", "update")
            .set_destination("cloud")
            .set_resource_version("42")
            .set_type("channel")
            .with_content(Bytes::from_static(b"\x00\x01binary"));
        msg.header.sync = true;

        let decoded = decode(encode(&msg).expect("encode")).expect("decode");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_json_content_becomes_bytes() {
        let msg = Message::with_id("j").with_content(json!({"k": "v"}));
        let decoded = decode(encode(&msg).expect("encode")).expect("decode");

        assert_eq!(
            decoded.content,
            Content::Bytes(Bytes::from_static(br#"{"k":"v"}"#))
        );
    }

    #[test]
    fn test_empty_id_rejected() {
        let err = encode(&Message::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidMessage { .. }));
    }

    #[test]
    fn test_truncated_input_malformed() {
        let err = decode(Bytes::from_static(&REFERENCE[..REFERENCE.len() - 1])).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn test_overlong_length_malformed() {
        // content field claims 0x7f bytes but only 3 follow
        let err = decode(Bytes::from_static(&[0x1a, 0x7f, 0x6d, 0x73, 0x67])).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn test_invalid_utf8_malformed() {
        let err = decode(Bytes::from_static(&[0x0a, 0x03, 0x0a, 0x01, 0xff])).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn test_decode_into_keeps_target_on_error() {
        let mut target = Message::with_id("keep");
        assert!(decode_into(Bytes::from_static(&[0x0a, 0x09]), &mut target).is_err());
        assert_eq!(target.id(), "keep");

        decode_into(Bytes::from_static(REFERENCE), &mut target).expect("decode");
        assert_eq!(target.id(), "1");
    }
}
