//! The message model carried by the transport.
//!
//! A [`Message`] has a header (identity and correlation), a router
//! (opaque routing labels) and a content body. The transport never looks
//! inside the content.
//!
//! # Building Messages
//!
//! ```ignore
//! use edgelink::Message;
//!
//! let request = Message::new("")
//!     .build_router("edged", "resource", "pod", "update")
//!     .with_content("payload");
//!
//! let response = Message::new_response(&request, "ok");
//! assert_eq!(response.parent_id(), request.id());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Operation set on responses built by [`Message::new_response`].
pub const RESPONSE_OPERATION: &str = "response";

/// Operation set on error replies built by [`Message::new_error`].
pub const RESPONSE_ERROR_OPERATION: &str = "error";

/// Last timestamp handed out, keeps timestamps non-decreasing.
static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Returns a millisecond timestamp never smaller than the previous one.
fn next_timestamp() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();
    let prev = LAST_TIMESTAMP.fetch_max(now, Ordering::AcqRel);
    prev.max(now)
}

// ============================================================================
// Content
// ============================================================================

/// Message body.
///
/// Byte and text bodies go on the wire as-is; JSON bodies are serialized
/// when the message is encoded. A decoded message always carries
/// [`Content::Bytes`].
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Raw bytes.
    Bytes(Bytes),
    /// UTF-8 text, embedded without quoting.
    Text(String),
    /// A JSON value.
    Json(Value),
}

impl Content {
    /// Serializes `value` into a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Materializes the bytes that go on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if a JSON body fails to
    /// serialize.
    pub fn to_bytes(&self) -> Result<Bytes> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Self::Json(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
        }
    }

    /// Returns the raw bytes if this is a byte body.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns `true` for an empty byte or text body.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::Text(text) => text.is_empty(),
            Self::Json(_) => false,
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::Bytes(Bytes::new())
    }
}

impl From<Bytes> for Content {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<&'static [u8]> for Content {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Value> for Content {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

// ============================================================================
// MessageHeader
// ============================================================================

/// Identity and correlation fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeader {
    /// Unique message ID.
    pub id: String,
    /// ID of the request this message answers, empty otherwise.
    pub parent_id: String,
    /// Creation time in milliseconds.
    pub timestamp: i64,
    /// Set on requests sent through `send_sync`.
    pub sync: bool,
    /// Resource version of the object carried in the content, if any.
    pub resource_version: String,
    /// Context type that delivers the message.
    pub message_type: String,
}

// ============================================================================
// MessageRouter
// ============================================================================

/// Routing labels. Opaque to the transport except for the fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageRouter {
    /// Where the message comes from.
    pub source: String,
    /// Where the message goes.
    pub destination: String,
    /// Broadcast group.
    pub group: String,
    /// Operation applied to the resource.
    pub operation: String,
    /// Resource operated on.
    pub resource: String,
}

// ============================================================================
// Fingerprint
// ============================================================================

/// Deduplication key of the outbound cache: `(resource, operation, source)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Router resource.
    pub resource: String,
    /// Router operation.
    pub operation: String,
    /// Router source.
    pub source: String,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.resource, self.operation, self.source)
    }
}

// ============================================================================
// Message
// ============================================================================

/// The unit of exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    /// Identity and correlation.
    pub header: MessageHeader,
    /// Routing labels.
    pub router: MessageRouter,
    /// Body.
    pub content: Content,
}

impl Message {
    /// Creates a message with a fresh UUID and the current timestamp.
    ///
    /// Pass an empty `parent_id` for requests and notifications.
    #[must_use]
    pub fn new(parent_id: impl Into<String>) -> Self {
        Self {
            header: MessageHeader {
                id: Uuid::new_v4().to_string(),
                parent_id: parent_id.into(),
                timestamp: next_timestamp(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Creates a message with an explicit ID and no timestamp.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            header: MessageHeader {
                id: id.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Builds a response to `request`.
    ///
    /// The response keeps the request's source, group, resource and type,
    /// and uses the `"response"` operation.
    #[must_use]
    pub fn new_response(request: &Message, content: impl Into<Content>) -> Self {
        Self::new(request.id())
            .set_route(request.source(), request.group())
            .set_resource_operation(request.resource(), RESPONSE_OPERATION)
            .set_type(request.message_type())
            .with_content(content)
    }

    /// Builds an error reply to `request`.
    #[must_use]
    pub fn new_error(request: &Message, error: impl Into<String>) -> Self {
        Self::new(request.id())
            .set_resource_operation(request.resource(), RESPONSE_ERROR_OPERATION)
            .with_content(error.into())
    }

    /// Copies this message under a fresh ID, keeping its timestamp.
    #[must_use]
    pub fn clone_with_new_id(&self) -> Self {
        let mut clone = self.clone();
        clone.header.id = Uuid::new_v4().to_string();
        clone
    }
}

// ============================================================================
// Message - Builders
// ============================================================================

impl Message {
    /// Sets source, group, resource and operation.
    #[inline]
    #[must_use]
    pub fn build_router(
        self,
        source: impl Into<String>,
        group: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        self.set_route(source, group)
            .set_resource_operation(resource, operation)
    }

    /// Sets source and group.
    #[inline]
    #[must_use]
    pub fn set_route(mut self, source: impl Into<String>, group: impl Into<String>) -> Self {
        self.router.source = source.into();
        self.router.group = group.into();
        self
    }

    /// Sets resource and operation.
    #[inline]
    #[must_use]
    pub fn set_resource_operation(
        mut self,
        resource: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        self.router.resource = resource.into();
        self.router.operation = operation.into();
        self
    }

    /// Sets the destination label.
    #[inline]
    #[must_use]
    pub fn set_destination(mut self, destination: impl Into<String>) -> Self {
        self.router.destination = destination.into();
        self
    }

    /// Sets the message context type.
    #[inline]
    #[must_use]
    pub fn set_type(mut self, message_type: impl Into<String>) -> Self {
        self.header.message_type = message_type.into();
        self
    }

    /// Sets the resource version.
    #[inline]
    #[must_use]
    pub fn set_resource_version(mut self, version: impl Into<String>) -> Self {
        self.header.resource_version = version.into();
        self
    }

    /// Sets the parent ID.
    #[inline]
    #[must_use]
    pub fn set_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.header.parent_id = parent_id.into();
        self
    }

    /// Sets the timestamp.
    #[inline]
    #[must_use]
    pub fn set_timestamp(mut self, timestamp: i64) -> Self {
        self.header.timestamp = timestamp;
        self
    }

    /// Replaces the content.
    #[inline]
    #[must_use]
    pub fn with_content(mut self, content: impl Into<Content>) -> Self {
        self.content = content.into();
        self
    }
}

// ============================================================================
// Message - Accessors
// ============================================================================

impl Message {
    /// Returns the message ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.header.id
    }

    /// Returns the parent ID.
    #[inline]
    #[must_use]
    pub fn parent_id(&self) -> &str {
        &self.header.parent_id
    }

    /// Returns `true` if this message answers another.
    #[inline]
    #[must_use]
    pub fn is_response(&self) -> bool {
        !self.header.parent_id.is_empty()
    }

    /// Returns the timestamp.
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    /// Returns `true` if sent through `send_sync`.
    #[inline]
    #[must_use]
    pub fn is_sync(&self) -> bool {
        self.header.sync
    }

    /// Returns the resource version.
    #[inline]
    #[must_use]
    pub fn resource_version(&self) -> &str {
        &self.header.resource_version
    }

    /// Returns the message context type.
    #[inline]
    #[must_use]
    pub fn message_type(&self) -> &str {
        &self.header.message_type
    }

    /// Returns the router source.
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.router.source
    }

    /// Returns the router destination.
    #[inline]
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.router.destination
    }

    /// Returns the router group.
    #[inline]
    #[must_use]
    pub fn group(&self) -> &str {
        &self.router.group
    }

    /// Returns the router resource.
    #[inline]
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.router.resource
    }

    /// Returns the router operation.
    #[inline]
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.router.operation
    }

    /// Returns the cache deduplication key.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            resource: self.router.resource.clone(),
            operation: self.router.operation.clone(),
            source: self.router.source.clone(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MessageID: {} ParentID: {} Group: {} Source: {} Destination: {} Resource: {} Operation: {}",
            self.id(),
            self.parent_id(),
            self.group(),
            self.source(),
            self.destination(),
            self.resource(),
            self.operation(),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
