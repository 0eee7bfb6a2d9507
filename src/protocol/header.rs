//! Package header and framing codec.
//!
//! Every frame on the wire is a fixed 10-byte header followed by
//! `payload_len` bytes of payload. All header fields are big-endian.
//!
//! # Format
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Version (`major<<24 \| minor<<16 \| fix<<8`) |
//! | 4 | 1 | Package type |
//! | 5 | 1 | Flags (zero) |
//! | 6 | 4 | Payload length |
//!
//! The header is validated before any payload memory is reserved, so a
//! peer declaring a huge payload costs nothing but the 10 header bytes.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Size of the package header in bytes.
pub const HEADER_LEN: usize = 10;

/// Default cap on payload length (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_LEN: u32 = 1 << 20;

// ============================================================================
// ProtocolVersion
// ============================================================================

/// Sender's protocol version carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
    /// Major version. A mismatch is logged as skew.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Fix version.
    pub fix: u8,
}

impl ProtocolVersion {
    /// Version spoken by this crate.
    pub const CURRENT: Self = Self::new(1, 0, 0);

    /// Creates a version.
    #[inline]
    #[must_use]
    pub const fn new(major: u8, minor: u8, fix: u8) -> Self {
        Self { major, minor, fix }
    }

    /// Packs into the 4-byte wire word. The low byte is always zero.
    #[inline]
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        ((self.major as u32) << 24) | ((self.minor as u32) << 16) | ((self.fix as u32) << 8)
    }

    /// Unpacks from the 4-byte wire word, ignoring the low byte.
    #[inline]
    #[must_use]
    pub const fn from_u32(raw: u32) -> Self {
        Self {
            major: (raw >> 24) as u8,
            minor: (raw >> 16) as u8,
            fix: (raw >> 8) as u8,
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.fix)
    }
}

// ============================================================================
// PackageType
// ============================================================================

/// Kind of payload a frame carries.
///
/// Only [`PackageType::Message`] is defined. Other values are preserved so
/// that readers can skip them without desynchronizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageType {
    /// An encoded [`Message`](crate::protocol::Message).
    Message,
    /// A type this version does not understand.
    Reserved(u8),
}

impl PackageType {
    /// Returns `true` for types this version can interpret.
    #[inline]
    #[must_use]
    pub const fn is_known(self) -> bool {
        matches!(self, Self::Message)
    }
}

impl From<u8> for PackageType {
    fn from(raw: u8) -> Self {
        match raw {
            1 => Self::Message,
            other => Self::Reserved(other),
        }
    }
}

impl From<PackageType> for u8 {
    fn from(kind: PackageType) -> Self {
        match kind {
            PackageType::Message => 1,
            PackageType::Reserved(raw) => raw,
        }
    }
}

// ============================================================================
// PackageHeader
// ============================================================================

/// The fixed 10-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    /// Sender's protocol version.
    pub version: ProtocolVersion,
    /// Payload kind.
    pub package_type: PackageType,
    /// Unused bit field; senders write zero.
    pub flags: u8,
    /// Payload bytes following the header.
    pub payload_len: u32,
}

impl PackageHeader {
    /// Creates a header for a message payload at the current version.
    #[inline]
    #[must_use]
    pub const fn message(payload_len: u32) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            package_type: PackageType::Message,
            flags: 0,
            payload_len,
        }
    }

    /// Serializes the header.
    #[must_use]
    pub fn pack(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut dst = &mut out[..];
        self.pack_into(&mut dst);
        out
    }

    /// Writes the header into `dst`.
    pub fn pack_into(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.version.to_u32());
        dst.put_u8(self.package_type.into());
        dst.put_u8(self.flags);
        dst.put_u32(self.payload_len);
    }

    /// Parses a header from the first [`HEADER_LEN`] bytes of `src`.
    ///
    /// # Errors
    ///
    /// - [`Error::ShortHeader`] if `src` holds fewer than 10 bytes
    /// - [`Error::OversizedFrame`] if `payload_len` exceeds `max_payload_len`
    pub fn unpack(src: &[u8], max_payload_len: u32) -> Result<Self> {
        if src.len() < HEADER_LEN {
            return Err(Error::short_header(src.len(), HEADER_LEN));
        }

        let mut buf = &src[..HEADER_LEN];
        let version = ProtocolVersion::from_u32(buf.get_u32());
        let package_type = PackageType::from(buf.get_u8());
        let flags = buf.get_u8();
        let payload_len = buf.get_u32();

        if payload_len > max_payload_len {
            return Err(Error::oversized_frame(payload_len.into(), max_payload_len));
        }

        Ok(Self {
            version,
            package_type,
            flags,
            payload_len,
        })
    }
}

// ============================================================================
// Frame
// ============================================================================

/// One header plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: PackageHeader,
    /// Payload bytes, exactly `header.payload_len` long.
    pub payload: Bytes,
}

// ============================================================================
// PackageCodec
// ============================================================================

/// `tokio_util` codec for header-prefixed frames.
#[derive(Debug, Clone, Copy)]
pub struct PackageCodec {
    max_payload_len: u32,
}

impl PackageCodec {
    /// Creates a codec refusing payloads above `max_payload_len`.
    #[inline]
    #[must_use]
    pub const fn new(max_payload_len: u32) -> Self {
        Self { max_payload_len }
    }

    /// Returns the payload cap.
    #[inline]
    #[must_use]
    pub const fn max_payload_len(&self) -> u32 {
        self.max_payload_len
    }
}

impl Default for PackageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_LEN)
    }
}

impl Decoder for PackageCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = PackageHeader::unpack(src, self.max_payload_len)?;
        let payload_len = header.payload_len as usize;
        let frame_len = HEADER_LEN + payload_len;

        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(payload_len).freeze();

        Ok(Some(Frame { header, payload }))
    }
}

impl Encoder<Bytes> for PackageCodec {
    type Error = Error;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        let len = payload.len();
        let payload_len = u32::try_from(len)
            .ok()
            .filter(|&len| len <= self.max_payload_len)
            .ok_or_else(|| Error::oversized_frame(len as u64, self.max_payload_len))?;

        dst.reserve(HEADER_LEN + len);
        PackageHeader::message(payload_len).pack_into(dst);
        dst.put(payload);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
