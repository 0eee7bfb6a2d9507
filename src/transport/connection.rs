//! Framed connection wrapper.
//!
//! Binds a duplex byte stream to a frame reader and a frame writer.
//!
//! # Locking
//!
//! The read half and the write half sit behind separate async mutexes:
//!
//! - One reader at a time; a pending read never blocks writers
//! - Concurrent writers are serialized, each frame is written whole
//! - [`Connection::close`] wakes a pending read or write and drops the stream

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{ReadHalf, WriteHalf, split};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{DEFAULT_MAX_PAYLOAD_LEN, Frame, Message, PackageCodec, translator};

use super::stream::BoxedStream;

// ============================================================================
// Constants
// ============================================================================

/// Default read buffer size (16 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Time allowed to flush and shut down the write half on close.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

type FrameReader = FramedRead<ReadHalf<BoxedStream>, PackageCodec>;
type FrameWriter = FramedWrite<WriteHalf<BoxedStream>, PackageCodec>;

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Tuning for a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Read buffer size. The buffer grows to hold a larger frame and is
    /// shrunk back to this size once the frame has been consumed.
    pub buffer_size: usize,
    /// Largest payload accepted or sent.
    pub max_payload_len: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A framed, duplex connection to the peer.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`; share it behind an `Arc`.
pub struct Connection {
    /// Frame reader, `None` once closed.
    reader: AsyncMutex<Option<FrameReader>>,
    /// Frame writer, `None` once closed.
    writer: AsyncMutex<Option<FrameWriter>>,
    /// Absolute deadline applied to reads.
    read_deadline: Mutex<Option<Instant>>,
    /// Set by the first `close`.
    closed: AtomicBool,
    /// Wakes pending reads and writes on close.
    shutdown: CancellationToken,
    /// Capacity the idle read buffer is held to.
    buffer_size: usize,
    /// Peer label for logs.
    peer: String,
}

impl Connection {
    /// Wraps `stream`.
    #[must_use]
    pub fn new(stream: BoxedStream, options: ConnectionOptions, peer: impl Into<String>) -> Self {
        let (read_half, write_half) = split(stream);
        let codec = PackageCodec::new(options.max_payload_len);

        Self {
            reader: AsyncMutex::new(Some(FramedRead::with_capacity(
                read_half,
                codec,
                options.buffer_size,
            ))),
            writer: AsyncMutex::new(Some(FramedWrite::new(write_half, codec))),
            read_deadline: Mutex::new(None),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            buffer_size: options.buffer_size,
            peer: peer.into(),
        }
    }

    /// Returns the peer label.
    #[inline]
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Arms an absolute deadline for subsequent reads. `None` disarms it.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        *self.read_deadline.lock() = deadline;
    }
}

// ============================================================================
// Connection - Read
// ============================================================================

impl Connection {
    /// Reads the next frame of a known package type.
    ///
    /// Frames of unknown type are consumed and discarded.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] on clean end-of-stream or after close
    /// - [`Error::Io`] on read failure or deadline expiry
    /// - [`Error::ShortHeader`] / [`Error::OversizedFrame`] on protocol violation
    pub async fn read_frame(&self) -> Result<Frame> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(Error::Closed)?;

        loop {
            let deadline = *self.read_deadline.lock();

            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(Error::Closed),
                next = Self::next_frame(reader, deadline) => next?,
            };

            match next {
                Some(frame) if frame.header.package_type.is_known() => {
                    trace!(len = frame.payload.len(), "Frame received");
                    self.shrink_read_buffer(reader);
                    return Ok(frame);
                }
                Some(frame) => {
                    self.shrink_read_buffer(reader);
                    warn!(
                        peer = %self.peer,
                        package_type = u8::from(frame.header.package_type),
                        len = frame.payload.len(),
                        "Discarding frame of unknown package type"
                    );
                }
                None => {
                    debug!(peer = %self.peer, "Stream ended");
                    return Err(Error::Closed);
                }
            }
        }
    }

    /// Reads one full payload.
    ///
    /// # Errors
    ///
    /// See [`read_frame`](Self::read_frame).
    pub async fn read(&self) -> Result<Bytes> {
        Ok(self.read_frame().await?.payload)
    }

    /// Reads and decodes one message.
    ///
    /// # Errors
    ///
    /// See [`read_frame`](Self::read_frame); additionally
    /// [`Error::Malformed`] if the payload does not decode.
    pub async fn read_message(&self) -> Result<Message> {
        translator::decode(self.read().await?)
    }

    /// Reads one payload and parses it as JSON.
    ///
    /// # Errors
    ///
    /// See [`read_frame`](Self::read_frame); additionally [`Error::Json`].
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T> {
        let payload = self.read().await?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Drops an oversized buffer left behind by a large frame.
    fn shrink_read_buffer(&self, reader: &mut FrameReader) {
        let buffer = reader.read_buffer_mut();
        if buffer.is_empty() && buffer.capacity() > self.buffer_size {
            trace!(
                capacity = buffer.capacity(),
                limit = self.buffer_size,
                "Shrinking read buffer"
            );
            *buffer = BytesMut::with_capacity(self.buffer_size);
        }
    }

    async fn next_frame(reader: &mut FrameReader, deadline: Option<Instant>) -> Result<Option<Frame>> {
        let next = match deadline {
            Some(at) => timeout_at(at, reader.next())
                .await
                .map_err(|_| IoError::new(ErrorKind::TimedOut, "read deadline exceeded"))?,
            None => reader.next().await,
        };
        next.transpose()
    }
}

// ============================================================================
// Connection - Write
// ============================================================================

impl Connection {
    /// Writes `payload` as one frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] after close
    /// - [`Error::OversizedFrame`] if the payload exceeds the cap (nothing is written)
    /// - [`Error::Io`] on write failure; the connection is then unusable
    pub async fn write(&self, payload: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::Closed)?;

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(Error::Closed),
            result = writer.send(payload) => result,
        }
    }

    /// Encodes and writes one message.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write); additionally encoding errors.
    pub async fn write_message(&self, msg: &Message) -> Result<()> {
        self.write(translator::encode(msg)?).await
    }

    /// Serializes `value` as JSON and writes it as one frame.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write); additionally [`Error::Json`].
    pub async fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.write(Bytes::from(payload)).await
    }
}

// ============================================================================
// Connection - Close
// ============================================================================

impl Connection {
    /// Closes the connection. Idempotent.
    ///
    /// Pending reads and writes fail with [`Error::Closed`]; the underlying
    /// stream is dropped so the peer observes end-of-stream.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();

        if let Some(mut writer) = self.writer.lock().await.take()
            && timeout(CLOSE_FLUSH_TIMEOUT, writer.close()).await.is_err()
        {
            debug!(peer = %self.peer, "Timed out shutting down write half");
        }
        self.reader.lock().await.take();

        debug!(peer = %self.peer, "Connection closed");
    }
}

// ============================================================================
// Tests
// ============================================================================
