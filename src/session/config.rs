//! Session configuration.
//!
//! One struct carries every knob the session consumes. It deserializes
//! from JSON (durations in milliseconds) and offers builder-style setters.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use edgelink::SessionConfig;
//!
//! let config = SessionConfig::new("cloudhub.example:10000")
//!     .with_reconnect_period(Duration::from_secs(2))
//!     .with_max_cache_entries(50);
//! config.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::DEFAULT_MAX_PAYLOAD_LEN;
use crate::transport::{ConnectionOptions, DEFAULT_BUFFER_SIZE};

// ============================================================================
// Constants
// ============================================================================

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_PERIOD: Duration = Duration::from_secs(5);

/// Default bound on establishing a connection.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default outbound cache capacity.
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 100;

/// Default application inbox capacity.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

// ============================================================================
// SessionConfig
// ============================================================================

/// Configuration consumed by a [`Session`](super::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Transport-specific peer address.
    pub dial_address: String,

    /// Delay between reconnect attempts.
    #[serde(rename = "reconnect_period_ms", with = "duration_ms")]
    pub reconnect_period: Duration,

    /// Bound on producing a connected stream.
    #[serde(rename = "handshake_timeout_ms", with = "duration_ms")]
    pub handshake_timeout: Duration,

    /// Read buffer size the connection returns to between large frames.
    pub buffer_size: usize,

    /// Outbound cache capacity; the oldest entry is evicted beyond it.
    pub max_cache_entries: usize,

    /// Largest payload accepted or sent.
    pub max_payload_len: u32,

    /// Application inbox capacity.
    pub inbox_capacity: usize,

    /// Period of keepalive pings, disabled when `None`.
    #[serde(rename = "keepalive_period_ms", with = "option_duration_ms")]
    pub keepalive_period: Option<Duration>,

    /// Silence tolerated on the read side before disconnecting.
    #[serde(rename = "read_timeout_ms", with = "option_duration_ms")]
    pub read_timeout: Option<Duration>,

    /// TLS material; all empty means plaintext.
    pub tls: TlsMaterial,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dial_address: String::new(),
            reconnect_period: DEFAULT_RECONNECT_PERIOD,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            keepalive_period: None,
            read_timeout: None,
            tls: TlsMaterial::default(),
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl SessionConfig {
    /// Creates a configuration with defaults and `dial_address`.
    #[inline]
    #[must_use]
    pub fn new(dial_address: impl Into<String>) -> Self {
        Self {
            dial_address: dial_address.into(),
            ..Default::default()
        }
    }

    /// Parses a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if parsing fails or [`Error::Config`] if the
    /// result does not validate.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl SessionConfig {
    /// Sets the reconnect period.
    #[inline]
    #[must_use]
    pub fn with_reconnect_period(mut self, period: Duration) -> Self {
        self.reconnect_period = period;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the read buffer size.
    #[inline]
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the outbound cache capacity.
    #[inline]
    #[must_use]
    pub fn with_max_cache_entries(mut self, entries: usize) -> Self {
        self.max_cache_entries = entries;
        self
    }

    /// Sets the payload cap.
    #[inline]
    #[must_use]
    pub fn with_max_payload_len(mut self, len: u32) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Sets the inbox capacity.
    #[inline]
    #[must_use]
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    /// Enables keepalive pings.
    #[inline]
    #[must_use]
    pub fn with_keepalive_period(mut self, period: Duration) -> Self {
        self.keepalive_period = Some(period);
        self
    }

    /// Enables the read-side silence timeout.
    #[inline]
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Sets TLS material.
    #[inline]
    #[must_use]
    pub fn with_tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = tls;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SessionConfig {
    /// Checks the configuration for values the session cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect_period.is_zero() {
            return Err(Error::config("reconnect_period must be non-zero"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::config("handshake_timeout must be non-zero"));
        }
        if self.buffer_size == 0 {
            return Err(Error::config("buffer_size must be non-zero"));
        }
        if self.max_cache_entries == 0 {
            return Err(Error::config("max_cache_entries must be non-zero"));
        }
        if self.max_payload_len == 0 {
            return Err(Error::config("max_payload_len must be non-zero"));
        }
        if self.inbox_capacity == 0 {
            return Err(Error::config("inbox_capacity must be non-zero"));
        }
        if self.keepalive_period.is_some_and(|p| p.is_zero()) {
            return Err(Error::config("keepalive_period must be non-zero"));
        }
        if self.read_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config("read_timeout must be non-zero"));
        }
        self.tls.validate()
    }

    /// Returns the connection tuning derived from this configuration.
    #[inline]
    #[must_use]
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            buffer_size: self.buffer_size,
            max_payload_len: self.max_payload_len,
        }
    }
}

// ============================================================================
// TlsMaterial
// ============================================================================

/// Where a PEM document comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PemSource {
    /// PEM text given inline.
    Inline(String),
    /// Path to a PEM file.
    Path(PathBuf),
}

impl PemSource {
    /// Resolves the PEM bytes, reading the file if needed.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - [`Error::Config`] if the content is not PEM
    pub async fn load(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::Inline(text) => text.clone().into_bytes(),
            Self::Path(path) => tokio::fs::read(path).await?,
        };

        if !bytes.windows(PEM_MARKER.len()).any(|w| w == PEM_MARKER) {
            return Err(Error::config("content is not PEM encoded"));
        }
        Ok(bytes)
    }
}

const PEM_MARKER: &[u8] = b"-----BEGIN ";

/// CA, certificate and key for an encrypted transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsMaterial {
    /// CA bundle used to verify the peer.
    pub ca: Option<PemSource>,
    /// Own certificate chain.
    pub cert: Option<PemSource>,
    /// Private key matching `cert`.
    pub key: Option<PemSource>,
}

/// TLS material with every source resolved to PEM bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedTls {
    /// CA bundle.
    pub ca: Option<Vec<u8>>,
    /// Certificate chain.
    pub cert: Option<Vec<u8>>,
    /// Private key.
    pub key: Option<Vec<u8>>,
}

impl TlsMaterial {
    /// Returns `true` when no material is configured.
    #[inline]
    #[must_use]
    pub fn is_plaintext(&self) -> bool {
        self.ca.is_none() && self.cert.is_none() && self.key.is_none()
    }

    /// Checks that `cert` and `key` come together.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if only one of them is set.
    pub fn validate(&self) -> Result<()> {
        if self.cert.is_some() != self.key.is_some() {
            return Err(Error::config("tls cert and key must be set together"));
        }
        Ok(())
    }

    /// Resolves all sources.
    ///
    /// # Errors
    ///
    /// See [`PemSource::load`] and [`validate`](Self::validate).
    pub async fn load(&self) -> Result<LoadedTls> {
        self.validate()?;

        async fn resolve(source: &Option<PemSource>) -> Result<Option<Vec<u8>>> {
            match source {
                Some(source) => Ok(Some(source.load().await?)),
                None => Ok(None),
            }
        }

        Ok(LoadedTls {
            ca: resolve(&self.ca).await?,
            cert: resolve(&self.cert).await?,
            key: resolve(&self.key).await?,
        })
    }
}

// ============================================================================
// Serde Helpers
// ============================================================================

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

// ============================================================================
// Tests
// ============================================================================
