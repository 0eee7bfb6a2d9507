//! In-memory loopback transport.
//!
//! [`channel`] returns a connector/listener pair joined by a backlog of
//! pending accepts. Dialing succeeds only while a listener is waiting in
//! `connect`, mirroring a refused TCP dial otherwise. Each successful dial
//! yields the two ends of a [`tokio::io::duplex`] pipe; dropping either end
//! breaks the pipe for the other.
//!
//! Both halves are cheap to clone, so a "restarted" hub can keep accepting
//! on the same backlog.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{DuplexStream, duplex};
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{Error, Result};

use super::stream::{BoxedStream, Transport};

// ============================================================================
// Types
// ============================================================================

/// Listeners currently waiting for a dial.
type Backlog = Mutex<VecDeque<oneshot::Sender<DuplexStream>>>;

// ============================================================================
// channel
// ============================================================================

/// Creates a connected connector/listener pair.
///
/// `buffer_size` bounds each direction of every pipe.
#[must_use]
pub fn channel(buffer_size: usize) -> (MemoryConnector, MemoryListener) {
    let backlog: Arc<Backlog> = Arc::new(Mutex::new(VecDeque::new()));

    (
        MemoryConnector {
            backlog: Arc::clone(&backlog),
            buffer_size,
        },
        MemoryListener { backlog },
    )
}

// ============================================================================
// MemoryConnector
// ============================================================================

/// Dialing side of an in-memory pair.
#[derive(Clone)]
pub struct MemoryConnector {
    backlog: Arc<Backlog>,
    buffer_size: usize,
}

#[async_trait]
impl Transport for MemoryConnector {
    async fn connect(&self) -> Result<BoxedStream> {
        loop {
            let Some(acceptor) = self.backlog.lock().pop_front() else {
                return Err(Error::transport("connection refused: no listener waiting"));
            };

            let (client, server) = duplex(self.buffer_size);
            // A listener that gave up leaves a dead sender behind; try the next one.
            if acceptor.send(server).is_ok() {
                trace!("In-memory connection established");
                return Ok(Box::new(client));
            }
        }
    }

    fn peer(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// MemoryListener
// ============================================================================

/// Accepting side of an in-memory pair.
#[derive(Clone)]
pub struct MemoryListener {
    backlog: Arc<Backlog>,
}

impl MemoryListener {
    /// Returns the number of listeners waiting for a dial.
    #[inline]
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.backlog
            .lock()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

#[async_trait]
impl Transport for MemoryListener {
    async fn connect(&self) -> Result<BoxedStream> {
        let (tx, rx) = oneshot::channel();
        self.backlog.lock().push_back(tx);

        let stream = rx
            .await
            .map_err(|_| Error::transport("in-memory connector dropped"))?;
        Ok(Box::new(stream))
    }

    fn peer(&self) -> String {
        "memory listener".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
