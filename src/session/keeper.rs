//! Response correlation for synchronous requests.
//!
//! A [`SyncKeeper`] maps request IDs to one-message slots. The read loop
//! delivers responses by parent ID without ever blocking; the caller that
//! registered the slot awaits it with its own deadline.
//!
//! # Slot Lifecycle
//!
//! ```text
//! add_slot(id) ──► Created ──┬── deliver_response ──► Delivered
//!                            └── deadline elapses ──► Timeout
//! ```
//!
//! Either terminal transition is followed by exactly one `remove_slot`,
//! performed by the waiting caller.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::Message;

// ============================================================================
// Types
// ============================================================================

/// Map of request IDs to response senders.
type SlotMap = FxHashMap<String, mpsc::Sender<Message>>;

// ============================================================================
// Slot
// ============================================================================

/// Receiving end of one outstanding request.
#[derive(Debug)]
pub struct Slot {
    id: String,
    rx: mpsc::Receiver<Message>,
}

impl Slot {
    /// Returns the request ID this slot waits for.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the response.
    ///
    /// Returns `None` if the slot was removed or the keeper closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

// ============================================================================
// SyncKeeper
// ============================================================================

/// Table of outstanding synchronous requests.
#[derive(Debug, Default)]
pub struct SyncKeeper {
    slots: RwLock<SlotMap>,
    closed: AtomicBool,
}

impl SyncKeeper {
    /// Creates an empty keeper.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` and returns its slot.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateId`] if `id` is already registered
    /// - [`Error::Closed`] after [`close_all`](Self::close_all)
    pub fn add_slot(&self, id: &str) -> Result<Slot> {
        let mut slots = self.slots.write();

        // Checked under the write lock so close_all cannot race a late insert.
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        if slots.contains_key(id) {
            return Err(Error::duplicate_id(id));
        }

        let (tx, rx) = mpsc::channel(1);
        slots.insert(id.to_string(), tx);

        trace!(id, "Sync slot added");
        Ok(Slot {
            id: id.to_string(),
            rx,
        })
    }

    /// Hands `msg` to the caller waiting on `msg.parent_id()`.
    ///
    /// Never blocks.
    ///
    /// # Errors
    ///
    /// - [`Error::NoWaiter`] if nobody waits for the parent ID
    /// - [`Error::SlotFull`] if the slot already holds a response
    pub fn deliver_response(&self, msg: Message) -> Result<()> {
        let slots = self.slots.read();
        let parent_id = msg.parent_id();

        let Some(tx) = slots.get(parent_id) else {
            return Err(Error::no_waiter(parent_id));
        };

        match tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => Err(Error::slot_full(msg.parent_id())),
            Err(TrySendError::Closed(msg)) => Err(Error::no_waiter(msg.parent_id())),
        }
    }

    /// Removes `id`. Returns `true` if it was registered.
    pub fn remove_slot(&self, id: &str) -> bool {
        let removed = self.slots.write().remove(id).is_some();
        if removed {
            trace!(id, "Sync slot removed");
        }
        removed
    }

    /// Returns `true` if a caller waits for `id`.
    #[inline]
    #[must_use]
    pub fn is_waiting(&self, id: &str) -> bool {
        self.slots.read().contains_key(id)
    }

    /// Returns the number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Returns `true` if no request is outstanding.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Wakes every waiter with `None` and refuses new slots.
    ///
    /// Returns the number of waiters woken.
    pub fn close_all(&self) -> usize {
        let mut slots = self.slots.write();
        self.closed.store(true, Ordering::Release);

        let count = slots.len();
        slots.clear();
        count
    }
}

// ============================================================================
// Tests
// ============================================================================
