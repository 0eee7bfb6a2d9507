//! Transport session.
//!
//! A [`Session`] binds one [`Transport`] to the keeper, the outbound cache
//! and the application inbox, and keeps the connection alive.
//!
//! # Tasks
//!
//! | Task | Lifetime | Role |
//! |------|----------|------|
//! | supervisor | session | dial, drain cache, await disconnect, back off |
//! | read loop | one connected span | frame, decode, route to keeper or inbox |
//! | keepalive | one connected span | periodic ping, optional |
//!
//! Every task is spawned through a wrapper that catches and logs panics.
//!
//! # Send Path
//!
//! ```text
//! send(msg) ─► encode ─► cache enabled or no live connection? ─► park in cache
//!                                   │
//!                                   └─► write ─► IO error ─► detach, park in cache
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{Message, ProtocolVersion, translator};
use crate::transport::{Connection, Transport};

use super::builder::SessionBuilder;
use super::cache::OutboundCache;
use super::config::SessionConfig;
use super::keeper::{Slot, SyncKeeper};
use super::state::{SessionState, StateHandler};

// ============================================================================
// Constants
// ============================================================================

/// Router source of keepalive pings.
pub const KEEPALIVE_SOURCE: &str = "edgelink";

/// Router group of keepalive pings.
pub const KEEPALIVE_GROUP: &str = "resource";

/// Router resource of keepalive pings.
pub const KEEPALIVE_RESOURCE: &str = "node";

/// Router operation of keepalive pings.
pub const KEEPALIVE_OPERATION: &str = "keepalive";

/// Content of keepalive pings.
const KEEPALIVE_CONTENT: &str = "ping";

// ============================================================================
// Session
// ============================================================================

/// Handle to a running session. Cheap to clone.
///
/// Dropping the last handle without calling [`close`](Self::close) stops
/// the background tasks; pending cached messages are lost.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
    _guard: Arc<DropGuard>,
}

/// State shared by the handles and the background tasks.
struct SessionInner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    keeper: SyncKeeper,
    cache: OutboundCache,
    /// Current connection, `None` while disconnected.
    connection: RwLock<Option<Arc<Connection>>>,
    state_tx: watch::Sender<SessionState>,
    state_handler: Option<StateHandler>,
    inbox_tx: mpsc::Sender<Message>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.inner.transport.peer())
            .field("state", &self.state())
            .field("pending_sync", &self.pending_sync())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Construction
// ============================================================================

impl Session {
    /// Creates a builder for a session using `config`.
    #[inline]
    #[must_use]
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// Spawns the supervisor and returns the handle plus the inbox.
    pub(crate) fn launch(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        state_handler: Option<StateHandler>,
    ) -> Result<(Self, Inbox)> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::config("session must be started inside a Tokio runtime"));
        }

        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity);
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let shutdown = CancellationToken::new();

        let cache = OutboundCache::new(config.max_cache_entries);
        // Nothing is connected yet, so early sends park.
        cache.set_enabled(true);

        let inner = Arc::new(SessionInner {
            transport,
            keeper: SyncKeeper::new(),
            cache,
            connection: RwLock::new(None),
            state_tx,
            state_handler,
            inbox_tx,
            shutdown: shutdown.clone(),
            closed: AtomicBool::new(false),
            supervisor: Mutex::new(None),
            config,
        });

        info!(peer = %inner.transport.peer(), "Session starting");

        let handle = spawn_logged("supervisor", Arc::clone(&inner).supervise());
        *inner.supervisor.lock() = Some(handle);

        let inbox = Inbox {
            rx: inbox_rx,
            shutdown: shutdown.clone(),
        };
        let session = Self {
            inner,
            _guard: Arc::new(shutdown.drop_guard()),
        };

        Ok((session, inbox))
    }
}

// ============================================================================
// Session - Public API
// ============================================================================

impl Session {
    /// Sends `msg` to the peer.
    ///
    /// While disconnected, or when the write fails with a connection error,
    /// the message is parked in the outbound cache and the call still
    /// succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if the session is or becomes closed before delivery
    /// - [`Error::InvalidMessage`] if the message cannot be encoded
    /// - [`Error::OversizedFrame`] if the encoding exceeds `max_payload_len`
    pub async fn send(&self, msg: Message) -> Result<()> {
        self.inner.send(msg).await
    }

    /// Sends `msg` and waits up to `timeout` for the response whose parent
    /// ID equals `msg`'s ID.
    ///
    /// Dropping the returned future releases the keeper slot.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no response arrived in time
    /// - [`Error::Closed`] if the session is or becomes closed
    /// - [`Error::DuplicateId`] if a call for the same ID is in flight
    /// - any error of [`send`](Self::send)
    pub async fn send_sync(&self, mut msg: Message, timeout: Duration) -> Result<Message> {
        if self.inner.is_closed() {
            return Err(Error::Closed);
        }

        msg.header.sync = true;
        let id = msg.id().to_string();
        let mut slot = SlotGuard::new(&self.inner.keeper, &id)?;

        self.inner.send(msg).await?;

        match tokio::time::timeout(timeout, slot.recv()).await {
            Ok(Some(response)) => {
                trace!(%id, "Sync response received");
                Ok(response)
            }
            Ok(None) => Err(Error::Closed),
            Err(_) => {
                debug!(%id, timeout_ms = timeout.as_millis() as u64, "Sync request timed out");
                Err(Error::timeout(id, timeout.as_millis() as u64))
            }
        }
    }

    /// Closes the session. Idempotent.
    ///
    /// Pending [`send_sync`](Self::send_sync) calls fail with
    /// [`Error::Closed`], the connection is shut down, the background
    /// tasks stop and undelivered cached messages are dropped.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` leaves room for transports that
    /// report shutdown failures.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        info!(peer = %inner.transport.peer(), "Closing session");

        inner.shutdown.cancel();
        inner.set_state(SessionState::Closed);

        let woken = inner.keeper.close_all();
        if woken > 0 {
            debug!(woken, "Woke pending sync callers");
        }

        let connection = inner.connection.write().take();
        if let Some(connection) = connection {
            connection.close().await;
        }

        let supervisor = inner.supervisor.lock().take();
        if let Some(handle) = supervisor {
            let _ = handle.await;
        }

        let dropped = inner.cache.clear().await;
        if dropped > 0 {
            warn!(dropped, "Discarding undelivered cached messages");
        }

        Ok(())
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Returns a receiver observing every state change.
    #[inline]
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Waits until the session reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the session closes first.
    pub async fn wait_for_state(&self, target: SessionState) -> Result<()> {
        let mut rx = self.inner.state_tx.subscribe();
        let reached = *rx
            .wait_for(|s| *s == target || s.is_closed())
            .await
            .map_err(|_| Error::Closed)?;

        if reached == target {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    /// Returns `true` if a `send_sync` call waits for `id`.
    #[inline]
    #[must_use]
    pub fn is_waiting(&self, id: &str) -> bool {
        self.inner.keeper.is_waiting(id)
    }

    /// Returns the number of in-flight `send_sync` calls.
    #[inline]
    #[must_use]
    pub fn pending_sync(&self) -> usize {
        self.inner.keeper.len()
    }

    /// Returns the number of messages parked in the outbound cache.
    pub async fn cached_len(&self) -> usize {
        self.inner.cache.len().await
    }

    /// Returns the response keeper.
    #[inline]
    #[must_use]
    pub fn keeper(&self) -> &SyncKeeper {
        &self.inner.keeper
    }

    /// Returns the configuration the session runs with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

// ============================================================================
// SessionInner - Send Path
// ============================================================================

impl SessionInner {
    #[inline]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn send(&self, msg: Message) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        // Encoding failures surface here and never reach the cache.
        let payload = translator::encode(&msg)?;
        if payload.len() > self.config.max_payload_len as usize {
            return Err(Error::oversized_frame(
                payload.len() as u64,
                self.config.max_payload_len,
            ));
        }

        let mut msg = msg;
        loop {
            if self.is_closed() {
                return Err(Error::Closed);
            }

            let Some((pending, connection)) = self
                .cache
                .save_or_route(msg, || self.live_connection())
                .await
            else {
                // Parked; a concurrent close discards the cache.
                return if self.is_closed() {
                    Err(Error::Closed)
                } else {
                    Ok(())
                };
            };

            match connection.write(payload.clone()).await {
                Ok(()) => {
                    trace!(id = %pending.id(), "Message sent");
                    return Ok(());
                }
                Err(e) if self.is_closed() => {
                    debug!(id = %pending.id(), error = %e, "Write aborted by close");
                    return Err(Error::Closed);
                }
                Err(e) if e.is_connection_error() => {
                    warn!(
                        id = %pending.id(),
                        peer = %connection.peer(),
                        error = %e,
                        "Write failed, caching message"
                    );
                    self.detach(&connection);
                    connection.close().await;
                    msg = pending;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns the current connection unless it is already closed.
    fn live_connection(&self) -> Option<Arc<Connection>> {
        self.connection
            .read()
            .as_ref()
            .filter(|c| !c.is_closed())
            .cloned()
    }

    /// Clears the connection slot if it still holds `connection`, opening
    /// the cache gate first.
    fn detach(&self, connection: &Arc<Connection>) {
        let mut slot = self.connection.write();
        if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, connection)) {
            self.cache.set_enabled(true);
            *slot = None;
        }
    }

    async fn teardown(&self, connection: &Arc<Connection>) {
        self.detach(connection);
        connection.close().await;
    }
}

// ============================================================================
// SessionInner - State
// ============================================================================

impl SessionInner {
    /// Publishes `next`. `Closed` is never left.
    fn set_state(&self, next: SessionState) {
        let mut previous = None;
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next || state.is_closed() {
                return false;
            }
            previous = Some(*state);
            *state = next;
            true
        });

        if !changed {
            return;
        }

        match next {
            SessionState::Connected | SessionState::Closed => {
                info!(from = ?previous, to = %next, "Session state changed");
            }
            _ => debug!(from = ?previous, to = %next, "Session state changed"),
        }

        if let Some(handler) = &self.state_handler
            && let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(next)))
        {
            error!(
                state = %next,
                panic = %panic_message(&*panic),
                "State handler panicked"
            );
        }
    }
}

// ============================================================================
// SessionInner - Supervisor
// ============================================================================

impl SessionInner {
    /// Dials, runs each connected span, and backs off between attempts
    /// until shutdown.
    async fn supervise(self: Arc<Self>) {
        let period = self.config.reconnect_period;
        let peer = self.transport.peer();

        loop {
            self.set_state(SessionState::Dialing);

            let dialed = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                dialed = timeout(self.config.handshake_timeout, self.transport.connect()) => dialed,
            };

            match dialed {
                Ok(Ok(stream)) => {
                    let connection = Arc::new(Connection::new(
                        stream,
                        self.config.connection_options(),
                        peer.clone(),
                    ));
                    Arc::clone(&self).run_connection(connection).await;
                }
                Ok(Err(e)) => {
                    warn!(%peer, error = %e, retry_in_ms = period.as_millis() as u64, "Dial failed");
                }
                Err(_) => {
                    warn!(
                        %peer,
                        timeout_ms = self.config.handshake_timeout.as_millis() as u64,
                        "Dial timed out"
                    );
                }
            }

            if self.shutdown.is_cancelled() {
                break;
            }
            self.set_state(SessionState::Disconnected);

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = sleep(period) => {}
            }
        }

        debug!(%peer, "Supervisor stopped");
    }

    /// Runs one connected span: drain, serve, tear down.
    async fn run_connection(self: Arc<Self>, connection: Arc<Connection>) {
        *self.connection.write() = Some(Arc::clone(&connection));

        if self.shutdown.is_cancelled() {
            self.teardown(&connection).await;
            return;
        }

        if self.cache.enabled() {
            if !self.cache.is_empty().await {
                self.set_state(SessionState::Draining);
            }

            let sink = Arc::clone(&connection);
            let drained = self
                .cache
                .drain_and_disable(|msg| {
                    let connection = Arc::clone(&sink);
                    async move { connection.write(translator::encode(&msg)?).await }
                })
                .await;

            if let Err(e) = drained {
                warn!(peer = %connection.peer(), error = %e, "Drain failed, reconnecting");
                self.teardown(&connection).await;
                return;
            }
        }

        self.set_state(SessionState::Connected);

        let reader = spawn_logged(
            "read loop",
            Arc::clone(&self).read_loop(Arc::clone(&connection)),
        );
        let keepalive = self
            .config
            .keepalive_period
            .map(|period| spawn_logged("keepalive", keepalive(Arc::clone(&connection), period)));

        tokio::select! {
            _ = reader => {}
            () = self.shutdown.cancelled() => {}
        }

        if let Some(keepalive) = keepalive {
            keepalive.abort();
        }
        self.teardown(&connection).await;
    }
}

// ============================================================================
// SessionInner - Read Loop
// ============================================================================

impl SessionInner {
    /// Reads frames until the connection fails, routing each message.
    async fn read_loop(self: Arc<Self>, connection: Arc<Connection>) {
        let mut skew_logged = false;

        loop {
            if let Some(read_timeout) = self.config.read_timeout {
                connection.set_read_deadline(Some(Instant::now() + read_timeout));
            }

            let frame = match connection.read_frame().await {
                Ok(frame) => frame,
                Err(Error::Closed) => {
                    debug!(peer = %connection.peer(), "Connection closed");
                    break;
                }
                Err(e) => {
                    warn!(peer = %connection.peer(), error = %e, "Read failed, disconnecting");
                    break;
                }
            };

            let header = frame.header;
            if !skew_logged && header.version.major != ProtocolVersion::CURRENT.major {
                warn!(
                    local = %ProtocolVersion::CURRENT,
                    remote = %header.version,
                    "Peer protocol version differs"
                );
                skew_logged = true;
            }
            if header.flags != 0 {
                debug!(flags = header.flags, "Ignoring non-zero header flags");
            }

            let msg = match translator::decode(frame.payload) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(peer = %connection.peer(), error = %e, "Dropping malformed message");
                    continue;
                }
            };

            if !self.dispatch(msg).await {
                break;
            }
        }

        connection.close().await;
    }

    /// Routes one inbound message. Returns `false` on shutdown.
    async fn dispatch(&self, msg: Message) -> bool {
        if is_keepalive(&msg) {
            trace!(id = %msg.id(), "Keepalive received");
            return true;
        }

        if msg.is_response() && self.keeper.is_waiting(msg.parent_id()) {
            if let Err(e) = self.keeper.deliver_response(msg) {
                warn!(error = %e, "Response dropped");
            }
            return true;
        }

        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => false,
            sent = self.inbox_tx.send(msg) => {
                if let Err(e) = sent {
                    trace!(id = %e.0.id(), "Inbox dropped, discarding message");
                }
                true
            }
        }
    }
}

// ============================================================================
// Keepalive
// ============================================================================

/// Builds a keepalive ping.
#[must_use]
pub fn keepalive_message() -> Message {
    Message::new("")
        .build_router(
            KEEPALIVE_SOURCE,
            KEEPALIVE_GROUP,
            KEEPALIVE_RESOURCE,
            KEEPALIVE_OPERATION,
        )
        .with_content(KEEPALIVE_CONTENT)
}

fn is_keepalive(msg: &Message) -> bool {
    msg.source() == KEEPALIVE_SOURCE
        && msg.group() == KEEPALIVE_GROUP
        && msg.resource() == KEEPALIVE_RESOURCE
        && msg.operation() == KEEPALIVE_OPERATION
}

/// Writes a ping every `period`; closes the connection on failure.
async fn keepalive(connection: Arc<Connection>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if let Err(e) = connection.write_message(&keepalive_message()).await {
            if !e.is_closed() {
                warn!(peer = %connection.peer(), error = %e, "Keepalive failed, disconnecting");
            }
            connection.close().await;
            break;
        }
        trace!(peer = %connection.peer(), "Keepalive sent");
    }
}

// ============================================================================
// Inbox
// ============================================================================

/// Receiver of messages that did not answer a `send_sync` call.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<Message>,
    shutdown: CancellationToken,
}

impl Inbox {
    /// Waits for the next message.
    ///
    /// After the session closes, already queued messages are still
    /// returned; then `None`.
    pub async fn recv(&mut self) -> Option<Message> {
        tokio::select! {
            biased;
            msg = self.rx.recv() => msg,
            () = self.shutdown.cancelled() => self.rx.try_recv().ok(),
        }
    }

    /// Returns a queued message without waiting.
    #[inline]
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

// ============================================================================
// SlotGuard
// ============================================================================

/// Removes its keeper slot when dropped, whatever the outcome.
struct SlotGuard<'a> {
    keeper: &'a SyncKeeper,
    slot: Slot,
}

impl<'a> SlotGuard<'a> {
    fn new(keeper: &'a SyncKeeper, id: &str) -> Result<Self> {
        Ok(Self {
            keeper,
            slot: keeper.add_slot(id)?,
        })
    }

    async fn recv(&mut self) -> Option<Message> {
        self.slot.recv().await
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.keeper.remove_slot(self.slot.id());
    }
}

// ============================================================================
// Task Spawning
// ============================================================================

/// Spawns `task`, logging instead of propagating a panic.
fn spawn_logged<F>(name: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            error!(task = name, panic = %panic_message(&*panic), "Task panicked");
        }
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

// ============================================================================
// Tests
// ============================================================================
