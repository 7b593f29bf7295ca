//! VICI client session
//!
//! A [`Session`] multiplexes three kinds of traffic over two connections to
//! the same daemon socket:
//!
//! ```text
//! caller ──> Session ──> command channel ──> transport #1 ──> daemon
//!                                                               │
//! consumer <── event queue <── reader loop <── transport #2 <───┘
//! ```
//!
//! Commands (including streamed commands) are serialized on the first
//! transport behind a fair mutex; asynchronous event notifications arrive
//! independently on the second, so a long-running streamed command never
//! stalls event delivery.
//!
//! The first fatal error (transport or protocol) is latched: every
//! subsequent call fails with the same error until the session is dropped.
//! Closing the session latches [`Error::SessionClosed`], fails out all
//! pending operations, and shuts down both transports; there are no
//! per-call timeouts, so a caller wanting deadlines closes the session on
//! expiry.

mod command;
mod listener;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::net::UnixStream;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::transport::Transport;

use command::CommandChannel;
use listener::EventListener;

/// Default path of the charon daemon's VICI socket
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/charon.vici";

/// An asynchronous event notification from the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Name the event was registered under
    pub name: String,

    /// Event payload
    pub message: Message,
}

/// Options for establishing a [`Session`]
///
/// # Example
///
/// ```no_run
/// use rust_vici::{Session, SessionConfig};
///
/// # async fn example() -> Result<(), rust_vici::Error> {
/// let config = SessionConfig::new("/var/run/charon.vici").with_event_buffer(1024);
/// let session = Session::with_config(config).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    socket_path: PathBuf,
    event_buffer: Option<usize>,
}

impl SessionConfig {
    /// Create a configuration for the given socket path
    #[must_use]
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            event_buffer: None,
        }
    }

    /// Bound the event buffer to `capacity` events
    ///
    /// On overflow the oldest unread events are dropped and the consumer
    /// sees an [`Error::LostEvents`] marker in their place. The buffer is
    /// unbounded when no capacity is set.
    #[must_use]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = Some(capacity.max(1));
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

/// Holds the first fatal error for replay on every subsequent call
#[derive(Debug)]
pub(crate) struct Latch {
    slot: OnceLock<Error>,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }

    pub(crate) fn set(&self, err: &Error) {
        let _ = self.slot.set(err.clone());
    }

    pub(crate) fn fault(&self) -> Option<Error> {
        self.slot.get().cloned()
    }
}

/// A client session with the VICI daemon
#[derive(Debug)]
pub struct Session {
    command: CommandChannel<UnixStream>,
    listener: EventListener,
    latch: Arc<Latch>,
    shutdown_tx: broadcast::Sender<()>,
    closed: AtomicBool,
}

impl Session {
    /// Connect to the daemon socket at `socket_path`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if either of the two connections cannot
    /// be established; a connection that did open is released before the
    /// error propagates.
    pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(SessionConfig::new(socket_path)).await
    }

    /// Connect with explicit options
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn with_config(config: SessionConfig) -> Result<Self> {
        let command = Transport::connect(&config.socket_path).await?;
        // If this second connect fails, the command transport drops here
        // and its socket is released before the error propagates.
        let events = Transport::connect(&config.socket_path).await?;

        let latch = Arc::new(Latch::new());
        let (shutdown_tx, _) = broadcast::channel(1);
        let listener = EventListener::spawn(
            events,
            Arc::clone(&latch),
            config.event_buffer,
            shutdown_tx.clone(),
        );

        debug!(path = %config.socket_path.display(), "vici session established");
        Ok(Self {
            command: CommandChannel::new(command),
            listener,
            latch,
            shutdown_tx,
            closed: AtomicBool::new(false),
        })
    }

    /// Issue a named command and wait for its reply
    ///
    /// Commands are totally ordered: at most one is in flight at a time,
    /// and concurrent callers acquire the command transport in arrival
    /// order.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownCommand`] if the daemon does not know `command`;
    /// fatal transport or protocol errors latch the session.
    pub async fn request(&self, command: &str, message: Message) -> Result<Message> {
        self.run(self.command.request(command, message)).await
    }

    /// Issue a streamed command, handing each stream event to `on_event`
    ///
    /// Registers `event`, sends the command, yields every matching event to
    /// the callback in arrival order, and returns the terminating reply
    /// after unregistering. The command transport is held for the entire
    /// exchange; other commands queue behind it. Stream events are consumed
    /// synchronously, so backpressure reaches the daemon through the
    /// socket.
    ///
    /// # Errors
    ///
    /// [`Error::EventRegisterFailed`] if `event` cannot be registered and
    /// [`Error::UnknownCommand`] if the daemon does not know `command`;
    /// both leave the session usable.
    pub async fn streamed_request(
        &self,
        command: &str,
        event: &str,
        message: Message,
        on_event: impl FnMut(Message),
    ) -> Result<Message> {
        self.run(self.command.streamed_request(command, event, message, on_event))
            .await
    }

    /// Register for the named events on the event transport
    ///
    /// # Errors
    ///
    /// [`Error::UnknownEvent`] if the daemon rejects a name; events
    /// confirmed before the failing one stay registered.
    pub async fn subscribe(&self, events: &[impl AsRef<str>]) -> Result<()> {
        self.run(self.listener.subscribe(events)).await
    }

    /// Unregister from the named events
    ///
    /// # Errors
    ///
    /// [`Error::UnknownEvent`] if the daemon rejects a name.
    pub async fn unsubscribe(&self, events: &[impl AsRef<str>]) -> Result<()> {
        self.run(self.listener.unsubscribe(events)).await
    }

    /// Block until the next subscribed event arrives
    ///
    /// Events are delivered in the order the daemon produced them. Events
    /// already buffered are drained even after a fatal error or close; once
    /// the buffer is empty the terminal error is returned. A
    /// [`Error::LostEvents`] marker is recoverable: subsequent calls keep
    /// delivering.
    ///
    /// # Errors
    ///
    /// The latched fatal error, [`Error::SessionClosed`], or a
    /// [`Error::LostEvents`] marker.
    pub async fn next_event(&self) -> Result<Event> {
        self.listener.next_event().await
    }

    /// Close the session
    ///
    /// Idempotent. Latches [`Error::SessionClosed`] (unless a fatal error
    /// is already latched), fails out all pending operations, and shuts
    /// down both sockets: the event transport first, which stops the
    /// reader loop, then the command transport. The daemon observes
    /// end-of-stream on both connections. Dropping the session without
    /// closing releases the sockets as well, but skips the orderly
    /// shutdown.
    pub async fn close(&self) {
        if !self.signal_close() {
            return;
        }
        // Event transport first, then the command transport
        self.listener.shutdown().await;
        self.command.shutdown().await;
        debug!("vici session closed");
    }

    /// Latch the close and fail out pending operations; true when this
    /// call was the one that closed the session
    fn signal_close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.latch.set(&Error::SessionClosed);
        let _ = self.shutdown_tx.send(());
        true
    }

    /// Check whether the session has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run an operation, racing it against shutdown and latching fatal
    /// errors it returns
    async fn run<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        let mut shutdown = self.shutdown_tx.subscribe();
        if let Some(err) = self.latch.fault() {
            return Err(err);
        }
        tokio::select! {
            result = operation => result.map_err(|err| self.latch_fatal(err)),
            _ = shutdown.recv() => Err(self.latch.fault().unwrap_or(Error::SessionClosed)),
        }
    }

    // A fatal error invalidates the whole session, so the event reader is
    // torn down along with the command side.
    fn latch_fatal(&self, err: Error) -> Error {
        if !err.is_recoverable() {
            self.latch.set(&err);
            let _ = self.shutdown_tx.send(());
        }
        err
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // No async context here; fail out anything still pending and let
        // the owned sockets close as the session is torn down.
        self.signal_close();
    }
}
