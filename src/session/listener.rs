//! Event listener
//!
//! Owns the event transport for the lifetime of the session. The read half
//! is consumed by a spawned reader loop that enqueues `EVENT` packets into
//! the delivery queue and hands registration confirmations to whichever
//! subscribe or unsubscribe call is waiting. The write half is guarded by
//! its own mutex so register/confirm handshakes are unambiguous.
//!
//! The delivery queue is unbounded by default. With a configured bound it
//! drops its oldest unread events on overflow and surfaces a
//! [`Error::LostEvents`] marker in their place.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::futures::Notified;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, Notify};
use tracing::{debug, warn};

use super::{Event, Latch};
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketType};
use crate::transport::Transport;

#[derive(Debug)]
pub(crate) struct EventListener {
    queue: Arc<EventQueue>,
    latch: Arc<Latch>,
    ctl: AsyncMutex<ListenerCtl>,
}

#[derive(Debug)]
struct ListenerCtl {
    writer: Transport<OwnedWriteHalf>,
    confirmations: mpsc::Receiver<PacketType>,
    registered: HashSet<String>,
}

impl EventListener {
    /// Split the event transport and start the reader loop
    pub(crate) fn spawn(
        transport: Transport<UnixStream>,
        latch: Arc<Latch>,
        capacity: Option<usize>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        let (reader, writer) = transport.into_split();
        let queue = Arc::new(EventQueue::new(capacity));
        let (confirm_tx, confirm_rx) = mpsc::channel(8);

        // Subscribe before spawning so a close racing the spawn is not missed
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(read_loop(
            reader,
            Arc::clone(&queue),
            Arc::clone(&latch),
            confirm_tx,
            shutdown,
            shutdown_rx,
        ));

        Self {
            queue,
            latch,
            ctl: AsyncMutex::new(ListenerCtl {
                writer,
                confirmations: confirm_rx,
                registered: HashSet::new(),
            }),
        }
    }

    pub(crate) async fn subscribe(&self, events: &[impl AsRef<str>]) -> Result<()> {
        self.update_registrations(events, true).await
    }

    pub(crate) async fn unsubscribe(&self, events: &[impl AsRef<str>]) -> Result<()> {
        self.update_registrations(events, false).await
    }

    async fn update_registrations(&self, events: &[impl AsRef<str>], register: bool) -> Result<()> {
        let mut ctl = self.ctl.lock().await;
        // A stale confirmation from an aborted handshake must not be taken
        // for this one
        while ctl.confirmations.try_recv().is_ok() {}
        for event in events {
            let name = event.as_ref();
            let packet = if register {
                Packet::register(name)
            } else {
                Packet::unregister(name)
            };
            ctl.writer.send(&packet).await?;

            match ctl.confirmations.recv().await {
                Some(PacketType::EventConfirm) => {
                    if register {
                        ctl.registered.insert(name.to_string());
                    } else {
                        ctl.registered.remove(name);
                    }
                }
                // The daemon rejected the name; the registered set is untouched
                Some(PacketType::EventUnknown) => {
                    return Err(Error::UnknownEvent(name.to_string()));
                }
                Some(other) => {
                    return Err(Error::protocol(format!(
                        "unexpected {other} confirming registration of {name}"
                    )));
                }
                // Reader loop is gone; report why
                None => return Err(self.terminal_error()),
            }
        }
        Ok(())
    }

    /// Block until the next event is available
    ///
    /// Buffered events are drained even after the reader loop has failed;
    /// only then is the terminal error reported.
    pub(crate) async fn next_event(&self) -> Result<Event> {
        loop {
            let notified = self.queue.notified();
            match self.queue.pop() {
                Some(QueueItem::Event(event)) => return Ok(event),
                Some(QueueItem::Lost(count)) => return Err(Error::LostEvents(count)),
                None => {
                    if self.queue.is_closed() {
                        return Err(self.terminal_error());
                    }
                    notified.await;
                }
            }
        }
    }

    /// Shut down the write half of the event transport
    ///
    /// The daemon observes end-of-stream; the read half is dropped by the
    /// exiting reader loop.
    pub(crate) async fn shutdown(&self) {
        let mut ctl = self.ctl.lock().await;
        if let Err(err) = ctl.writer.shutdown().await {
            debug!(%err, "event transport shutdown failed");
        }
    }

    fn terminal_error(&self) -> Error {
        self.latch.fault().unwrap_or(Error::SessionClosed)
    }
}

async fn read_loop(
    mut reader: Transport<OwnedReadHalf>,
    queue: Arc<EventQueue>,
    latch: Arc<Latch>,
    confirm_tx: mpsc::Sender<PacketType>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let packet = tokio::select! {
            _ = shutdown.recv() => break,
            received = reader.receive() => match received {
                Ok(packet) => packet,
                Err(err) => {
                    latch.set(&err);
                    // Fail out the command side as well
                    let _ = shutdown_tx.send(());
                    break;
                }
            },
        };

        match packet.packet_type {
            PacketType::Event => {
                queue.push(Event {
                    name: packet.name.unwrap_or_default(),
                    message: packet.message.unwrap_or_default(),
                });
            }
            PacketType::EventConfirm | PacketType::EventUnknown => {
                match confirm_tx.try_send(packet.packet_type) {
                    Ok(()) => {}
                    // Listener dropped; nothing left to confirm to
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        latch.set(&Error::protocol(
                            "unsolicited confirmations on event transport",
                        ));
                        let _ = shutdown_tx.send(());
                        break;
                    }
                }
            }
            other => {
                warn!(packet_type = %other, "unexpected packet type on event transport");
                latch.set(&Error::protocol(format!(
                    "unexpected {other} on event transport"
                )));
                let _ = shutdown_tx.send(());
                break;
            }
        }
    }

    queue.close();
    debug!("event reader loop terminated");
}

/// Thread-safe FIFO with blocking dequeue and optional bounded capacity
#[derive(Debug)]
struct EventQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

#[derive(Debug)]
struct QueueInner {
    items: VecDeque<Event>,
    lost: u64,
    capacity: Option<usize>,
    closed: bool,
}

enum QueueItem {
    Event(Event),
    Lost(u64),
}

impl EventQueue {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                lost: 0,
                capacity,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn push(&self, event: Event) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            if let Some(capacity) = inner.capacity {
                if inner.items.len() >= capacity {
                    inner.items.pop_front();
                    inner.lost += 1;
                }
            }
            inner.items.push_back(event);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<QueueItem> {
        let mut inner = self.inner.lock();
        // Dropped events were older than anything still queued, so the
        // marker surfaces first
        if inner.lost > 0 {
            let count = inner.lost;
            inner.lost = 0;
            return Some(QueueItem::Lost(count));
        }
        inner.items.pop_front().map(QueueItem::Event)
    }

    fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}
