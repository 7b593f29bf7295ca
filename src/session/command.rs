//! Command channel
//!
//! Wraps the command transport behind a fair async mutex so that at most one
//! command is in flight at any time. Waiters acquire the transport in
//! arrival order, so batched administrative tasks cannot be starved. A
//! streamed request holds the transport for its entire register, stream,
//! unregister exchange.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::packet::{Packet, PacketType};
use crate::transport::Transport;

#[derive(Debug)]
pub(crate) struct CommandChannel<S> {
    transport: Mutex<Transport<S>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> CommandChannel<S> {
    pub(crate) fn new(transport: Transport<S>) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }

    /// Issue a named request and wait for its reply
    pub(crate) async fn request(&self, command: &str, message: Message) -> Result<Message> {
        let mut transport = self.transport.lock().await;

        transport.send(&Packet::request(command, message)).await?;
        let reply = transport.receive().await?;
        match reply.packet_type {
            PacketType::CmdResponse => Ok(reply.message.unwrap_or_default()),
            PacketType::CmdUnknown => Err(Error::UnknownCommand(command.to_string())),
            other => Err(Error::protocol(format!(
                "unexpected {other} in reply to command {command}"
            ))),
        }
    }

    /// Issue a streamed request, handing each stream event to `on_event`
    ///
    /// The callback runs before the next packet is read from the socket, so
    /// a slow consumer backpressures the daemon directly. Events arriving on
    /// the command transport between registration and unregistration belong
    /// to this call alone and are never routed to the event listener.
    pub(crate) async fn streamed_request(
        &self,
        command: &str,
        event: &str,
        message: Message,
        mut on_event: impl FnMut(Message),
    ) -> Result<Message> {
        let mut transport = self.transport.lock().await;

        transport.send(&Packet::register(event)).await?;
        match transport.receive().await?.packet_type {
            PacketType::EventConfirm => {}
            PacketType::EventUnknown => {
                return Err(Error::EventRegisterFailed(event.to_string()));
            }
            other => {
                return Err(Error::protocol(format!(
                    "unexpected {other} confirming registration of {event}"
                )));
            }
        }

        transport.send(&Packet::request(command, message)).await?;

        let reply = loop {
            let packet = transport.receive().await?;
            match packet.packet_type {
                PacketType::Event if packet.name.as_deref() == Some(event) => {
                    on_event(packet.message.unwrap_or_default());
                }
                PacketType::Event => {
                    return Err(Error::protocol(format!(
                        "unexpected event {} during streamed command {command}",
                        packet.name.unwrap_or_default()
                    )));
                }
                PacketType::CmdResponse => break packet.message.unwrap_or_default(),
                PacketType::CmdUnknown => {
                    // The registration went through, so drop it before
                    // surfacing the failure; the session stays usable.
                    Self::unregister(&mut transport, event).await?;
                    return Err(Error::UnknownCommand(command.to_string()));
                }
                other => {
                    return Err(Error::protocol(format!(
                        "unexpected {other} during streamed command {command}"
                    )));
                }
            }
        };

        Self::unregister(&mut transport, event).await?;
        Ok(reply)
    }

    /// Shut down the command stream, signalling end-of-stream to the daemon
    ///
    /// Waits for any in-flight command to release the transport first;
    /// pending calls cancelled by session close release it immediately.
    pub(crate) async fn shutdown(&self) {
        let mut transport = self.transport.lock().await;
        if let Err(err) = transport.shutdown().await {
            debug!(%err, "command transport shutdown failed");
        }
    }

    async fn unregister(transport: &mut Transport<S>, event: &str) -> Result<()> {
        transport.send(&Packet::unregister(event)).await?;
        match transport.receive().await?.packet_type {
            PacketType::EventConfirm => Ok(()),
            other => Err(Error::protocol(format!(
                "unexpected {other} confirming unregistration of {event}"
            ))),
        }
    }
}
