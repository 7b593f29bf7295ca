//! VICI packet types
//!
//! A [`Packet`] is the unit exchanged on a transport: a type byte followed
//! by an optional command or event name and an optional [`Message`] payload.
//! Which parts are present depends on the packet type:
//!
//! | Type | Name | Message |
//! |------|------|---------|
//! | `CMD_REQUEST` | yes | yes |
//! | `CMD_RESPONSE` | no | yes |
//! | `CMD_UNKNOWN` | no | no |
//! | `EVENT_REGISTER` / `EVENT_UNREGISTER` | yes | no |
//! | `EVENT_CONFIRM` / `EVENT_UNKNOWN` | no | no |
//! | `EVENT` | yes | yes |
//!
//! Names are length-prefixed with a single byte, so they are limited to
//! 255 bytes.

use std::fmt;

use bytes::BufMut;

use crate::error::{Error, Result};
use crate::message::Message;

/// Maximum command or event name length in bytes
pub const MAX_NAME_LEN: usize = 255;

/// The eight VICI packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// A named command request
    CmdRequest = 0,
    /// Reply to a command request
    CmdResponse = 1,
    /// The requested command is unknown to the daemon
    CmdUnknown = 2,
    /// Register for a named event
    EventRegister = 3,
    /// Unregister from a named event
    EventUnregister = 4,
    /// Registration or unregistration succeeded
    EventConfirm = 5,
    /// The named event is unknown to the daemon
    EventUnknown = 6,
    /// An event notification
    Event = 7,
}

impl PacketType {
    /// Parse a packet type byte
    #[must_use]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::CmdRequest),
            1 => Some(Self::CmdResponse),
            2 => Some(Self::CmdUnknown),
            3 => Some(Self::EventRegister),
            4 => Some(Self::EventUnregister),
            5 => Some(Self::EventConfirm),
            6 => Some(Self::EventUnknown),
            7 => Some(Self::Event),
            _ => None,
        }
    }

    /// Whether packets of this type carry a name
    #[must_use]
    pub fn has_name(self) -> bool {
        matches!(
            self,
            Self::CmdRequest | Self::EventRegister | Self::EventUnregister | Self::Event
        )
    }

    /// Whether packets of this type carry a message payload
    #[must_use]
    pub fn has_message(self) -> bool {
        matches!(self, Self::CmdRequest | Self::CmdResponse | Self::Event)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CmdRequest => "CMD_REQUEST",
            Self::CmdResponse => "CMD_RESPONSE",
            Self::CmdUnknown => "CMD_UNKNOWN",
            Self::EventRegister => "EVENT_REGISTER",
            Self::EventUnregister => "EVENT_UNREGISTER",
            Self::EventConfirm => "EVENT_CONFIRM",
            Self::EventUnknown => "EVENT_UNKNOWN",
            Self::Event => "EVENT",
        };
        f.write_str(name)
    }
}

/// A single protocol packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet type
    pub packet_type: PacketType,

    /// Command or event name, for types that carry one
    pub name: Option<String>,

    /// Message payload, for types that carry one
    pub message: Option<Message>,
}

impl Packet {
    /// Create a `CMD_REQUEST` packet
    #[must_use]
    pub fn request(name: impl Into<String>, message: Message) -> Self {
        Self {
            packet_type: PacketType::CmdRequest,
            name: Some(name.into()),
            message: Some(message),
        }
    }

    /// Create a `CMD_RESPONSE` packet
    #[must_use]
    pub fn response(message: Message) -> Self {
        Self {
            packet_type: PacketType::CmdResponse,
            name: None,
            message: Some(message),
        }
    }

    /// Create a `CMD_UNKNOWN` packet
    #[must_use]
    pub fn command_unknown() -> Self {
        Self {
            packet_type: PacketType::CmdUnknown,
            name: None,
            message: None,
        }
    }

    /// Create an `EVENT_REGISTER` packet
    #[must_use]
    pub fn register(event: impl Into<String>) -> Self {
        Self {
            packet_type: PacketType::EventRegister,
            name: Some(event.into()),
            message: None,
        }
    }

    /// Create an `EVENT_UNREGISTER` packet
    #[must_use]
    pub fn unregister(event: impl Into<String>) -> Self {
        Self {
            packet_type: PacketType::EventUnregister,
            name: Some(event.into()),
            message: None,
        }
    }

    /// Create an `EVENT_CONFIRM` packet
    #[must_use]
    pub fn confirm() -> Self {
        Self {
            packet_type: PacketType::EventConfirm,
            name: None,
            message: None,
        }
    }

    /// Create an `EVENT_UNKNOWN` packet
    #[must_use]
    pub fn event_unknown() -> Self {
        Self {
            packet_type: PacketType::EventUnknown,
            name: None,
            message: None,
        }
    }

    /// Create an `EVENT` packet
    #[must_use]
    pub fn event(name: impl Into<String>, message: Message) -> Self {
        Self {
            packet_type: PacketType::Event,
            name: Some(name.into()),
            message: Some(message),
        }
    }

    /// Serialize this packet as type byte plus payload
    ///
    /// The result is the content of a frame; the transport prepends the
    /// length prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if the name exceeds [`MAX_NAME_LEN`] or the
    /// message payload cannot be encoded.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.put_u8(self.packet_type as u8);

        if self.packet_type.has_name() {
            let name = self.name.as_deref().unwrap_or_default();
            if name.len() > MAX_NAME_LEN {
                return Err(Error::encode(format!(
                    "name too long ({} bytes, max {MAX_NAME_LEN}): {name}",
                    name.len()
                )));
            }
            buf.put_u8(name.len() as u8);
            buf.put_slice(name.as_bytes());
        }

        if self.packet_type.has_message() {
            let encoded = match &self.message {
                Some(message) => message.encode()?,
                None => Vec::new(),
            };
            buf.put_slice(&encoded);
        }

        Ok(buf)
    }

    /// Parse a packet from the content of a frame (type byte plus payload)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on an empty frame, an unknown type byte,
    /// a truncated name, trailing bytes after a payload-less packet, or a
    /// malformed message payload.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let (&type_byte, mut rest) = frame
            .split_first()
            .ok_or_else(|| Error::protocol("empty packet"))?;
        let packet_type = PacketType::from_u8(type_byte)
            .ok_or_else(|| Error::protocol(format!("unknown packet type {type_byte}")))?;

        let name = if packet_type.has_name() {
            let (&len, tail) = rest
                .split_first()
                .ok_or_else(|| Error::protocol(format!("{packet_type} packet missing name")))?;
            let len = len as usize;
            if tail.len() < len {
                return Err(Error::protocol(format!(
                    "{packet_type} packet truncated inside name"
                )));
            }
            let (name_bytes, tail) = tail.split_at(len);
            rest = tail;
            let name = std::str::from_utf8(name_bytes)
                .map_err(|_| Error::protocol(format!("malformed UTF-8 in {packet_type} name")))?;
            Some(name.to_string())
        } else {
            None
        };

        let message = if packet_type.has_message() {
            Some(Message::decode(rest)?)
        } else {
            if !rest.is_empty() {
                return Err(Error::protocol(format!(
                    "unexpected payload on {packet_type} packet"
                )));
            }
            None
        };

        Ok(Self {
            packet_type,
            name,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let packet = Packet::request("version", Message::new());
        let encoded = packet.encode().unwrap();
        assert_eq!(encoded[0], 0);
        assert_eq!(encoded[1] as usize, "version".len());
        assert_eq!(&encoded[2..9], b"version");
        assert_eq!(Packet::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_request_with_payload_round_trip() {
        let packet = Packet::request("initiate", Message::new().with("child", "net-net"));
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(
            decoded.message.unwrap().get_str("child"),
            Some("net-net")
        );
    }

    #[test]
    fn test_response_round_trip() {
        let packet = Packet::response(Message::new().with("success", "yes"));
        let encoded = packet.encode().unwrap();
        assert_eq!(encoded[0], 1);
        assert_eq!(Packet::decode(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_empty_payload_types_round_trip() {
        for packet in [
            Packet::command_unknown(),
            Packet::confirm(),
            Packet::event_unknown(),
        ] {
            let encoded = packet.encode().unwrap();
            assert_eq!(encoded.len(), 1);
            assert_eq!(Packet::decode(&encoded).unwrap(), packet);
        }
    }

    #[test]
    fn test_register_round_trip() {
        let packet = Packet::register("ike-updown");
        let encoded = packet.encode().unwrap();
        assert_eq!(encoded[0], 3);
        assert_eq!(Packet::decode(&encoded).unwrap(), packet);

        let packet = Packet::unregister("ike-updown");
        assert_eq!(Packet::decode(&packet.encode().unwrap()).unwrap(), packet);
    }

    #[test]
    fn test_event_round_trip() {
        let packet = Packet::event("log", Message::new().with("msg", "established"));
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
        assert_eq!(decoded.packet_type, PacketType::Event);
        assert_eq!(decoded.name.as_deref(), Some("log"));
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_name_too_long_rejected() {
        let packet = Packet::request("x".repeat(256), Message::new());
        assert!(matches!(packet.encode(), Err(Error::Encode(_))));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        // Empty frame
        assert!(matches!(Packet::decode(&[]), Err(Error::Protocol(_))));

        // Unknown type byte
        assert!(matches!(Packet::decode(&[8]), Err(Error::Protocol(_))));

        // CMD_REQUEST missing its name
        assert!(matches!(Packet::decode(&[0]), Err(Error::Protocol(_))));

        // Name length pointing past the end
        assert!(matches!(
            Packet::decode(&[0, 10, b'a', b'b']),
            Err(Error::Protocol(_))
        ));

        // Payload on a payload-less type
        assert!(matches!(
            Packet::decode(&[5, 1, 2, 3]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_packet_type_parse() {
        for byte in 0..=7u8 {
            let packet_type = PacketType::from_u8(byte).unwrap();
            assert_eq!(packet_type as u8, byte);
        }
        assert!(PacketType::from_u8(8).is_none());
        assert!(PacketType::from_u8(255).is_none());
    }
}
