//! Binary encoding of the VICI message format
//!
//! A container is emitted as a flat stream of tagged elements. Keys carry a
//! one-byte length prefix, scalar values and list items a two-byte big-endian
//! length prefix. The top-level message is not wrapped in section tags; only
//! nested sections are framed by start/end markers.

use bytes::{Buf, BufMut};

use super::{Message, Value, MAX_KEY_LEN, MAX_SECTION_DEPTH, MAX_VALUE_LEN};
use crate::error::{Error, Result};

// Message element tags
const SECTION_START: u8 = 1;
const SECTION_END: u8 = 2;
const KEY_VALUE: u8 = 3;
const LIST_START: u8 = 4;
const LIST_ITEM: u8 = 5;
const LIST_END: u8 = 6;

pub(super) fn encode(message: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_into(message, &mut buf)?;
    Ok(buf)
}

fn encode_into(message: &Message, buf: &mut Vec<u8>) -> Result<()> {
    for (key, value) in message.iter() {
        match value {
            Value::Scalar(bytes) => encode_key_value(key, bytes, buf)?,
            Value::List(items) => encode_list(key, items, buf)?,
            Value::Section(section) => encode_section(key, section, buf)?,
        }
    }
    Ok(())
}

fn encode_key_value(key: &str, value: &[u8], buf: &mut Vec<u8>) -> Result<()> {
    buf.put_u8(KEY_VALUE);
    put_key(key, buf)?;
    put_value(key, value, buf)
}

fn encode_list(key: &str, items: &[Vec<u8>], buf: &mut Vec<u8>) -> Result<()> {
    buf.put_u8(LIST_START);
    put_key(key, buf)?;
    for item in items {
        buf.put_u8(LIST_ITEM);
        put_value(key, item, buf)?;
    }
    buf.put_u8(LIST_END);
    Ok(())
}

fn encode_section(key: &str, section: &Message, buf: &mut Vec<u8>) -> Result<()> {
    buf.put_u8(SECTION_START);
    put_key(key, buf)?;
    encode_into(section, buf)?;
    buf.put_u8(SECTION_END);
    Ok(())
}

fn put_key(key: &str, buf: &mut Vec<u8>) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(Error::encode(format!(
            "key too long ({} bytes, max {MAX_KEY_LEN}): {key}",
            key.len()
        )));
    }
    buf.put_u8(key.len() as u8);
    buf.put_slice(key.as_bytes());
    Ok(())
}

fn put_value(key: &str, value: &[u8], buf: &mut Vec<u8>) -> Result<()> {
    if value.len() > MAX_VALUE_LEN {
        return Err(Error::encode(format!(
            "value for key {key} too long ({} bytes, max {MAX_VALUE_LEN})",
            value.len()
        )));
    }
    buf.put_u16(value.len() as u16);
    buf.put_slice(value);
    Ok(())
}

pub(super) fn decode(data: &[u8]) -> Result<Message> {
    let mut buf = data;
    let mut message = Message::new();
    while buf.has_remaining() {
        let tag = buf.get_u8();
        decode_element(tag, &mut buf, &mut message, 0)?;
    }
    Ok(message)
}

fn decode_element(tag: u8, buf: &mut &[u8], message: &mut Message, depth: usize) -> Result<()> {
    match tag {
        KEY_VALUE => {
            let key = read_key(buf)?;
            let value = read_value(buf)?.to_vec();
            message.set(key, value);
        }
        LIST_START => {
            let key = read_key(buf)?;
            let mut items = Vec::new();
            loop {
                match read_u8(buf, "list element tag")? {
                    LIST_ITEM => items.push(read_value(buf)?.to_vec()),
                    LIST_END => break,
                    other => {
                        return Err(Error::protocol(format!(
                            "unexpected element tag {other:#04x} inside list {key}"
                        )));
                    }
                }
            }
            message.set(key, Value::List(items));
        }
        SECTION_START => {
            if depth + 1 > MAX_SECTION_DEPTH {
                return Err(Error::protocol(format!(
                    "section nesting exceeds depth limit of {MAX_SECTION_DEPTH}"
                )));
            }
            let key = read_key(buf)?;
            let mut section = Message::new();
            loop {
                let tag = read_u8(buf, "section element tag")?;
                if tag == SECTION_END {
                    break;
                }
                decode_element(tag, buf, &mut section, depth + 1)?;
            }
            message.set(key, section);
        }
        other => {
            return Err(Error::protocol(format!(
                "unexpected message element tag {other:#04x}"
            )));
        }
    }
    Ok(())
}

fn read_key(buf: &mut &[u8]) -> Result<String> {
    let len = read_u8(buf, "key length")? as usize;
    let bytes = read_bytes(buf, len, "key")?;
    let key = std::str::from_utf8(bytes)
        .map_err(|_| Error::protocol("malformed UTF-8 in message key"))?;
    Ok(key.to_string())
}

// Scalar bytes stay opaque; only the length is interpreted.
fn read_value<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = read_u16(buf, "value length")? as usize;
    read_bytes(buf, len, "value")
}

fn read_u8(buf: &mut &[u8], what: &str) -> Result<u8> {
    if !buf.has_remaining() {
        return Err(truncated(what));
    }
    Ok(buf.get_u8())
}

fn read_u16(buf: &mut &[u8], what: &str) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(truncated(what));
    }
    Ok(buf.get_u16())
}

fn read_bytes<'a>(buf: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    if buf.remaining() < len {
        return Err(truncated(what));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn truncated(what: &str) -> Error {
    Error::protocol(format!("message truncated while reading {what}"))
}
