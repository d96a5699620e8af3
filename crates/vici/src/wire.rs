//! VICI packet framing and message element codec.
//!
//! ```text
//! +----------------+------+-------------+-----------+----------------+
//! | length (u32be) | type | name length | name      | message body   |
//! +----------------+------+-------------+-----------+----------------+
//!                         '---- named packet types only ----'
//! ```
//!
//! The length covers everything after itself. A message body is a flat
//! sequence of elements, each starting with a one-byte element type.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use common::{Error, Result};
use std::io::{Read, Write};
use tracing::trace;

/// Default location of the IKE daemon's control socket
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/charon.vici";

/// Largest frame either side will accept
pub const MAX_FRAME_SIZE: usize = 512 * 1024;

/// Longest packet, section, key or list name
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Longest key value or list item
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

/// Packet types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    CmdRequest = 0,
    CmdResponse = 1,
    CmdUnknown = 2,
    EventRegister = 3,
    EventUnregister = 4,
    EventConfirm = 5,
    EventUnknown = 6,
    Event = 7,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::CmdRequest,
            1 => Self::CmdResponse,
            2 => Self::CmdUnknown,
            3 => Self::EventRegister,
            4 => Self::EventUnregister,
            5 => Self::EventConfirm,
            6 => Self::EventUnknown,
            7 => Self::Event,
            _ => return None,
        })
    }

    /// Whether packets of this type carry a name.
    pub fn is_named(&self) -> bool {
        matches!(
            self,
            Self::CmdRequest | Self::EventRegister | Self::EventUnregister | Self::Event
        )
    }
}

/// Message element types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    SectionStart = 1,
    SectionEnd = 2,
    KeyValue = 3,
    ListStart = 4,
    ListItem = 5,
    ListEnd = 6,
}

/// One decoded message element, borrowing from the message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element<'a> {
    SectionStart(&'a str),
    SectionEnd,
    KeyValue(&'a str, &'a [u8]),
    ListStart(&'a str),
    ListItem(&'a [u8]),
    ListEnd,
}

/// Sequential reader over the elements of a message body.
pub struct ElementReader<'a> {
    buf: &'a [u8],
}

impl<'a> ElementReader<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self { buf: body }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.buf.len() < len {
            return Err(Error::parse(format!(
                "truncated {}: need {} bytes, have {}",
                what,
                len,
                self.buf.len()
            )));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn name(&mut self) -> Result<&'a str> {
        let len = self.take(1, "name length")?[0] as usize;
        let raw = self.take(len, "name")?;
        std::str::from_utf8(raw).map_err(|e| Error::parse(format!("invalid name: {}", e)))
    }

    fn value(&mut self) -> Result<&'a [u8]> {
        let mut len = self.take(2, "value length")?;
        let len = len.get_u16() as usize;
        self.take(len, "value")
    }

    /// Next element, or `None` at the end of the body.
    pub fn next_element(&mut self) -> Result<Option<Element<'a>>> {
        let Some(&kind) = self.buf.first() else {
            return Ok(None);
        };
        self.buf = &self.buf[1..];

        let element = match kind {
            1 => Element::SectionStart(self.name()?),
            2 => Element::SectionEnd,
            3 => {
                let name = self.name()?;
                Element::KeyValue(name, self.value()?)
            }
            4 => Element::ListStart(self.name()?),
            5 => Element::ListItem(self.value()?),
            6 => Element::ListEnd,
            other => return Err(Error::parse(format!("unknown element type {}", other))),
        };
        Ok(Some(element))
    }
}

pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid_size(format!(
            "name of {} bytes exceeds {}",
            name.len(),
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

pub(crate) fn check_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_LEN {
        return Err(Error::invalid_size(format!(
            "value of {} bytes exceeds {}",
            value.len(),
            MAX_VALUE_LEN
        )));
    }
    Ok(())
}

/// Callers validate with [`check_name`] first.
pub(crate) fn put_name(buf: &mut BytesMut, name: &str) {
    buf.put_u8(name.len() as u8);
    buf.put_slice(name.as_bytes());
}

/// Callers validate with [`check_value`] first.
pub(crate) fn put_value(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u16(value.len() as u16);
    buf.put_slice(value);
}

/// A single VICI packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub name: Option<String>,
    pub body: Bytes,
}

impl Packet {
    pub fn new(kind: PacketType, name: Option<&str>, body: Bytes) -> Self {
        Self {
            kind,
            name: name.map(str::to_string),
            body,
        }
    }

    /// Encode the packet including its length prefix.
    pub fn encode(&self) -> Result<Bytes> {
        let mut payload = BytesMut::with_capacity(2 + MAX_NAME_LEN + self.body.len());
        payload.put_u8(self.kind as u8);
        if self.kind.is_named() {
            let name = self.name.as_deref().unwrap_or_default();
            check_name(name)?;
            put_name(&mut payload, name);
        }
        payload.put_slice(&self.body);

        if payload.len() > MAX_FRAME_SIZE {
            return Err(Error::invalid_size(format!(
                "frame of {} bytes exceeds {}",
                payload.len(),
                MAX_FRAME_SIZE
            )));
        }

        let mut frame = BytesMut::with_capacity(4 + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.put_slice(&payload);
        Ok(frame.freeze())
    }

    /// Decode a frame with its length prefix already stripped.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let mut buf = frame;
        if !buf.has_remaining() {
            return Err(Error::parse("empty packet"));
        }

        let raw = buf.get_u8();
        let kind = PacketType::from_u8(raw)
            .ok_or_else(|| Error::parse(format!("unknown packet type {}", raw)))?;

        let name = if kind.is_named() {
            if !buf.has_remaining() {
                return Err(Error::parse("truncated packet name"));
            }
            let len = buf.get_u8() as usize;
            if buf.remaining() < len {
                return Err(Error::parse("truncated packet name"));
            }
            let name = std::str::from_utf8(&buf[..len])
                .map_err(|e| Error::parse(format!("invalid packet name: {}", e)))?
                .to_string();
            buf.advance(len);
            Some(name)
        } else {
            None
        };

        Ok(Self {
            kind,
            name,
            body: Bytes::copy_from_slice(buf),
        })
    }

    /// Read one packet from a stream.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut len = [0u8; 4];
        reader.read_exact(&mut len)?;
        let len = u32::from_be_bytes(len) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(Error::invalid_size(format!(
                "incoming frame of {} bytes exceeds {}",
                len, MAX_FRAME_SIZE
            )));
        }

        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame)?;

        let packet = Self::decode(&frame)?;
        trace!(kind = ?packet.kind, name = ?packet.name, len, "Received packet");
        Ok(packet)
    }

    /// Write this packet to a stream.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let frame = self.encode()?;
        writer.write_all(&frame)?;
        writer.flush()?;
        trace!(kind = ?self.kind, name = ?self.name, len = frame.len(), "Sent packet");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_named_packet_layout() {
        let packet = Packet::new(PacketType::CmdRequest, Some("version"), Bytes::new());
        let frame = packet.encode().unwrap();

        assert_eq!(&frame[..4], &[0, 0, 0, 9]);
        assert_eq!(frame[4], 0);
        assert_eq!(frame[5], 7);
        assert_eq!(&frame[6..], b"version");
    }

    #[test]
    fn test_unnamed_packet_has_no_name() {
        let packet = Packet::new(
            PacketType::CmdResponse,
            Some("ignored"),
            Bytes::from_static(&[3, 1, b'a', 0, 1, b'b']),
        );
        let frame = packet.encode().unwrap();
        assert_eq!(&frame[..5], &[0, 0, 0, 7, 1]);

        let decoded = Packet::decode(&frame[4..]).unwrap();
        assert_eq!(decoded.kind, PacketType::CmdResponse);
        assert_eq!(decoded.name, None);
        assert_eq!(&decoded.body[..], &[3, 1, b'a', 0, 1, b'b']);
    }

    #[test]
    fn test_stream_read_write() {
        let mut stream = Vec::new();
        Packet::new(PacketType::EventRegister, Some("list-sa"), Bytes::new())
            .write_to(&mut stream)
            .unwrap();
        Packet::new(PacketType::EventConfirm, None, Bytes::new())
            .write_to(&mut stream)
            .unwrap();

        let mut cursor = Cursor::new(stream);
        let first = Packet::read_from(&mut cursor).unwrap();
        assert_eq!(first.kind, PacketType::EventRegister);
        assert_eq!(first.name.as_deref(), Some("list-sa"));
        assert_eq!(Packet::read_from(&mut cursor).unwrap().kind, PacketType::EventConfirm);
        assert!(Packet::read_from(&mut cursor).is_err());
    }

    #[test]
    fn test_oversized_incoming_frame() {
        let mut cursor = Cursor::new(vec![0xff, 0xff, 0xff, 0xff, 1]);
        let err = Packet::read_from(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), common::ErrorKind::InvalidSize);
    }

    #[test]
    fn test_element_reader() {
        let body = [
            1, 3, b'i', b'k', b'e', // section "ike"
            3, 1, b'k', 0, 2, b'v', b'1', // k = v1
            4, 1, b'l', // list "l"
            5, 0, 1, b'x', // item x
            6, // list end
            2, // section end
        ];
        let mut reader = ElementReader::new(&body);
        assert_eq!(reader.next_element().unwrap(), Some(Element::SectionStart("ike")));
        assert_eq!(reader.next_element().unwrap(), Some(Element::KeyValue("k", b"v1")));
        assert_eq!(reader.next_element().unwrap(), Some(Element::ListStart("l")));
        assert_eq!(reader.next_element().unwrap(), Some(Element::ListItem(b"x")));
        assert_eq!(reader.next_element().unwrap(), Some(Element::ListEnd));
        assert_eq!(reader.next_element().unwrap(), Some(Element::SectionEnd));
        assert_eq!(reader.next_element().unwrap(), None);
    }

    #[test]
    fn test_element_reader_errors() {
        let mut reader = ElementReader::new(&[3, 5, b'a']);
        assert!(reader.next_element().is_err());

        let mut reader = ElementReader::new(&[9]);
        assert_eq!(
            reader.next_element().unwrap_err().kind(),
            common::ErrorKind::ParseError
        );
    }
}
