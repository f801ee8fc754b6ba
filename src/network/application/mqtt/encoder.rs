//! Control packet builders.
//!
//! Every builder assembles a complete frame in a [`FrameBuffer`] before
//! anything touches the transport, and [`transmit`] hands the frame over only
//! when the socket can take all of it. A frame is written whole or not at all.

use super::config::ProtocolVersion;
use super::packet::{FrameBuffer, PacketType, QoS, encode_remaining_length};
use super::session::Will;
use crate::network::TcpStack;
use crate::network::error::Error;

/// Bytes reserved in front of the body for the fixed header: one type byte
/// plus up to four remaining-length digits.
pub const HEADER_RESERVE: usize = 5;

/// PINGREQ frame
pub const PINGREQ: [u8; 2] = [0xC0, 0x00];
/// PINGRESP frame
pub const PINGRESP: [u8; 2] = [0xD0, 0x00];
/// DISCONNECT frame
pub const DISCONNECT: [u8; 2] = [0xE0, 0x00];

const FLAG_CLEAN_SESSION: u8 = 0x02;
const FLAG_WILL: u8 = 0x04;
const FLAG_WILL_RETAIN: u8 = 0x20;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

/// Writes a packet body after a reserved header slot and then fills in the
/// fixed header right-aligned against the body.
#[derive(Debug)]
pub struct PacketWriter<'a, const N: usize> {
    buffer: &'a mut FrameBuffer<N>,
}

impl<'a, const N: usize> PacketWriter<'a, N> {
    /// Clear `buffer` and reserve room for the fixed header.
    pub fn new(buffer: &'a mut FrameBuffer<N>) -> Result<Self, Error> {
        buffer.clear();
        buffer.extend(&[0; HEADER_RESERVE])?;
        Ok(Self { buffer })
    }

    /// Append a single byte.
    pub fn put_u8(&mut self, value: u8) -> Result<(), Error> {
        self.buffer.push(value)
    }

    /// Append a big-endian 16-bit integer.
    pub fn put_u16(&mut self, value: u16) -> Result<(), Error> {
        self.buffer.put_u16(value)
    }

    /// Append a length-prefixed string.
    pub fn put_str(&mut self, text: &str) -> Result<(), Error> {
        self.buffer.put_str(text)
    }

    /// Append length-prefixed binary data.
    pub fn put_binary(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.buffer.put_binary(bytes)
    }

    /// Append raw bytes with no prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.buffer.extend(bytes)
    }

    /// Write the fixed header and return the finished frame.
    pub fn finish(self, header: u8) -> Result<&'a [u8], Error> {
        let buffer = self.buffer;
        let body_len = buffer.len() - HEADER_RESERVE;
        let mut digits = [0u8; 4];
        let count = encode_remaining_length(body_len, &mut digits)?;

        let start = HEADER_RESERVE - 1 - count;
        let bytes = buffer.as_mut_slice();
        bytes[start] = header;
        bytes[start + 1..HEADER_RESERVE].copy_from_slice(&digits[..count]);
        Ok(&bytes[start..])
    }
}

/// Fields of a CONNECT packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPacket<'a> {
    /// Protocol name and level to announce
    pub protocol: ProtocolVersion,
    /// Ask the broker to discard previous session state
    pub clean_session: bool,
    /// Keep-alive interval in seconds
    pub keep_alive_seconds: u16,
    /// Client identifier
    pub client_id: &'a str,
    /// Last will, published by the broker if the client vanishes
    pub will: Option<Will<'a>>,
    /// User name
    pub username: Option<&'a str>,
    /// Password, only sent together with a user name
    pub password: Option<&'a str>,
}

impl ConnectPacket<'_> {
    /// The connect-flags byte.
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_session {
            flags |= FLAG_CLEAN_SESSION;
        }
        if let Some(will) = &self.will {
            flags |= FLAG_WILL | (will.qos as u8) << 3;
            if will.retain {
                flags |= FLAG_WILL_RETAIN;
            }
        }
        if self.username.is_some() {
            flags |= FLAG_USERNAME;
            if self.password.is_some() {
                flags |= FLAG_PASSWORD;
            }
        }
        flags
    }
}

/// Build a CONNECT frame.
///
/// # Examples
///
/// ```rust
/// use coopmqtt::network::application::mqtt::encoder::{self, ConnectPacket};
/// use coopmqtt::network::application::mqtt::{FrameBuffer, ProtocolVersion};
///
/// let mut buffer: FrameBuffer<64> = FrameBuffer::new();
/// let frame = encoder::connect(&mut buffer, &ConnectPacket {
///     protocol: ProtocolVersion::V311,
///     clean_session: true,
///     keep_alive_seconds: 60,
///     client_id: "dev1",
///     will: None,
///     username: None,
///     password: None,
/// }).unwrap();
///
/// assert_eq!(frame[0], 0x10);
/// assert_eq!(frame[1] as usize, frame.len() - 2);
/// assert_eq!(&frame[2..8], b"\x00\x04MQTT");
/// ```
pub fn connect<'b, const N: usize>(
    buffer: &'b mut FrameBuffer<N>,
    packet: &ConnectPacket<'_>,
) -> Result<&'b [u8], Error> {
    let mut writer = PacketWriter::new(buffer)?;
    writer.put_str(packet.protocol.name())?;
    writer.put_u8(packet.protocol.level())?;
    writer.put_u8(packet.flags())?;
    writer.put_u16(packet.keep_alive_seconds)?;
    writer.put_str(packet.client_id)?;
    if let Some(will) = &packet.will {
        writer.put_str(will.topic)?;
        writer.put_binary(will.message)?;
    }
    if let Some(username) = packet.username {
        writer.put_str(username)?;
        if let Some(password) = packet.password {
            writer.put_str(password)?;
        }
    }
    writer.finish(PacketType::Connect.header())
}

/// Build a PUBLISH frame.
///
/// `message_id` is required for QoS 1 and 2 and ignored for QoS 0.
///
/// # Errors
///
/// * [`Error::InvalidMessageId`] - QoS above 0 without a non-zero id
/// * [`Error::BufferOverflow`] - the frame does not fit in `buffer`
pub fn publish<'b, const N: usize>(
    buffer: &'b mut FrameBuffer<N>,
    topic: &str,
    message_id: Option<u16>,
    payload: &[u8],
    qos: QoS,
    retain: bool,
) -> Result<&'b [u8], Error> {
    let mut writer = PacketWriter::new(buffer)?;
    writer.put_str(topic)?;
    if qos != QoS::AtMostOnce {
        match message_id {
            Some(id) if id != 0 => writer.put_u16(id)?,
            _ => return Err(Error::InvalidMessageId),
        }
    }
    writer.put_raw(payload)?;
    writer.finish(PacketType::Publish.header() | qos.header_bits() | u8::from(retain))
}

/// Build a SUBSCRIBE frame for a single topic filter.
pub fn subscribe<'b, const N: usize>(
    buffer: &'b mut FrameBuffer<N>,
    message_id: u16,
    topic: &str,
    qos: QoS,
) -> Result<&'b [u8], Error> {
    if message_id == 0 {
        return Err(Error::InvalidMessageId);
    }
    let mut writer = PacketWriter::new(buffer)?;
    writer.put_u16(message_id)?;
    writer.put_str(topic)?;
    writer.put_u8(qos as u8)?;
    writer.finish(PacketType::Subscribe.header() | 0x02)
}

/// Build an UNSUBSCRIBE frame for a single topic filter.
pub fn unsubscribe<'b, const N: usize>(
    buffer: &'b mut FrameBuffer<N>,
    message_id: u16,
    topic: &str,
) -> Result<&'b [u8], Error> {
    if message_id == 0 {
        return Err(Error::InvalidMessageId);
    }
    let mut writer = PacketWriter::new(buffer)?;
    writer.put_u16(message_id)?;
    writer.put_str(topic)?;
    writer.finish(PacketType::Unsubscribe.header() | 0x02)
}

/// Build a PUBACK frame.
pub fn puback<'b, const N: usize>(
    buffer: &'b mut FrameBuffer<N>,
    message_id: u16,
) -> Result<&'b [u8], Error> {
    if message_id == 0 {
        return Err(Error::InvalidMessageId);
    }
    let mut writer = PacketWriter::new(buffer)?;
    writer.put_u16(message_id)?;
    writer.finish(PacketType::PubAck.header())
}

/// Hand a complete frame to the transport.
///
/// Returns `Ok(false)` without writing anything when the socket's transmit
/// FIFO cannot take the whole frame yet.
///
/// # Errors
///
/// [`Error::WriteError`] if the transport accepted fewer bytes than it
/// advertised room for.
pub fn transmit<S: TcpStack>(stack: &mut S, socket: S::Socket, frame: &[u8]) -> Result<bool, Error> {
    if stack.write_capacity(socket) < frame.len() {
        return Ok(false);
    }
    let written = stack.write(socket, frame);
    stack.flush(socket);
    if written != frame.len() {
        return Err(Error::WriteError);
    }
    Ok(true)
}
