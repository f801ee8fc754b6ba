//! Control packet primitives: packet types, quality of service, the
//! remaining-length codec, a bounded frame buffer and read-only views over
//! complete inbound frames.

use crate::network::error::Error;
use heapless::Vec;

/// Default capacity of the transmit and receive frame buffers.
pub const MAX_PACKET_SIZE: usize = 256;

/// Largest value the 4-digit remaining-length field can carry (2^28 - 1).
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// MQTT control packet types, as carried in the high nibble of the fixed
/// header.
///
/// # Examples
///
/// ```rust
/// use coopmqtt::network::application::mqtt::PacketType;
///
/// assert_eq!(PacketType::from_header(0x32), Some(PacketType::Publish));
/// assert_eq!(PacketType::PingReq.header(), 0xC0);
/// assert_eq!(PacketType::from_header(0xF0), None);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum PacketType {
    /// Client request to connect to a broker
    Connect = 1,
    /// Connect acknowledgement
    ConnAck = 2,
    /// Publish message
    Publish = 3,
    /// Publish acknowledgement (QoS 1)
    PubAck = 4,
    /// Publish received (QoS 2, unused)
    PubRec = 5,
    /// Publish release (QoS 2, unused)
    PubRel = 6,
    /// Publish complete (QoS 2, unused)
    PubComp = 7,
    /// Subscribe request
    Subscribe = 8,
    /// Subscribe acknowledgement
    SubAck = 9,
    /// Unsubscribe request
    Unsubscribe = 10,
    /// Unsubscribe acknowledgement
    UnsubAck = 11,
    /// Ping request
    PingReq = 12,
    /// Ping response
    PingResp = 13,
    /// Client is disconnecting
    Disconnect = 14,
}

impl PacketType {
    /// Decode the packet type from a fixed header byte.
    pub fn from_header(header: u8) -> Option<Self> {
        let kind = match header >> 4 {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            _ => return None,
        };
        Some(kind)
    }

    /// The fixed header byte for this type with all flag bits clear.
    pub fn header(self) -> u8 {
        (self as u8) << 4
    }
}

/// Quality of Service levels for MQTT messages.
///
/// QoS defines the guarantee of delivery for a specific message. This client
/// sends and acknowledges QoS 0 and QoS 1; QoS 2 is recognised on the wire but
/// rejected by the verbs.
///
/// # Examples
///
/// ```rust
/// use coopmqtt::network::application::mqtt::QoS;
///
/// assert_eq!(QoS::AtLeastOnce.header_bits(), 0x02);
/// assert_eq!(QoS::from_header(0x34), Some(QoS::ExactlyOnce));
/// assert_eq!(QoS::from_bits(3), None);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum QoS {
    /// **QoS 0**: At most once delivery.
    ///
    /// Messages are delivered according to the best effort of the underlying
    /// network. Message loss can occur.
    #[default]
    AtMostOnce = 0,

    /// **QoS 1**: At least once delivery.
    ///
    /// Messages are assured to arrive but duplicates can occur. The receiver
    /// answers with a PUBACK carrying the message id.
    AtLeastOnce = 1,

    /// **QoS 2**: Exactly once delivery. Not supported by this client.
    ExactlyOnce = 2,
}

impl QoS {
    /// Decode a two-bit QoS value.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    /// Decode the QoS carried in bits 2-1 of a PUBLISH fixed header.
    pub fn from_header(header: u8) -> Option<Self> {
        Self::from_bits((header >> 1) & 0x03)
    }

    /// QoS shifted into its PUBLISH fixed header position.
    pub fn header_bits(self) -> u8 {
        (self as u8) << 1
    }
}

/// Encode `len` as an MQTT remaining-length field.
///
/// Digits are base-128, least significant group first, with the continuation
/// bit set on every digit but the last. Returns the number of digits written.
///
/// # Errors
///
/// [`Error::LengthOutOfRange`] if `len` exceeds [`MAX_REMAINING_LENGTH`].
///
/// # Examples
///
/// ```rust
/// use coopmqtt::network::application::mqtt::packet::encode_remaining_length;
///
/// let mut digits = [0u8; 4];
/// assert_eq!(encode_remaining_length(321, &mut digits), Ok(2));
/// assert_eq!(&digits[..2], &[0xC1, 0x02]);
/// ```
pub fn encode_remaining_length(len: usize, digits: &mut [u8; 4]) -> Result<usize, Error> {
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::LengthOutOfRange);
    }

    let mut value = len;
    let mut count = 0;
    loop {
        let mut digit = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            digit |= 0x80;
        }
        digits[count] = digit;
        count += 1;
        if value == 0 {
            return Ok(count);
        }
    }
}

/// Incremental remaining-length decoder.
///
/// Fed one byte at a time so the reader can stop between any two digits and
/// pick up again on a later tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingLength {
    value: u32,
    multiplier: u32,
    digits: u8,
}

impl Default for RemainingLength {
    fn default() -> Self {
        Self::new()
    }
}

impl RemainingLength {
    /// A decoder that has seen no digits.
    pub const fn new() -> Self {
        Self {
            value: 0,
            multiplier: 1,
            digits: 0,
        }
    }

    /// Feed the next digit.
    ///
    /// Returns `Ok(Some(len))` once the final digit arrives, `Ok(None)` while
    /// more digits are expected.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedPacket`] when a fourth digit still has its
    /// continuation bit set.
    pub fn push(&mut self, byte: u8) -> Result<Option<usize>, Error> {
        if self.digits >= 4 {
            return Err(Error::MalformedPacket);
        }
        self.value += u32::from(byte & 0x7F) * self.multiplier;
        self.multiplier = self.multiplier.saturating_mul(128);
        self.digits += 1;

        if byte & 0x80 == 0 {
            Ok(Some(self.value as usize))
        } else if self.digits == 4 {
            Err(Error::MalformedPacket)
        } else {
            Ok(None)
        }
    }

    /// Number of digits consumed so far
    pub fn digits(&self) -> usize {
        usize::from(self.digits)
    }
}

/// Decode a remaining-length field from the start of `bytes`.
///
/// Returns `Ok(Some((len, consumed)))` when the field is complete and
/// `Ok(None)` when `bytes` ends before the final digit.
///
/// # Errors
///
/// [`Error::MalformedPacket`] if the field runs past four digits.
pub fn decode_remaining_length(bytes: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    let mut decoder = RemainingLength::new();
    for &byte in bytes {
        if let Some(len) = decoder.push(byte)? {
            return Ok(Some((len, decoder.digits())));
        }
    }
    Ok(None)
}

/// A fixed-capacity byte buffer holding one control packet.
///
/// Every write is capacity checked; nothing is ever written past `N`.
#[derive(Debug, Clone, Default)]
pub struct FrameBuffer<const N: usize> {
    bytes: Vec<u8, N>,
}

impl<const N: usize> FrameBuffer<N> {
    /// An empty buffer.
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Append one byte.
    pub fn push(&mut self, byte: u8) -> Result<(), Error> {
        self.bytes.push(byte).map_err(|_| Error::BufferOverflow)
    }

    /// Append raw bytes. On overflow the buffer is left unchanged.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.bytes
            .extend_from_slice(bytes)
            .map_err(|_| Error::BufferOverflow)
    }

    /// Append a big-endian 16-bit integer.
    pub fn put_u16(&mut self, value: u16) -> Result<(), Error> {
        self.extend(&value.to_be_bytes())
    }

    /// Append a 16-bit length prefix followed by `bytes`.
    pub fn put_binary(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let len = u16::try_from(bytes.len()).map_err(|_| Error::LengthOutOfRange)?;
        if self.remaining() < bytes.len() + 2 {
            return Err(Error::BufferOverflow);
        }
        self.put_u16(len)?;
        self.extend(bytes)
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, text: &str) -> Result<(), Error> {
        self.put_binary(text.as_bytes())
    }

    /// Drop all contents.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Number of bytes stored
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Total capacity, `N`
    pub fn capacity(&self) -> usize {
        N
    }

    /// Free space left
    pub fn remaining(&self) -> usize {
        N - self.bytes.len()
    }

    /// The stored bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// The stored bytes, mutably
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// A complete control packet: fixed header byte plus its body.
///
/// # Examples
///
/// ```rust
/// use coopmqtt::network::application::mqtt::{Frame, PacketType};
///
/// let frame = Frame::parse(&[0x20, 0x02, 0x00, 0x05]).unwrap();
/// assert_eq!(frame.packet_type(), Some(PacketType::ConnAck));
/// assert_eq!(frame.connack_code(), Some(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    header: u8,
    body: &'a [u8],
}

impl<'a> Frame<'a> {
    /// View `bytes` as exactly one control packet.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedPacket`] when the length field is incomplete or
    /// disagrees with the number of bytes that follow it.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, Error> {
        let (&header, rest) = bytes.split_first().ok_or(Error::MalformedPacket)?;
        let (len, consumed) = decode_remaining_length(rest)?.ok_or(Error::MalformedPacket)?;
        let body = &rest[consumed..];
        if body.len() != len {
            return Err(Error::MalformedPacket);
        }
        Ok(Self { header, body })
    }

    /// The fixed header byte
    pub fn header(&self) -> u8 {
        self.header
    }

    /// Packet type, if the header carries a known one
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_header(self.header)
    }

    /// Bytes following the remaining-length field
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Leading message id of acknowledgement packets.
    pub fn message_id(&self) -> Option<u16> {
        match self.body {
            [high, low, ..] => Some(u16::from_be_bytes([*high, *low])),
            _ => None,
        }
    }

    /// CONNACK return code, the second byte of the variable header.
    pub fn connack_code(&self) -> Option<u8> {
        self.body.get(1).copied()
    }

    /// Split a PUBLISH body into topic, optional message id and payload.
    ///
    /// # Errors
    ///
    /// * [`Error::MalformedPacket`] - not a PUBLISH, invalid QoS bits, or the
    ///   body is shorter than its topic header
    /// * [`Error::InvalidUtf8`] - the topic is not UTF-8
    pub fn publish(&self) -> Result<InboundPublish<'a>, Error> {
        if self.packet_type() != Some(PacketType::Publish) {
            return Err(Error::MalformedPacket);
        }
        let qos = QoS::from_header(self.header).ok_or(Error::MalformedPacket)?;

        let [high, low, rest @ ..] = self.body else {
            return Err(Error::MalformedPacket);
        };
        let topic_len = usize::from(u16::from_be_bytes([*high, *low]));
        if rest.len() < topic_len {
            return Err(Error::MalformedPacket);
        }
        let (topic, rest) = rest.split_at(topic_len);
        let topic = core::str::from_utf8(topic).map_err(|_| Error::InvalidUtf8)?;

        let (message_id, payload) = match qos {
            QoS::AtMostOnce => (None, rest),
            _ => match rest {
                [high, low, payload @ ..] => (Some(u16::from_be_bytes([*high, *low])), payload),
                _ => return Err(Error::MalformedPacket),
            },
        };

        Ok(InboundPublish {
            topic,
            message_id,
            qos,
            retain: self.header & 0x01 != 0,
            duplicate: self.header & 0x08 != 0,
            payload,
        })
    }
}

/// A PUBLISH received from the broker, borrowed from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundPublish<'a> {
    /// Topic the message was published on
    pub topic: &'a str,
    /// Message id, present for QoS 1 and 2
    pub message_id: Option<u16>,
    /// Delivery guarantee requested by the sender
    pub qos: QoS,
    /// Retained flag
    pub retain: bool,
    /// Duplicate delivery flag
    pub duplicate: bool,
    /// Application payload
    pub payload: &'a [u8],
}
