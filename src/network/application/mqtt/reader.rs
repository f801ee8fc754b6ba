//! Resumable frame assembler.
//!
//! [`ReaderCursor::poll`] pulls whatever bytes are available and returns as
//! soon as the source runs dry. All progress lives in the cursor, so a frame
//! may arrive one byte per tick and still be reassembled intact.

use super::packet::{FrameBuffer, PacketType, RemainingLength};
use crate::network::TcpStack;
use crate::network::error::Error;

/// Bytes that must be waiting before a new frame is started.
///
/// Two is the smallest complete control packet (PINGRESP, DISCONNECT).
pub const MIN_FRAME_BYTES: usize = 2;

/// A non-blocking byte stream.
pub trait ByteSource {
    /// Bytes that can be read right now
    fn available(&mut self) -> usize;

    /// Take one byte, `None` when nothing is waiting
    fn read_byte(&mut self) -> Option<u8>;
}

/// Adapts one socket of a [`TcpStack`] to [`ByteSource`].
#[derive(Debug)]
pub struct SocketSource<'a, S: TcpStack> {
    stack: &'a mut S,
    socket: S::Socket,
}

impl<'a, S: TcpStack> SocketSource<'a, S> {
    /// Read from `socket` on `stack`.
    pub fn new(stack: &'a mut S, socket: S::Socket) -> Self {
        Self { stack, socket }
    }
}

impl<S: TcpStack> ByteSource for SocketSource<'_, S> {
    fn available(&mut self) -> usize {
        self.stack.read_available(self.socket)
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.stack.read_byte(self.socket)
    }
}

/// Outcome of one [`ReaderCursor::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The frame is not complete yet
    Pending,
    /// A frame was assembled. The value is its length in the buffer, or 0
    /// when the frame was larger than the buffer and has been dropped.
    Complete(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadPhase {
    Start,
    Length,
    Topic,
    Body,
}

/// Progress through the frame currently being assembled.
#[derive(Debug, Clone)]
pub struct ReaderCursor {
    phase: ReadPhase,
    header: u8,
    length: RemainingLength,
    remaining: usize,
    frame_len: usize,
    topic_len: u16,
    topic_digits: u8,
    skip: usize,
    overflow: bool,
}

impl Default for ReaderCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderCursor {
    /// A cursor waiting for the start of a frame.
    pub const fn new() -> Self {
        Self {
            phase: ReadPhase::Start,
            header: 0,
            length: RemainingLength::new(),
            remaining: 0,
            frame_len: 0,
            topic_len: 0,
            topic_digits: 0,
            skip: 0,
            overflow: false,
        }
    }

    /// Abandon any partial frame.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Whether the cursor sits between frames
    pub fn is_idle(&self) -> bool {
        self.phase == ReadPhase::Start
    }

    /// For the last PUBLISH, the offset of the application payload within the
    /// body: topic length field, topic, and the message id when QoS > 0.
    pub fn payload_offset(&self) -> usize {
        self.skip
    }

    /// Advance the current frame with whatever `source` has to offer.
    ///
    /// Bytes that do not fit in `buffer` are still consumed from the stream,
    /// keeping it aligned on frame boundaries, but are never stored; such a
    /// frame completes with length 0.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedPacket`] for a remaining-length field longer than four
    /// digits or a PUBLISH too short for its own topic header. The cursor is
    /// reset; the stream is no longer aligned and should be dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use coopmqtt::network::application::mqtt::FrameBuffer;
    /// use coopmqtt::network::application::mqtt::reader::{ByteSource, ReadStatus, ReaderCursor};
    ///
    /// struct Bytes<'a>(&'a [u8]);
    /// impl ByteSource for Bytes<'_> {
    ///     fn available(&mut self) -> usize { self.0.len() }
    ///     fn read_byte(&mut self) -> Option<u8> {
    ///         let (&first, rest) = self.0.split_first()?;
    ///         self.0 = rest;
    ///         Some(first)
    ///     }
    /// }
    ///
    /// let mut cursor = ReaderCursor::new();
    /// let mut buffer: FrameBuffer<16> = FrameBuffer::new();
    ///
    /// assert_eq!(cursor.poll(&mut Bytes(&[0x20, 0x02, 0x00]), &mut buffer), Ok(ReadStatus::Pending));
    /// assert_eq!(cursor.poll(&mut Bytes(&[0x00]), &mut buffer), Ok(ReadStatus::Complete(4)));
    /// assert_eq!(buffer.as_slice(), &[0x20, 0x02, 0x00, 0x00]);
    /// ```
    pub fn poll<B: ByteSource, const N: usize>(
        &mut self,
        source: &mut B,
        buffer: &mut FrameBuffer<N>,
    ) -> Result<ReadStatus, Error> {
        loop {
            match self.phase {
                ReadPhase::Start => {
                    if source.available() < MIN_FRAME_BYTES {
                        return Ok(ReadStatus::Pending);
                    }
                    let Some(byte) = source.read_byte() else {
                        return Ok(ReadStatus::Pending);
                    };
                    self.reset();
                    buffer.clear();
                    self.header = byte;
                    self.store(buffer, byte);
                    self.phase = ReadPhase::Length;
                }
                ReadPhase::Length => {
                    let Some(byte) = source.read_byte() else {
                        return Ok(ReadStatus::Pending);
                    };
                    self.store(buffer, byte);
                    let length = match self.length.push(byte) {
                        Ok(Some(length)) => length,
                        Ok(None) => continue,
                        Err(e) => return self.fail(buffer, e),
                    };
                    self.remaining = length;
                    self.frame_len = 1 + self.length.digits() + length;
                    if self.frame_len > N {
                        self.overflow = true;
                    }
                    if PacketType::from_header(self.header) == Some(PacketType::Publish) {
                        if length < 2 {
                            return self.fail(buffer, Error::MalformedPacket);
                        }
                        self.phase = ReadPhase::Topic;
                    } else {
                        self.phase = ReadPhase::Body;
                    }
                }
                ReadPhase::Topic => {
                    let Some(byte) = source.read_byte() else {
                        return Ok(ReadStatus::Pending);
                    };
                    self.store(buffer, byte);
                    self.remaining -= 1;
                    self.topic_len = (self.topic_len << 8) | u16::from(byte);
                    self.topic_digits += 1;
                    if self.topic_digits == 2 {
                        let id_len = if self.header & 0x06 != 0 { 2 } else { 0 };
                        self.skip = 2 + usize::from(self.topic_len) + id_len;
                        if self.skip > self.frame_len - 1 - self.length.digits() {
                            return self.fail(buffer, Error::MalformedPacket);
                        }
                        self.phase = ReadPhase::Body;
                    }
                }
                ReadPhase::Body => {
                    if self.remaining == 0 {
                        return Ok(ReadStatus::Complete(self.complete(buffer)));
                    }
                    let Some(byte) = source.read_byte() else {
                        return Ok(ReadStatus::Pending);
                    };
                    self.store(buffer, byte);
                    self.remaining -= 1;
                }
            }
        }
    }

    fn store<const N: usize>(&mut self, buffer: &mut FrameBuffer<N>, byte: u8) {
        if !self.overflow && buffer.push(byte).is_err() {
            self.overflow = true;
        }
    }

    fn complete<const N: usize>(&mut self, buffer: &mut FrameBuffer<N>) -> usize {
        self.phase = ReadPhase::Start;
        if self.overflow {
            warn!("dropped {} byte frame, buffer holds {}", self.frame_len, N);
            buffer.clear();
            return 0;
        }
        buffer.len()
    }

    fn fail<const N: usize>(
        &mut self,
        buffer: &mut FrameBuffer<N>,
        error: Error,
    ) -> Result<ReadStatus, Error> {
        error!("malformed frame, header {}", self.header);
        self.reset();
        buffer.clear();
        Err(error)
    }
}
