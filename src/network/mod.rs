//! Network abstraction layer for cooperative embedded clients
//!
//! This module defines the traits the platform implements so the MQTT client
//! can run on any TCP/IP stack: a socket-pool style transport, an asynchronous
//! name resolver and a monotonic tick source. Every method is non-blocking;
//! the client polls them once per scheduler tick.
//!

#![deny(unsafe_code)]

use core::net::Ipv4Addr;

/// Common error types for client operations
pub mod error;

/// Protocol implementations built on the traits below
pub mod application;

/// Re-exports of common traits
pub mod prelude {
    pub use super::{Clock, Resolution, Resolver, TcpStack};
}

/// A socket-pool style TCP transport.
///
/// Sockets are identified by small copyable handles. None of the methods may
/// block: a socket that is still connecting reports `false` from
/// [`is_connected`](TcpStack::is_connected), and a full transmit FIFO reports
/// a small [`write_capacity`](TcpStack::write_capacity).
///
/// # Examples
///
/// ```rust
/// use coopmqtt::network::TcpStack;
/// use core::net::Ipv4Addr;
///
/// struct Loopback {
///     rx: heapless::Deque<u8, 64>,
/// }
///
/// impl TcpStack for Loopback {
///     type Socket = u8;
///     fn open(&mut self, _address: Ipv4Addr, _port: u16) -> Option<u8> { Some(0) }
///     fn is_connected(&mut self, _socket: u8) -> bool { true }
///     fn write_capacity(&mut self, _socket: u8) -> usize { self.rx.capacity() - self.rx.len() }
///     fn write(&mut self, _socket: u8, bytes: &[u8]) -> usize {
///         bytes.iter().take_while(|b| self.rx.push_back(**b).is_ok()).count()
///     }
///     fn flush(&mut self, _socket: u8) {}
///     fn read_available(&mut self, _socket: u8) -> usize { self.rx.len() }
///     fn read_byte(&mut self, _socket: u8) -> Option<u8> { self.rx.pop_front() }
///     fn disconnect(&mut self, _socket: u8) {}
///     fn close(&mut self, _socket: u8) {}
/// }
///
/// let mut stack = Loopback { rx: heapless::Deque::new() };
/// let socket = stack.open(Ipv4Addr::LOCALHOST, 1883).unwrap();
/// assert_eq!(stack.write(socket, &[0xC0, 0x00]), 2);
/// assert_eq!(stack.read_available(socket), 2);
/// assert_eq!(stack.read_byte(socket), Some(0xC0));
/// ```
pub trait TcpStack {
    /// Handle identifying one socket of the pool
    type Socket: Copy + PartialEq + core::fmt::Debug;

    /// Start connecting a socket to `address:port`.
    ///
    /// Returns `None` when the pool has no free socket; the caller retries on
    /// a later tick.
    fn open(&mut self, address: Ipv4Addr, port: u16) -> Option<Self::Socket>;

    /// Whether the TCP handshake has completed and the peer has not gone away
    fn is_connected(&mut self, socket: Self::Socket) -> bool;

    /// Number of bytes the transmit FIFO can accept right now
    fn write_capacity(&mut self, socket: Self::Socket) -> usize;

    /// Queue bytes for transmission, returning how many were accepted
    fn write(&mut self, socket: Self::Socket, bytes: &[u8]) -> usize;

    /// Push queued bytes onto the wire
    fn flush(&mut self, socket: Self::Socket);

    /// Number of received bytes waiting to be read
    fn read_available(&mut self, socket: Self::Socket) -> usize;

    /// Take one received byte
    fn read_byte(&mut self, socket: Self::Socket) -> Option<u8>;

    /// Begin a graceful shutdown of the connection
    fn disconnect(&mut self, socket: Self::Socket);

    /// Return the socket to the pool
    fn close(&mut self, socket: Self::Socket);
}

/// State of an outstanding name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The resolver has not answered yet
    Pending,
    /// The host resolved to this address
    Resolved(Ipv4Addr),
    /// The host could not be resolved
    Failed,
}

/// An asynchronous, single-user name resolver.
///
/// The resolver is a shared platform service: a user must obtain it with
/// [`begin_usage`](Resolver::begin_usage) and hand it back with
/// [`end_usage`](Resolver::end_usage).
pub trait Resolver {
    /// Try to take ownership of the resolver
    fn begin_usage(&mut self) -> bool;

    /// Start resolving `hostname`
    fn resolve(&mut self, hostname: &str);

    /// Poll the outstanding resolution
    fn poll(&mut self) -> Resolution;

    /// Release the resolver, cancelling any outstanding query
    fn end_usage(&mut self);
}

/// A monotonic tick source.
///
/// The counter is allowed to wrap; all elapsed-time arithmetic in this crate
/// is wrapping.
pub trait Clock {
    /// Current tick count
    fn now(&self) -> u32;

    /// Ticks per second, at least 1
    fn ticks_per_second(&self) -> u32;

    /// Convert milliseconds into ticks of this clock
    fn ticks_from_millis(&self, millis: u32) -> u32 {
        let ticks = u64::from(millis) * u64::from(self.ticks_per_second()) / 1000;
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}

/// Ticks elapsed between `since` and `now` on a wrapping counter.
#[inline]
pub fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}
