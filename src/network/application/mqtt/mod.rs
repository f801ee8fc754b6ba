//! MQTT 3.1 / 3.1.1 client for cooperative, tick-driven devices.
//!
//! This module provides an MQTT client designed for devices without threads
//! or heap: one [`Client`] holds one broker session and is advanced by calling
//! [`Client::task`] from the application's main loop.
//!
//! # Protocol Overview
//!
//! MQTT uses a publish-subscribe pattern where:
//! - **Publishers** send messages to topics
//! - **Subscribers** receive messages from topics they're interested in
//! - **Brokers** route messages between publishers and subscribers
//!
//! # Key Features
//!
//! - MQTT 3.1 ("MQIsdp") by default, MQTT 3.1.1 on request
//! - Quality of Service 0 and 1, including automatic PUBACK for inbound QoS 1
//! - Last will, user name and password
//! - Keep-alive pings with at most one ping outstanding
//! - A frame reader that survives arbitrary fragmentation
//! - Fixed-size buffers; oversized inbound frames are dropped, never overrun
//!
//! # Usage
//!
//! ```rust,no_run
//! use coopmqtt::network::application::mqtt::{Client, Options, QoS};
//! # use coopmqtt::network::{Clock, Resolution, Resolver, TcpStack};
//! # use core::net::Ipv4Addr;
//! # struct Stack;
//! # impl TcpStack for Stack {
//! #     type Socket = u8;
//! #     fn open(&mut self, _: Ipv4Addr, _: u16) -> Option<u8> { Some(0) }
//! #     fn is_connected(&mut self, _: u8) -> bool { true }
//! #     fn write_capacity(&mut self, _: u8) -> usize { 1024 }
//! #     fn write(&mut self, _: u8, bytes: &[u8]) -> usize { bytes.len() }
//! #     fn flush(&mut self, _: u8) {}
//! #     fn read_available(&mut self, _: u8) -> usize { 0 }
//! #     fn read_byte(&mut self, _: u8) -> Option<u8> { None }
//! #     fn disconnect(&mut self, _: u8) {}
//! #     fn close(&mut self, _: u8) {}
//! # }
//! # struct Dns;
//! # impl Resolver for Dns {
//! #     fn begin_usage(&mut self) -> bool { true }
//! #     fn resolve(&mut self, _: &str) {}
//! #     fn poll(&mut self) -> Resolution { Resolution::Pending }
//! #     fn end_usage(&mut self) {}
//! # }
//! # struct Ticks;
//! # impl Clock for Ticks {
//! #     fn now(&self) -> u32 { 0 }
//! #     fn ticks_per_second(&self) -> u32 { 1000 }
//! # }
//!
//! let on_message = |topic: &str, payload: &[u8]| {
//!     let _ = (topic, payload);
//! };
//! let mut client: Client<_, _, _, _> = Client::with_handler(Stack, Dns, Ticks, on_message);
//!
//! client.acquire()?;
//! client.configure(Options::with_server("192.168.1.10")?)?;
//! client.connect("thermostat", "", "", None)?;
//! while client.is_busy() {
//!     client.task();
//! }
//!
//! client.subscribe("commands/thermostat", QoS::AtLeastOnce)?;
//! for _ in 0..1_000 {
//!     client.task();
//! }
//! # Ok::<(), coopmqtt::network::error::Error>(())
//! ```

/// The connection state machine and the verbs that drive it.
pub mod client;

/// Session configuration and its JSON form.
pub mod config;

/// Control packet builders and whole-frame transmission.
pub mod encoder;

/// Keep-alive timing and the retry bound.
pub mod keepalive;

/// Single-owner session lock.
pub mod lock;

/// Packet types, the remaining-length codec and frame views.
pub mod packet;

/// Resumable inbound frame assembly.
pub mod reader;

/// Session data model and message id allocation.
pub mod session;

pub use client::{Client, NoHandler, Phase, PublishHandler};
pub use config::{
    KEEPALIVE_LONG, KEEPALIVE_REALTIME, KEEPALIVE_SHORT, Options, ProtocolVersion,
};
pub use keepalive::{KeepAlive, RetryCounter};
pub use lock::SessionLock;
pub use packet::{Frame, FrameBuffer, InboundPublish, MAX_PACKET_SIZE, PacketType, QoS};
pub use reader::{ByteSource, ReadStatus, ReaderCursor};
pub use session::{MessageIds, Session, Will};
