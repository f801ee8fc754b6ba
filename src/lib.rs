//! # coopmqtt - Cooperative MQTT client
//!
//! A Rust MQTT client for resource-constrained devices that talk to a broker
//! over a single streaming transport connection. The client is a resumable,
//! tick-driven protocol driver: the application calls [`Client::task`] once per
//! scheduler tick and the client never blocks, never allocates and survives
//! arbitrary fragmentation of the inbound byte stream.
//!
//! ## Features
//!
//! - **Connection lifecycle**: name resolution, transport connect, CONNECT /
//!   CONNACK handshake, graceful DISCONNECT
//! - **Verbs**: publish (QoS 0/1), subscribe, unsubscribe, ping, PUBACK
//! - **Keep-alive**: automatic PINGREQ with at most one ping outstanding
//! - **Incremental framing**: a reader that reassembles one control packet at
//!   a time across many ticks, dropping frames larger than its buffer
//! - **Bounded buffers**: every write is capacity checked
//!
//! ## Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! coopmqtt = "0.1.0"
//! ```
//!
//! ### Driving the client
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
//! #     fn poll(&mut self) -> Resolution { Resolution::Resolved(Ipv4Addr::LOCALHOST) }
//! #     fn end_usage(&mut self) {}
//! # }
//! # struct Ticks;
//! # impl Clock for Ticks {
//! #     fn now(&self) -> u32 { 0 }
//! #     fn ticks_per_second(&self) -> u32 { 1000 }
//! # }
//!
//! let mut client: Client<_, _, _> = Client::new(Stack, Dns, Ticks);
//! client.acquire()?;
//! client.configure(Options::with_server("broker.local")?)?;
//! client.connect("sensor-01", "", "", None)?;
//!
//! while client.is_busy() {
//!     client.task();
//! }
//! if client.is_connected() {
//!     client.publish("sensors/temperature", b"23.5", QoS::AtMostOnce, false)?;
//! }
//! # Ok::<(), coopmqtt::network::error::Error>(())
//! ```
//!
//! ## Platform Support
//!
//! The crate is `no_std` and allocation free. The transport, the name
//! resolver and the tick source are supplied by the platform through the
//! traits in [`network`].
//!
//! ## Optional Features
//!
//! - `std`: Enable standard library support (default: disabled)
//! - `defmt`: Enable defmt logging and `Format` impls for embedded debugging
//! - `log`: Route the client's diagnostics through the `log` facade

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

#[macro_use]
mod fmt;

/// Network abstraction layer: collaborator interfaces and the MQTT protocol.
///
/// This module contains the traits the platform implements (transport, name
/// resolution, tick source) and the MQTT client that drives them.
pub mod network;

#[doc(inline)]
pub use network::application::mqtt::Client;
