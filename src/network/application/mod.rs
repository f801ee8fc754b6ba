//! # Application Layer Network Protocols
//!
//! Protocol clients built on the collaborator traits in
//! [`network`](crate::network). Each client owns its transport, resolver and
//! tick source and is advanced cooperatively by the application.
//!
//! ## Available Protocols
//!
//! - **[`mqtt`]**: MQTT 3.1 / 3.1.1 client for publish-subscribe messaging
//!
//! ## Design Principles
//!
//! - **Transport Agnostic**: Work with any [`TcpStack`](crate::network::TcpStack)
//! - **No-std Compatible**: No heap allocation, fixed-size buffers only
//! - **Never Blocking**: Every operation is a resumable state machine
//! - **Error Handling**: Caller mistakes are `Result`s, network outcomes are
//!   recorded response codes

/// MQTT client implementation.
///
/// Provides a cooperative MQTT client for lightweight publish-subscribe
/// messaging on constrained devices.
pub mod mqtt;
