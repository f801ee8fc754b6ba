//! Session configuration.
//!
//! [`Options`] describes which broker to reach and how patiently to wait for
//! it. It deserializes from JSON with `serde-json-core`, so a device can keep
//! its broker settings in flash as a small document:
//!
//! ```rust
//! use coopmqtt::network::application::mqtt::{Options, ProtocolVersion};
//!
//! let options = Options::from_json(br#"{
//!     "server": "broker.local",
//!     "keep_alive_seconds": 15,
//!     "protocol": "v311"
//! }"#).unwrap();
//!
//! assert_eq!(options.server.as_str(), "broker.local");
//! assert_eq!(options.port(), 1883);
//! assert_eq!(options.protocol, ProtocolVersion::V311);
//! assert!(options.clean_session);
//! ```

use crate::network::error::Error;
use heapless::String;
use serde::{Deserialize, Serialize};

/// Longest broker host name accepted
pub const MAX_SERVER_LEN: usize = 64;

/// Default plain TCP port
pub const DEFAULT_PORT: u16 = 1883;
/// Default port for brokers behind TLS
pub const DEFAULT_SECURE_PORT: u16 = 8883;

/// Keep-alive for links that must notice a dead peer within seconds
pub const KEEPALIVE_REALTIME: u16 = 4;
/// Keep-alive for interactive sessions
pub const KEEPALIVE_SHORT: u16 = 15;
/// Keep-alive for battery-powered sensors, and the default
pub const KEEPALIVE_LONG: u16 = 120;

/// Waiting ticks allowed in any phase before the operation is abandoned
pub const DEFAULT_RETRY_LIMIT: u16 = 100;
/// Time allowed for name resolution
pub const DEFAULT_RESOLVE_TIMEOUT_MS: u32 = 6_000;
/// Time allowed for the TCP handshake with the broker
pub const DEFAULT_SERVER_REPLY_TIMEOUT_MS: u32 = 8_000;

/// Protocol name and level announced in CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVersion {
    /// MQTT 3.1, protocol name "MQIsdp", level 3
    #[default]
    V31,
    /// MQTT 3.1.1, protocol name "MQTT", level 4
    V311,
}

impl ProtocolVersion {
    /// Protocol name string
    pub fn name(self) -> &'static str {
        match self {
            ProtocolVersion::V31 => "MQIsdp",
            ProtocolVersion::V311 => "MQTT",
        }
    }

    /// Protocol level byte
    pub fn level(self) -> u8 {
        match self {
            ProtocolVersion::V31 => 3,
            ProtocolVersion::V311 => 4,
        }
    }
}

/// Configuration options for an MQTT session.
///
/// Every field has a default, so a document only needs to name the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Broker host name or dotted IPv4 address
    pub server: String<MAX_SERVER_LEN>,

    /// Broker port; defaults to 1883, or 8883 when `secure` is set
    pub port: Option<u16>,

    /// Request a secured connection.
    ///
    /// Only changes the default port. The transport is responsible for any
    /// TLS framing.
    pub secure: bool,

    /// Keep-alive interval in seconds. 0 disables client pings.
    pub keep_alive_seconds: u16,

    /// Whether to start a clean session
    pub clean_session: bool,

    /// Protocol revision announced in CONNECT
    pub protocol: ProtocolVersion,

    /// Waiting ticks allowed in any phase before giving up
    pub retry_limit: u16,

    /// Milliseconds allowed for name resolution
    pub resolve_timeout_ms: u32,

    /// Milliseconds allowed for the transport connection to come up
    pub server_reply_timeout_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: None,
            secure: false,
            keep_alive_seconds: KEEPALIVE_LONG,
            clean_session: true,
            protocol: ProtocolVersion::V31,
            retry_limit: DEFAULT_RETRY_LIMIT,
            resolve_timeout_ms: DEFAULT_RESOLVE_TIMEOUT_MS,
            server_reply_timeout_ms: DEFAULT_SERVER_REPLY_TIMEOUT_MS,
        }
    }
}

impl Options {
    /// Defaults with the given broker.
    ///
    /// # Errors
    ///
    /// [`Error::BufferOverflow`] if `server` is longer than
    /// [`MAX_SERVER_LEN`].
    pub fn with_server(server: &str) -> Result<Self, Error> {
        let server = String::try_from(server).map_err(|_| Error::BufferOverflow)?;
        Ok(Self {
            server,
            ..Self::default()
        })
    }

    /// Parse options from a JSON document.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] when the document is not valid JSON, has a
    /// field of the wrong type, or a string that does not fit.
    pub fn from_json(json: &[u8]) -> Result<Self, Error> {
        serde_json_core::from_slice::<Self>(json)
            .map(|(options, _)| options)
            .map_err(|_| Error::InvalidConfig)
    }

    /// Serialize the options into `buffer`, returning the bytes used.
    ///
    /// # Errors
    ///
    /// [`Error::BufferOverflow`] if `buffer` is too small.
    pub fn to_json(&self, buffer: &mut [u8]) -> Result<usize, Error> {
        serde_json_core::to_slice(self, buffer).map_err(|_| Error::BufferOverflow)
    }

    /// Port to connect to.
    pub fn port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None if self.secure => DEFAULT_SECURE_PORT,
            None => DEFAULT_PORT,
        }
    }
}
