//! Session data: identity, transient verb operands and runtime flags.
//!
//! Everything a verb hands to the client is copied in here, so the state
//! machine never borrows caller memory across ticks.

use super::config::Options;
use super::keepalive::KeepAlive;
use super::packet::QoS;
use crate::network::error::{Error, ResponseCode};
use heapless::{String, Vec};

/// Longest topic or topic filter accepted
pub const MAX_TOPIC_LEN: usize = 128;
/// Longest client identifier accepted
pub const MAX_CLIENT_ID_LEN: usize = 64;
/// Longest user name or password accepted
pub const MAX_CREDENTIAL_LEN: usize = 64;
/// Longest will message accepted
pub const MAX_WILL_LEN: usize = 128;

/// A last-will message, published by the broker if the client vanishes.
///
/// # Examples
///
/// ```rust
/// use coopmqtt::network::application::mqtt::{QoS, Will};
///
/// let will = Will {
///     topic: "devices/dev1/status",
///     message: b"offline",
///     qos: QoS::AtLeastOnce,
///     retain: true,
/// };
/// assert_eq!(will.topic, "devices/dev1/status");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Will<'a> {
    /// Topic the will is published on
    pub topic: &'a str,
    /// Will payload
    pub message: &'a [u8],
    /// QoS the broker publishes the will with
    pub qos: QoS,
    /// Whether the broker retains the will
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredWill {
    topic: String<MAX_TOPIC_LEN>,
    message: Vec<u8, MAX_WILL_LEN>,
    qos: QoS,
    retain: bool,
}

impl StoredWill {
    pub(crate) fn copy_from(will: &Will<'_>) -> Result<Self, Error> {
        Ok(Self {
            topic: String::try_from(will.topic).map_err(|_| Error::BufferOverflow)?,
            message: Vec::from_slice(will.message).map_err(|_| Error::BufferOverflow)?,
            qos: will.qos,
            retain: will.retain,
        })
    }

    pub(crate) fn as_will(&self) -> Will<'_> {
        Will {
            topic: &self.topic,
            message: &self.message,
            qos: self.qos,
            retain: self.retain,
        }
    }
}

/// Message id allocator. Ids start at 1 and skip 0 on wrap-around.
///
/// # Examples
///
/// ```rust
/// use coopmqtt::network::application::mqtt::MessageIds;
///
/// let mut ids = MessageIds::starting_at(u16::MAX);
/// assert_eq!(ids.allocate(), u16::MAX);
/// assert_eq!(ids.allocate(), 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageIds {
    next: u16,
}

impl Default for MessageIds {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIds {
    /// An allocator whose first id is 1.
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// An allocator whose first id is `first`, or 1 if `first` is 0.
    pub const fn starting_at(first: u16) -> Self {
        Self {
            next: if first == 0 { 1 } else { first },
        }
    }

    /// The id the next allocation returns
    pub fn peek(&self) -> u16 {
        self.next
    }

    /// Take the next id.
    pub fn allocate(&mut self) -> u16 {
        let id = self.next;
        self.next = match self.next.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        id
    }
}

/// State of one MQTT session.
///
/// Created fresh by [`Client::acquire`](crate::Client::acquire); read access
/// is available through [`Client::session`](crate::Client::session).
#[derive(Debug, Clone)]
pub struct Session<const N: usize> {
    pub(crate) options: Options,
    pub(crate) client_id: String<MAX_CLIENT_ID_LEN>,
    pub(crate) username: Option<String<MAX_CREDENTIAL_LEN>>,
    pub(crate) password: Option<String<MAX_CREDENTIAL_LEN>>,
    pub(crate) will: Option<StoredWill>,
    pub(crate) topic: String<MAX_TOPIC_LEN>,
    pub(crate) payload: Vec<u8, N>,
    pub(crate) retain: bool,
    pub(crate) qos: QoS,
    pub(crate) message_id: u16,
    pub(crate) ids: MessageIds,
    pub(crate) connected: bool,
    pub(crate) connected_once: bool,
    pub(crate) response_code: ResponseCode,
    pub(crate) keepalive: KeepAlive,
}

impl<const N: usize> Default for Session<N> {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

impl<const N: usize> Session<N> {
    /// A zeroed session using `options`. Message ids start at 1.
    pub fn new(options: Options) -> Self {
        Self {
            options,
            client_id: String::new(),
            username: None,
            password: None,
            will: None,
            topic: String::new(),
            payload: Vec::new(),
            retain: false,
            qos: QoS::AtMostOnce,
            message_id: 0,
            ids: MessageIds::new(),
            connected: false,
            connected_once: false,
            response_code: ResponseCode::Success,
            keepalive: KeepAlive::new(0),
        }
    }

    /// Active configuration
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Client identifier sent in CONNECT
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// User name sent in CONNECT, if any
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Configured last will, if any
    pub fn will(&self) -> Option<Will<'_>> {
        self.will.as_ref().map(StoredWill::as_will)
    }

    /// Topic of the current or last verb
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Payload of the current or last publish
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the broker has accepted the connection
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the transport came up since the socket was last closed
    pub fn connected_once(&self) -> bool {
        self.connected_once
    }

    /// Last recorded response code
    pub fn response_code(&self) -> ResponseCode {
        self.response_code
    }

    /// Keep-alive state
    pub fn keepalive(&self) -> &KeepAlive {
        &self.keepalive
    }

    pub(crate) fn set_identity(
        &mut self,
        client_id: &str,
        username: &str,
        password: &str,
        will: Option<&Will<'_>>,
    ) -> Result<(), Error> {
        let client_id = String::try_from(client_id).map_err(|_| Error::BufferOverflow)?;
        let username = optional(username)?;
        let password = match username {
            Some(_) => optional(password)?,
            None => None,
        };
        let will = will.map(StoredWill::copy_from).transpose()?;

        self.client_id = client_id;
        self.username = username;
        self.password = password;
        self.will = will;
        Ok(())
    }

    pub(crate) fn set_operands(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Error> {
        let topic = String::try_from(topic).map_err(|_| Error::BufferOverflow)?;
        let payload = Vec::from_slice(payload).map_err(|_| Error::BufferOverflow)?;
        self.topic = topic;
        self.payload = payload;
        self.qos = qos;
        self.retain = retain;
        Ok(())
    }
}

fn optional(text: &str) -> Result<Option<String<MAX_CREDENTIAL_LEN>>, Error> {
    if text.is_empty() {
        return Ok(None);
    }
    String::try_from(text)
        .map(Some)
        .map_err(|_| Error::BufferOverflow)
}
