//! Common error types for client operations

use core::fmt;

/// A common error type for client operations.
///
/// This enum defines the errors the MQTT client reports through `Result`s.
/// It is designed to be simple and portable for `no_std` environments.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The session is already held by another user.
    SessionInUse,
    /// An operation was attempted without holding the session.
    NotAcquired,
    /// The session was released twice.
    AlreadyReleased,
    /// Another operation occupies the state machine.
    Busy,
    /// The operation requires an accepted broker connection.
    NotConnected,
    /// A keep-alive ping is already awaiting its response.
    PingOutstanding,
    /// The requested quality of service is not supported.
    UnsupportedQos,
    /// Message id 0 is reserved.
    InvalidMessageId,
    /// A value did not fit in its fixed-capacity buffer.
    BufferOverflow,
    /// A remaining length exceeded 268,435,455.
    LengthOutOfRange,
    /// An inbound packet was not correctly formed.
    MalformedPacket,
    /// A topic was not valid UTF-8.
    InvalidUtf8,
    /// The transport accepted fewer bytes than it advertised.
    WriteError,
    /// A configuration document could not be parsed.
    InvalidConfig,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Error::SessionInUse => "session already in use",
            Error::NotAcquired => "session not acquired",
            Error::AlreadyReleased => "session already released",
            Error::Busy => "client busy",
            Error::NotConnected => "not connected to broker",
            Error::PingOutstanding => "ping already outstanding",
            Error::UnsupportedQos => "unsupported quality of service",
            Error::InvalidMessageId => "invalid message id",
            Error::BufferOverflow => "buffer overflow",
            Error::LengthOutOfRange => "remaining length out of range",
            Error::MalformedPacket => "malformed packet",
            Error::InvalidUtf8 => "invalid UTF-8",
            Error::WriteError => "transport write error",
            Error::InvalidConfig => "invalid configuration",
        };
        f.write_str(text)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::SessionInUse => defmt::write!(f, "SessionInUse"),
            Error::NotAcquired => defmt::write!(f, "NotAcquired"),
            Error::AlreadyReleased => defmt::write!(f, "AlreadyReleased"),
            Error::Busy => defmt::write!(f, "Busy"),
            Error::NotConnected => defmt::write!(f, "NotConnected"),
            Error::PingOutstanding => defmt::write!(f, "PingOutstanding"),
            Error::UnsupportedQos => defmt::write!(f, "UnsupportedQos"),
            Error::InvalidMessageId => defmt::write!(f, "InvalidMessageId"),
            Error::BufferOverflow => defmt::write!(f, "BufferOverflow"),
            Error::LengthOutOfRange => defmt::write!(f, "LengthOutOfRange"),
            Error::MalformedPacket => defmt::write!(f, "MalformedPacket"),
            Error::InvalidUtf8 => defmt::write!(f, "InvalidUtf8"),
            Error::WriteError => defmt::write!(f, "WriteError"),
            Error::InvalidConfig => defmt::write!(f, "InvalidConfig"),
        }
    }
}

/// The last response code recorded by a session.
///
/// Codes are locally absorbed outcomes: the state machine records one and
/// returns to a resting phase, and the caller inspects it through
/// [`Client::response_code`](crate::Client::response_code) or the value
/// returned by [`Client::release`](crate::Client::release). The numeric
/// values are stable and can be reported upstream as-is.
///
/// # Examples
///
/// ```rust
/// use coopmqtt::network::error::ResponseCode;
///
/// assert_eq!(ResponseCode::from_connack(0), ResponseCode::Success);
/// assert_eq!(ResponseCode::from_connack(4), ResponseCode::BadCredentials);
/// assert_eq!(ResponseCode::BadCredentials.as_u16(), 0x8104);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[repr(u16)]
pub enum ResponseCode {
    /// The last operation succeeded.
    #[default]
    Success = 0x0000,
    /// The broker host name could not be resolved.
    ResolveError = 0x8000,
    /// The transport connection failed or was lost.
    ConnectError = 0x8001,
    /// CONNACK 1: unacceptable protocol version.
    BadProtocol = 0x8101,
    /// CONNACK 2: client identifier rejected.
    IdentifierRejected = 0x8102,
    /// CONNACK 3: server unavailable.
    ServerUnavailable = 0x8103,
    /// CONNACK 4: bad user name or password.
    BadCredentials = 0x8104,
    /// CONNACK 5: not authorized.
    NotAuthorized = 0x8105,
    /// A verb ran without an accepted connection or could not be encoded.
    OperationFailed = 0x8201,
    /// The broker sent something the client could not interpret.
    ProtocolError = 0x8202,
    /// A waiting phase exceeded its retry bound.
    Timeout = 0x8203,
}

impl ResponseCode {
    /// Map a CONNACK return code onto a response code.
    pub fn from_connack(code: u8) -> Self {
        match code {
            0 => ResponseCode::Success,
            1 => ResponseCode::BadProtocol,
            2 => ResponseCode::IdentifierRejected,
            3 => ResponseCode::ServerUnavailable,
            4 => ResponseCode::BadCredentials,
            5 => ResponseCode::NotAuthorized,
            _ => ResponseCode::ProtocolError,
        }
    }

    /// The numeric value of the code
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether the code reports success
    pub fn is_success(self) -> bool {
        self == ResponseCode::Success
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ResponseCode {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ResponseCode::Success => defmt::write!(f, "Success"),
            ResponseCode::ResolveError => defmt::write!(f, "ResolveError"),
            ResponseCode::ConnectError => defmt::write!(f, "ConnectError"),
            ResponseCode::BadProtocol => defmt::write!(f, "BadProtocol"),
            ResponseCode::IdentifierRejected => defmt::write!(f, "IdentifierRejected"),
            ResponseCode::ServerUnavailable => defmt::write!(f, "ServerUnavailable"),
            ResponseCode::BadCredentials => defmt::write!(f, "BadCredentials"),
            ResponseCode::NotAuthorized => defmt::write!(f, "NotAuthorized"),
            ResponseCode::OperationFailed => defmt::write!(f, "OperationFailed"),
            ResponseCode::ProtocolError => defmt::write!(f, "ProtocolError"),
            ResponseCode::Timeout => defmt::write!(f, "Timeout"),
        }
    }
}
