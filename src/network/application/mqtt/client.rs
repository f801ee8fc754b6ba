//! The connection state machine.
//!
//! [`Client`] owns the transport, the resolver and the tick source, and
//! advances one session a little on every [`Client::task`] call. Verbs only
//! record what to do next; the work happens in `task`, which never blocks.
//!
//! # Lifecycle
//!
//! ```text
//! Home -> Begin -> NameResolve -> ObtainTransport -> TransportObtained
//!      -> Connect -> ConnectAck -> Idle
//!
//! Idle -> Publish -> PublishAck -> Idle
//! Idle -> Subscribe -> SubscribeAck -> Idle
//! Idle -> Unsubscribe -> UnsubscribeAck -> Idle
//! Idle -> Ping | PingAck | PubAck -> Idle
//! Idle -> DisconnectInit -> Disconnect -> Close -> Quit -> Home
//! ```
//!
//! Only Home and Idle accept a new verb. A phase that waits longer than the
//! configured retry limit is abandoned: the socket is closed, the failure is
//! recorded as the response code and the phase returns to Home. There is no
//! automatic reconnect.

use super::config::{DEFAULT_RETRY_LIMIT, Options};
use super::encoder::{self, ConnectPacket, HEADER_RESERVE};
use super::keepalive::RetryCounter;
use super::lock::SessionLock;
use super::packet::{Frame, FrameBuffer, MAX_PACKET_SIZE, PacketType, QoS};
use super::reader::{ReadStatus, ReaderCursor, SocketSource};
use super::session::{Session, Will};
use crate::network::error::{Error, ResponseCode};
use crate::network::{Clock, Resolution, Resolver, TcpStack, elapsed};
use core::fmt;
use core::net::Ipv4Addr;
use heapless::Deque;

/// PUBACKs that can be owed while an acknowledgement is awaited
const MAX_DEFERRED_ACKS: usize = 4;

/// Receives PUBLISH messages from the broker.
///
/// Implemented for every `FnMut(&str, &[u8])`, so a closure is usually all
/// that is needed. The handler runs synchronously inside [`Client::task`].
pub trait PublishHandler {
    /// Called once per inbound PUBLISH.
    fn on_publish(&mut self, topic: &str, payload: &[u8]);
}

impl<F> PublishHandler for F
where
    F: FnMut(&str, &[u8]),
{
    fn on_publish(&mut self, topic: &str, payload: &[u8]) {
        self(topic, payload)
    }
}

/// A handler that discards every message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoHandler;

impl PublishHandler for NoHandler {
    fn on_publish(&mut self, _topic: &str, _payload: &[u8]) {}
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Not connected; ready for `connect`
    #[default]
    Home,
    /// Starting name resolution
    Begin,
    /// Waiting for the resolver
    NameResolve,
    /// Waiting for a free socket
    ObtainTransport,
    /// Waiting for the TCP handshake
    TransportObtained,
    /// Sending CONNECT
    Connect,
    /// Waiting for CONNACK
    ConnectAck,
    /// Connected and ready for a verb
    Idle,
    /// Sending PINGREQ
    Ping,
    /// Sending PINGRESP
    PingAck,
    /// Sending PUBLISH
    Publish,
    /// Waiting for PUBACK
    PublishAck,
    /// Sending SUBSCRIBE
    Subscribe,
    /// Waiting for SUBACK
    SubscribeAck,
    /// Sending PUBACK
    PubAck,
    /// Sending UNSUBSCRIBE
    Unsubscribe,
    /// Waiting for UNSUBACK
    UnsubscribeAck,
    /// Disconnect requested
    DisconnectInit,
    /// Sending DISCONNECT
    Disconnect,
    /// Shutting the transport down
    Close,
    /// Returning the socket
    Quit,
}

impl Phase {
    /// Whether a new verb may start from this phase
    pub fn is_resting(self) -> bool {
        matches!(self, Phase::Home | Phase::Idle)
    }

    /// Short name for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Phase::Home => "Home",
            Phase::Begin => "Begin",
            Phase::NameResolve => "NameResolve",
            Phase::ObtainTransport => "ObtainTransport",
            Phase::TransportObtained => "TransportObtained",
            Phase::Connect => "Connect",
            Phase::ConnectAck => "ConnectAck",
            Phase::Idle => "Idle",
            Phase::Ping => "Ping",
            Phase::PingAck => "PingAck",
            Phase::Publish => "Publish",
            Phase::PublishAck => "PublishAck",
            Phase::Subscribe => "Subscribe",
            Phase::SubscribeAck => "SubscribeAck",
            Phase::PubAck => "PubAck",
            Phase::Unsubscribe => "Unsubscribe",
            Phase::UnsubscribeAck => "UnsubscribeAck",
            Phase::DisconnectInit => "DisconnectInit",
            Phase::Disconnect => "Disconnect",
            Phase::Close => "Close",
            Phase::Quit => "Quit",
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Phase {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}", self.name())
    }
}

/// Result of running the current phase once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Nothing to do this tick
    Rest,
    /// Still waiting; counts against the retry limit
    Wait,
    /// Move on, next tick
    Goto(Phase),
    /// Move on and run the next phase in this tick
    Continue(Phase),
}

/// A cooperative MQTT client for one broker session.
///
/// # Type Parameters
///
/// * `S` - the platform [`TcpStack`]
/// * `R` - the platform [`Resolver`]
/// * `C` - the platform [`Clock`]
/// * `H` - the [`PublishHandler`] for inbound messages
/// * `N` - capacity of the transmit and receive frame buffers
///
/// # Examples
///
/// ```rust
/// use coopmqtt::network::application::mqtt::{Client, Phase};
/// use coopmqtt::network::error::Error;
/// # use coopmqtt::network::{Clock, Resolution, Resolver, TcpStack};
/// # use core::net::Ipv4Addr;
/// # struct Stack;
/// # impl TcpStack for Stack {
/// #     type Socket = u8;
/// #     fn open(&mut self, _: Ipv4Addr, _: u16) -> Option<u8> { None }
/// #     fn is_connected(&mut self, _: u8) -> bool { false }
/// #     fn write_capacity(&mut self, _: u8) -> usize { 0 }
/// #     fn write(&mut self, _: u8, _: &[u8]) -> usize { 0 }
/// #     fn flush(&mut self, _: u8) {}
/// #     fn read_available(&mut self, _: u8) -> usize { 0 }
/// #     fn read_byte(&mut self, _: u8) -> Option<u8> { None }
/// #     fn disconnect(&mut self, _: u8) {}
/// #     fn close(&mut self, _: u8) {}
/// # }
/// # struct Dns;
/// # impl Resolver for Dns {
/// #     fn begin_usage(&mut self) -> bool { true }
/// #     fn resolve(&mut self, _: &str) {}
/// #     fn poll(&mut self) -> Resolution { Resolution::Pending }
/// #     fn end_usage(&mut self) {}
/// # }
/// # struct Ticks;
/// # impl Clock for Ticks {
/// #     fn now(&self) -> u32 { 0 }
/// #     fn ticks_per_second(&self) -> u32 { 100 }
/// # }
///
/// let mut client: Client<_, _, _> = Client::new(Stack, Dns, Ticks);
/// assert_eq!(client.connect("dev1", "", "", None), Err(Error::NotAcquired));
///
/// client.acquire()?;
/// assert_eq!(client.acquire(), Err(Error::SessionInUse));
///
/// // no broker configured: the attempt ends at Home straight away
/// client.connect("dev1", "", "", None)?;
/// assert_eq!(client.task(), Phase::Home);
/// # Ok::<(), Error>(())
/// ```
pub struct Client<S, R, C, H = NoHandler, const N: usize = MAX_PACKET_SIZE>
where
    S: TcpStack,
{
    stack: S,
    resolver: R,
    clock: C,
    handler: Option<H>,
    pub(super) lock: SessionLock,
    pub(super) session: Session<N>,
    phase: Phase,
    reader: ReaderCursor,
    rx: FrameBuffer<N>,
    tx: FrameBuffer<N>,
    retries: RetryCounter,
    socket: Option<S::Socket>,
    address: Option<Ipv4Addr>,
    resolving: bool,
    timer: u32,
    deferred_acks: Deque<u16, MAX_DEFERRED_ACKS>,
    pingresp_owed: bool,
}

impl<S, R, C, H, const N: usize> fmt::Debug for Client<S, R, C, H, N>
where
    S: TcpStack,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("phase", &self.phase)
            .field("acquired", &self.lock.is_held())
            .field("connected", &self.session.connected)
            .field("socket", &self.socket)
            .field("response_code", &self.session.response_code)
            .finish_non_exhaustive()
    }
}

impl<S, R, C, H, const N: usize> Client<S, R, C, H, N>
where
    S: TcpStack,
    R: Resolver,
    C: Clock,
    H: PublishHandler,
{
    /// A client with no inbound message handler.
    ///
    /// The session starts unacquired; call [`acquire`](Self::acquire) first.
    pub fn new(stack: S, resolver: R, clock: C) -> Self {
        Self::build(stack, resolver, clock, None)
    }

    /// A client that passes inbound PUBLISH messages to `handler`.
    pub fn with_handler(stack: S, resolver: R, clock: C, handler: H) -> Self {
        Self::build(stack, resolver, clock, Some(handler))
    }

    fn build(stack: S, resolver: R, clock: C, handler: Option<H>) -> Self {
        Self {
            stack,
            resolver,
            clock,
            handler,
            lock: SessionLock::new(),
            session: Session::default(),
            phase: Phase::Home,
            reader: ReaderCursor::new(),
            rx: FrameBuffer::new(),
            tx: FrameBuffer::new(),
            retries: RetryCounter::new(DEFAULT_RETRY_LIMIT),
            socket: None,
            address: None,
            resolving: false,
            timer: 0,
            deferred_acks: Deque::new(),
            pingresp_owed: false,
        }
    }

    /// Replace the session's configuration.
    ///
    /// # Errors
    ///
    /// * [`Error::NotAcquired`] - the session is not held
    /// * [`Error::Busy`] - a connection attempt or session is in progress
    pub fn configure(&mut self, options: Options) -> Result<(), Error> {
        self.ensure_acquired()?;
        if self.phase != Phase::Home {
            return Err(Error::Busy);
        }
        if options.secure {
            warn!("secure session requested, TLS is left to the transport");
        }
        self.session.options = options;
        self.apply_options();
        Ok(())
    }

    /// Start connecting to the configured broker.
    ///
    /// Empty `username` or `password` mean "not supplied"; a password is only
    /// sent together with a user name. Progress happens in
    /// [`task`](Self::task): the attempt ends in Idle with
    /// [`is_connected`](Self::is_connected) telling success from refusal, or
    /// back in Home with a failure [`response_code`](Self::response_code).
    ///
    /// # Errors
    ///
    /// * [`Error::NotAcquired`] - the session is not held
    /// * [`Error::Busy`] - the session is not at Home
    /// * [`Error::BufferOverflow`] - an identity field is too long
    pub fn connect(
        &mut self,
        client_id: &str,
        username: &str,
        password: &str,
        will: Option<&Will<'_>>,
    ) -> Result<(), Error> {
        self.ensure_acquired()?;
        if self.phase != Phase::Home {
            return Err(Error::Busy);
        }
        self.session
            .set_identity(client_id, username, password, will)?;
        self.session.connected = false;
        self.session.response_code = ResponseCode::Success;
        self.enter(Phase::Begin);
        Ok(())
    }

    /// Publish `payload` on `topic`.
    ///
    /// QoS 1 messages get a fresh message id and the client waits for the
    /// broker's acknowledgement before returning to Idle.
    ///
    /// # Errors
    ///
    /// * [`Error::NotConnected`] - no accepted connection; the response code
    ///   becomes [`ResponseCode::OperationFailed`]
    /// * [`Error::Busy`] - another operation is in progress
    /// * [`Error::UnsupportedQos`] - QoS 2 was requested
    /// * [`Error::BufferOverflow`] - the packet would not fit in `N` bytes
    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), Error> {
        self.ensure_ready()?;
        if qos == QoS::ExactlyOnce {
            return Err(Error::UnsupportedQos);
        }
        let id_len = if qos == QoS::AtMostOnce { 0 } else { 2 };
        self.ensure_fits(2 + topic.len() + id_len + payload.len())?;
        self.session.set_operands(topic, payload, qos, retain)?;
        self.session.message_id = match qos {
            QoS::AtMostOnce => 0,
            _ => self.session.ids.allocate(),
        };
        self.enter(Phase::Publish);
        Ok(())
    }

    /// Subscribe to a topic filter.
    ///
    /// # Errors
    ///
    /// As for [`publish`](Self::publish).
    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Error> {
        self.ensure_ready()?;
        if qos == QoS::ExactlyOnce {
            return Err(Error::UnsupportedQos);
        }
        self.ensure_fits(2 + 2 + topic.len() + 1)?;
        self.session.set_operands(topic, &[], qos, false)?;
        self.session.message_id = self.session.ids.allocate();
        self.enter(Phase::Subscribe);
        Ok(())
    }

    /// Unsubscribe from a topic filter.
    ///
    /// # Errors
    ///
    /// As for [`publish`](Self::publish).
    pub fn unsubscribe(&mut self, topic: &str) -> Result<(), Error> {
        self.ensure_ready()?;
        self.ensure_fits(2 + 2 + topic.len())?;
        self.session.set_operands(topic, &[], QoS::AtMostOnce, false)?;
        self.session.message_id = self.session.ids.allocate();
        self.enter(Phase::Unsubscribe);
        Ok(())
    }

    /// Send a PINGREQ now instead of waiting for the keep-alive timer.
    ///
    /// # Errors
    ///
    /// [`Error::PingOutstanding`] while an earlier ping is unanswered, plus
    /// the connection errors of [`publish`](Self::publish).
    pub fn ping(&mut self) -> Result<(), Error> {
        self.ensure_ready()?;
        if self.session.keepalive.ping_outstanding() {
            return Err(Error::PingOutstanding);
        }
        let now = self.clock.now();
        self.session.keepalive.mark_ping_sent(now);
        self.enter(Phase::Ping);
        Ok(())
    }

    /// Acknowledge a QoS 1 message by id.
    ///
    /// Inbound QoS 1 messages are acknowledged automatically; this is for
    /// callers that need to repeat an acknowledgement.
    pub fn puback(&mut self, message_id: u16) -> Result<(), Error> {
        self.ensure_ready()?;
        if message_id == 0 {
            return Err(Error::InvalidMessageId);
        }
        self.session.message_id = message_id;
        self.enter(Phase::PubAck);
        Ok(())
    }

    /// Close the session gracefully: DISCONNECT, then shut the transport.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        self.ensure_ready()?;
        self.enter(Phase::DisconnectInit);
        Ok(())
    }

    /// Run the state machine for one scheduler tick.
    ///
    /// Never blocks. Returns the phase the session is in afterwards.
    pub fn task(&mut self) -> Phase {
        loop {
            match self.step() {
                Step::Rest => break,
                Step::Wait => {
                    if self.retries.tick() {
                        self.expire();
                    }
                    break;
                }
                Step::Goto(next) => {
                    self.enter(next);
                    break;
                }
                Step::Continue(next) => self.enter(next),
            }
        }
        self.phase
    }

    fn step(&mut self) -> Step {
        match self.phase {
            Phase::Home => Step::Rest,
            Phase::Begin => self.begin(),
            Phase::NameResolve => self.name_resolve(),
            Phase::ObtainTransport => self.obtain_transport(),
            Phase::TransportObtained => self.transport_obtained(),
            Phase::Connect => self.send_connect(),
            Phase::ConnectAck => self.connect_ack(),
            Phase::Idle => self.idle(),
            Phase::Ping => self.send_fixed(&encoder::PINGREQ),
            Phase::PingAck => self.send_fixed(&encoder::PINGRESP),
            Phase::Publish => self.send_publish(),
            Phase::PublishAck => {
                if self.session.qos == QoS::AtMostOnce {
                    self.session.response_code = ResponseCode::Success;
                    Step::Goto(Phase::Idle)
                } else {
                    self.await_ack(PacketType::PubAck)
                }
            }
            Phase::Subscribe => self.send_subscribe(),
            Phase::SubscribeAck => self.await_ack(PacketType::SubAck),
            Phase::PubAck => self.send_puback(),
            Phase::Unsubscribe => self.send_unsubscribe(),
            Phase::UnsubscribeAck => self.await_ack(PacketType::UnsubAck),
            Phase::DisconnectInit => {
                info!("disconnecting from broker");
                Step::Continue(Phase::Disconnect)
            }
            Phase::Disconnect => self.send_disconnect(),
            Phase::Close => {
                if let Some(socket) = self.socket {
                    self.stack.disconnect(socket);
                }
                self.session.connected = false;
                self.session.connected_once = false;
                Step::Goto(Phase::Quit)
            }
            Phase::Quit => {
                if let Some(socket) = self.socket.take() {
                    self.stack.close(socket);
                }
                self.reader.reset();
                self.deferred_acks.clear();
                self.pingresp_owed = false;
                Step::Goto(Phase::Home)
            }
        }
    }

    fn begin(&mut self) -> Step {
        let server = &self.session.options.server;
        if server.is_empty() {
            warn!("no broker configured");
            self.session.response_code = ResponseCode::ResolveError;
            return Step::Goto(Phase::Home);
        }
        if let Ok(address) = server.parse::<Ipv4Addr>() {
            self.address = Some(address);
            return Step::Continue(Phase::ObtainTransport);
        }
        if !self.resolver.begin_usage() {
            return Step::Wait;
        }
        self.resolver.resolve(server);
        self.resolving = true;
        self.timer = self.clock.now();
        Step::Goto(Phase::NameResolve)
    }

    fn name_resolve(&mut self) -> Step {
        match self.resolver.poll() {
            Resolution::Resolved(address) => {
                self.finish_resolving();
                let [a, b, c, d] = address.octets();
                debug!("broker resolved to {}.{}.{}.{}", a, b, c, d);
                self.address = Some(address);
                Step::Continue(Phase::ObtainTransport)
            }
            Resolution::Failed => {
                self.finish_resolving();
                warn!("broker name could not be resolved");
                self.session.response_code = ResponseCode::ResolveError;
                Step::Goto(Phase::Home)
            }
            Resolution::Pending => {
                let limit = self
                    .clock
                    .ticks_from_millis(self.session.options.resolve_timeout_ms);
                if elapsed(self.clock.now(), self.timer) > limit {
                    self.finish_resolving();
                    warn!("broker name resolution timed out");
                    self.session.response_code = ResponseCode::ResolveError;
                    Step::Goto(Phase::Home)
                } else {
                    Step::Wait
                }
            }
        }
    }

    fn obtain_transport(&mut self) -> Step {
        let Some(address) = self.address else {
            self.session.response_code = ResponseCode::ConnectError;
            return Step::Goto(Phase::Home);
        };
        match self.stack.open(address, self.session.options.port()) {
            Some(socket) => {
                self.socket = Some(socket);
                self.timer = self.clock.now();
                Step::Continue(Phase::TransportObtained)
            }
            None => Step::Wait,
        }
    }

    fn transport_obtained(&mut self) -> Step {
        let Some(socket) = self.socket else {
            self.session.response_code = ResponseCode::ConnectError;
            return Step::Goto(Phase::Home);
        };
        if self.stack.is_connected(socket) {
            self.session.connected_once = true;
            return Step::Continue(Phase::Connect);
        }
        let limit = self
            .clock
            .ticks_from_millis(self.session.options.server_reply_timeout_ms);
        if self.session.connected_once || elapsed(self.clock.now(), self.timer) > limit {
            warn!("transport connection to broker failed");
            self.session.response_code = ResponseCode::ConnectError;
            return Step::Goto(Phase::Close);
        }
        Step::Wait
    }

    fn send_connect(&mut self) -> Step {
        let session = &self.session;
        let packet = ConnectPacket {
            protocol: session.options.protocol,
            clean_session: session.options.clean_session,
            keep_alive_seconds: session.options.keep_alive_seconds,
            client_id: &session.client_id,
            will: session.will(),
            username: session.username(),
            password: session.password.as_deref(),
        };
        let sent = match self.socket {
            Some(socket) => encoder::connect(&mut self.tx, &packet)
                .and_then(|frame| encoder::transmit(&mut self.stack, socket, frame)),
            None => Err(Error::NotConnected),
        };
        self.after_send(sent, Step::Goto(Phase::ConnectAck))
    }

    fn connect_ack(&mut self) -> Step {
        match self.poll_frame() {
            Ok(true) => {}
            Ok(false) => return Step::Wait,
            Err(_) => return self.protocol_error(),
        }
        let (kind, code) = match Frame::parse(self.rx.as_slice()) {
            Ok(frame) => (frame.packet_type(), frame.connack_code()),
            Err(_) => return self.protocol_error(),
        };
        if kind != Some(PacketType::ConnAck) {
            debug!("ignoring frame while waiting for CONNACK");
            return Step::Wait;
        }

        let response = code.map_or(ResponseCode::ProtocolError, ResponseCode::from_connack);
        self.session.response_code = response;
        if response.is_success() {
            self.session.connected = true;
            let now = self.clock.now();
            self.session.keepalive.reset(now);
            info!("broker accepted connection");
        } else {
            self.session.connected = false;
            warn!("broker refused connection, code {}", response.as_u16());
        }
        Step::Goto(Phase::Idle)
    }

    fn idle(&mut self) -> Step {
        if !self.session.connected {
            return Step::Rest;
        }
        if let Some(socket) = self.socket {
            if !self.stack.is_connected(socket) {
                warn!("transport to broker lost");
                self.session.connected = false;
                self.session.response_code = ResponseCode::ConnectError;
                return Step::Goto(Phase::Close);
            }
        }
        if let Some(step) = self.take_deferred() {
            return step;
        }

        let now = self.clock.now();
        if self.session.keepalive.ping_due(now, true) {
            self.session.keepalive.mark_ping_sent(now);
            trace!("keep-alive ping due");
            return Step::Goto(Phase::Ping);
        }

        match self.poll_frame() {
            Ok(true) => {
                self.dispatch();
                self.take_deferred().unwrap_or(Step::Rest)
            }
            Ok(false) => Step::Rest,
            Err(_) => self.protocol_error(),
        }
    }

    fn send_fixed(&mut self, frame: &[u8]) -> Step {
        let sent = match self.socket {
            Some(socket) => encoder::transmit(&mut self.stack, socket, frame),
            None => Err(Error::NotConnected),
        };
        self.after_send(sent, Step::Goto(Phase::Idle))
    }

    fn send_publish(&mut self) -> Step {
        if let Some(step) = self.require_connection() {
            return step;
        }
        let session = &self.session;
        let id = (session.qos != QoS::AtMostOnce).then_some(session.message_id);
        let sent = match self.socket {
            Some(socket) => encoder::publish(
                &mut self.tx,
                &session.topic,
                id,
                &session.payload,
                session.qos,
                session.retain,
            )
            .and_then(|frame| encoder::transmit(&mut self.stack, socket, frame)),
            None => Err(Error::NotConnected),
        };
        self.after_send(sent, Step::Continue(Phase::PublishAck))
    }

    fn send_subscribe(&mut self) -> Step {
        if let Some(step) = self.require_connection() {
            return step;
        }
        let session = &self.session;
        let sent = match self.socket {
            Some(socket) => {
                encoder::subscribe(&mut self.tx, session.message_id, &session.topic, session.qos)
                    .and_then(|frame| encoder::transmit(&mut self.stack, socket, frame))
            }
            None => Err(Error::NotConnected),
        };
        self.after_send(sent, Step::Goto(Phase::SubscribeAck))
    }

    fn send_unsubscribe(&mut self) -> Step {
        if let Some(step) = self.require_connection() {
            return step;
        }
        let session = &self.session;
        let sent = match self.socket {
            Some(socket) => encoder::unsubscribe(&mut self.tx, session.message_id, &session.topic)
                .and_then(|frame| encoder::transmit(&mut self.stack, socket, frame)),
            None => Err(Error::NotConnected),
        };
        self.after_send(sent, Step::Goto(Phase::UnsubscribeAck))
    }

    fn send_puback(&mut self) -> Step {
        if let Some(step) = self.require_connection() {
            return step;
        }
        let sent = match self.socket {
            Some(socket) => encoder::puback(&mut self.tx, self.session.message_id)
                .and_then(|frame| encoder::transmit(&mut self.stack, socket, frame)),
            None => Err(Error::NotConnected),
        };
        self.after_send(sent, Step::Goto(Phase::Idle))
    }

    fn send_disconnect(&mut self) -> Step {
        let sent = match self.socket {
            Some(socket) => encoder::transmit(&mut self.stack, socket, &encoder::DISCONNECT),
            None => Ok(true),
        };
        match sent {
            Ok(true) => {
                let now = self.clock.now();
                self.session.keepalive.record_outbound(now);
                self.session.connected = false;
                Step::Goto(Phase::Close)
            }
            Ok(false) => Step::Wait,
            Err(_) => {
                self.session.connected = false;
                self.session.response_code = ResponseCode::ConnectError;
                Step::Goto(Phase::Close)
            }
        }
    }

    fn await_ack(&mut self, expected: PacketType) -> Step {
        match self.poll_frame() {
            Ok(true) => {}
            Ok(false) => return Step::Wait,
            Err(_) => return self.protocol_error(),
        }
        let kind = Frame::parse(self.rx.as_slice())
            .ok()
            .and_then(|frame| frame.packet_type());
        if kind != Some(expected) {
            self.dispatch();
        }
        self.session.response_code = ResponseCode::Success;
        Step::Goto(Phase::Idle)
    }

    /// Act on the frame in the receive buffer.
    fn dispatch(&mut self) {
        let frame = match Frame::parse(self.rx.as_slice()) {
            Ok(frame) => frame,
            Err(_) => {
                warn!("discarding unparseable frame");
                return;
            }
        };
        match frame.packet_type() {
            Some(PacketType::Publish) => match frame.publish() {
                Ok(publish) => {
                    trace!(
                        "PUBLISH on {} with {} byte payload",
                        publish.topic,
                        publish.payload.len()
                    );
                    if let Some(handler) = self.handler.as_mut() {
                        handler.on_publish(publish.topic, publish.payload);
                    }
                    if let (QoS::AtLeastOnce, Some(id)) = (publish.qos, publish.message_id) {
                        if self.deferred_acks.push_back(id).is_err() {
                            warn!("PUBACK backlog full, dropping ack for {}", id);
                        }
                    }
                }
                Err(e) => warn!("discarding PUBLISH: {}", e),
            },
            Some(PacketType::PingReq) => self.pingresp_owed = true,
            Some(PacketType::PingResp) => {
                let now = self.clock.now();
                self.session.keepalive.pong_received(now);
            }
            _ => debug!("ignoring frame with header {}", frame.header()),
        }
    }

    fn take_deferred(&mut self) -> Option<Step> {
        if core::mem::take(&mut self.pingresp_owed) {
            return Some(Step::Goto(Phase::PingAck));
        }
        let id = self.deferred_acks.pop_front()?;
        self.session.message_id = id;
        Some(Step::Goto(Phase::PubAck))
    }

    fn poll_frame(&mut self) -> Result<bool, Error> {
        let Some(socket) = self.socket else {
            return Ok(false);
        };
        let mut source = SocketSource::new(&mut self.stack, socket);
        match self.reader.poll(&mut source, &mut self.rx)? {
            ReadStatus::Pending => Ok(false),
            ReadStatus::Complete(len) => {
                let now = self.clock.now();
                self.session.keepalive.record_inbound(now);
                Ok(len > 0)
            }
        }
    }

    fn after_send(&mut self, sent: Result<bool, Error>, next: Step) -> Step {
        match sent {
            Ok(true) => {
                let now = self.clock.now();
                self.session.keepalive.record_outbound(now);
                next
            }
            Ok(false) => Step::Wait,
            Err(Error::WriteError | Error::NotConnected) => {
                error!("transport write failed in {}", self.phase.name());
                self.session.connected = false;
                self.session.response_code = ResponseCode::ConnectError;
                Step::Goto(Phase::Close)
            }
            Err(e) => {
                error!("could not encode packet: {}", e);
                self.session.response_code = ResponseCode::OperationFailed;
                if self.session.connected {
                    Step::Goto(Phase::Idle)
                } else {
                    Step::Goto(Phase::Close)
                }
            }
        }
    }

    fn require_connection(&mut self) -> Option<Step> {
        if self.session.connected {
            return None;
        }
        self.session.response_code = ResponseCode::OperationFailed;
        Some(Step::Goto(Phase::Idle))
    }

    fn protocol_error(&mut self) -> Step {
        error!("protocol error in {}, closing connection", self.phase.name());
        self.session.connected = false;
        self.session.response_code = ResponseCode::ProtocolError;
        Step::Goto(Phase::Close)
    }

    fn enter(&mut self, next: Phase) {
        if next != self.phase {
            trace!("phase {} -> {}", self.phase.name(), next.name());
            self.phase = next;
            self.retries.reset();
        }
    }

    fn expire(&mut self) {
        let code = match self.phase {
            Phase::Begin | Phase::NameResolve => ResponseCode::ResolveError,
            Phase::ObtainTransport | Phase::TransportObtained => ResponseCode::ConnectError,
            _ => ResponseCode::Timeout,
        };
        warn!(
            "{} gave up after {} ticks",
            self.phase.name(),
            self.retries.count()
        );
        self.teardown();
        self.session.response_code = code;
        self.enter(Phase::Home);
    }

    fn finish_resolving(&mut self) {
        if self.resolving {
            self.resolver.end_usage();
            self.resolving = false;
        }
    }

    fn teardown(&mut self) {
        self.finish_resolving();
        if let Some(socket) = self.socket.take() {
            self.stack.disconnect(socket);
            self.stack.close(socket);
        }
        self.session.connected = false;
        self.session.connected_once = false;
        self.reader.reset();
        self.rx.clear();
        self.deferred_acks.clear();
        self.pingresp_owed = false;
    }

    /// Tear the session down from any phase, saying goodbye to the broker if
    /// it is still listening.
    pub(super) fn abandon(&mut self) {
        if self.session.connected {
            if let Some(socket) = self.socket {
                if let Ok(true) = encoder::transmit(&mut self.stack, socket, &encoder::DISCONNECT) {
                    let now = self.clock.now();
                    self.session.keepalive.record_outbound(now);
                }
            }
        }
        self.teardown();
        self.enter(Phase::Home);
    }

    pub(super) fn reset_session(&mut self) {
        self.session = Session::new(Options::default());
        self.apply_options();
        self.phase = Phase::Home;
        self.reader.reset();
        self.rx.clear();
        self.tx.clear();
        self.address = None;
        self.timer = 0;
        self.deferred_acks.clear();
        self.pingresp_owed = false;
    }

    fn apply_options(&mut self) {
        let seconds = u32::from(self.session.options.keep_alive_seconds);
        self.session
            .keepalive
            .set_interval(seconds.saturating_mul(self.clock.ticks_per_second()));
        self.retries = RetryCounter::new(self.session.options.retry_limit);
    }

    fn ensure_acquired(&self) -> Result<(), Error> {
        if self.lock.is_held() {
            Ok(())
        } else {
            Err(Error::NotAcquired)
        }
    }

    fn ensure_ready(&mut self) -> Result<(), Error> {
        self.ensure_acquired()?;
        if !self.phase.is_resting() {
            return Err(Error::Busy);
        }
        if self.phase != Phase::Idle || !self.session.connected {
            self.session.response_code = ResponseCode::OperationFailed;
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    fn ensure_fits(&self, body_len: usize) -> Result<(), Error> {
        if HEADER_RESERVE + body_len > N {
            return Err(Error::BufferOverflow);
        }
        Ok(())
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether an operation is in progress and verbs would be refused
    pub fn is_busy(&self) -> bool {
        !self.phase.is_resting()
    }

    /// Whether the session rests in Idle
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Whether the broker has accepted the connection
    pub fn is_connected(&self) -> bool {
        self.session.connected
    }

    /// Last recorded response code
    pub fn response_code(&self) -> ResponseCode {
        self.session.response_code
    }

    /// Whether a PINGREQ is awaiting its PINGRESP
    pub fn ping_outstanding(&self) -> bool {
        self.session.keepalive.ping_outstanding()
    }

    /// Message id of the current or most recent operation, 0 for none
    pub fn message_id(&self) -> u16 {
        self.session.message_id
    }

    /// Message id the next publish, subscribe or unsubscribe will use
    pub fn next_message_id(&self) -> u16 {
        self.session.ids.peek()
    }

    /// Tick of the last frame received
    pub fn last_inbound(&self) -> u32 {
        self.session.keepalive.last_inbound()
    }

    /// Tick of the last frame sent
    pub fn last_outbound(&self) -> u32 {
        self.session.keepalive.last_outbound()
    }

    /// Session state
    pub fn session(&self) -> &Session<N> {
        &self.session
    }

    /// Active configuration
    pub fn options(&self) -> &Options {
        &self.session.options
    }

    /// The transport
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// The transport, mutably
    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    /// The name resolver
    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// The name resolver, mutably
    pub fn resolver_mut(&mut self) -> &mut R {
        &mut self.resolver
    }

    /// The tick source
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Install or replace the inbound message handler.
    pub fn set_handler(&mut self, handler: H) {
        self.handler = Some(handler);
    }

    /// The inbound message handler, if one is installed
    pub fn handler_mut(&mut self) -> Option<&mut H> {
        self.handler.as_mut()
    }
}
