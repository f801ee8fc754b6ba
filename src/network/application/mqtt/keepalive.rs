//! Activity timestamps, ping policy and the retry bound shared by every
//! waiting phase.

use crate::network::elapsed;

/// Keep-alive bookkeeping for one session.
///
/// All timestamps are ticks of the client's [`Clock`](crate::network::Clock);
/// comparisons use wrapping arithmetic so a counter roll-over is harmless.
///
/// # Examples
///
/// ```rust
/// use coopmqtt::network::application::mqtt::KeepAlive;
///
/// let mut keepalive = KeepAlive::new(100);
/// keepalive.reset(0);
/// assert!(!keepalive.ping_due(99, true));
/// assert!(keepalive.ping_due(100, true));
///
/// keepalive.mark_ping_sent(100);
/// assert!(!keepalive.ping_due(500, true));
/// keepalive.pong_received(510);
/// assert!(keepalive.ping_due(600, true));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    interval: u32,
    last_inbound: u32,
    last_outbound: u32,
    last_ping: u32,
    ping_outstanding: bool,
}

impl KeepAlive {
    /// Keep-alive with a ping interval of `interval` ticks; 0 disables pings.
    pub const fn new(interval: u32) -> Self {
        Self {
            interval,
            last_inbound: 0,
            last_outbound: 0,
            last_ping: 0,
            ping_outstanding: false,
        }
    }

    /// Change the ping interval.
    pub fn set_interval(&mut self, interval: u32) {
        self.interval = interval;
    }

    /// Ping interval in ticks
    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Restart all timers at `now` and forget any outstanding ping.
    pub fn reset(&mut self, now: u32) {
        self.last_inbound = now;
        self.last_outbound = now;
        self.last_ping = now;
        self.ping_outstanding = false;
    }

    /// Whether a PINGREQ should go out: the session is connected, no ping is
    /// outstanding and at least one interval has passed since the last ping.
    pub fn ping_due(&self, now: u32, connected: bool) -> bool {
        connected
            && !self.ping_outstanding
            && self.interval != 0
            && elapsed(now, self.last_ping) >= self.interval
    }

    /// A ping has been committed to; no other goes out until the response.
    pub fn mark_ping_sent(&mut self, now: u32) {
        self.ping_outstanding = true;
        self.last_ping = now;
    }

    /// PINGRESP arrived.
    pub fn pong_received(&mut self, now: u32) {
        self.ping_outstanding = false;
        self.last_inbound = now;
    }

    /// A frame arrived from the broker.
    pub fn record_inbound(&mut self, now: u32) {
        self.last_inbound = now;
    }

    /// A frame was handed to the transport.
    pub fn record_outbound(&mut self, now: u32) {
        self.last_outbound = now;
    }

    /// Whether a PINGREQ is awaiting its PINGRESP
    pub fn ping_outstanding(&self) -> bool {
        self.ping_outstanding
    }

    /// Tick of the last inbound frame
    pub fn last_inbound(&self) -> u32 {
        self.last_inbound
    }

    /// Tick of the last outbound frame
    pub fn last_outbound(&self) -> u32 {
        self.last_outbound
    }

    /// Tick the last ping was committed to
    pub fn last_ping(&self) -> u32 {
        self.last_ping
    }
}

/// Counts scheduler ticks spent waiting in one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter {
    count: u16,
    limit: u16,
}

impl RetryCounter {
    /// A counter that expires after `limit` waiting ticks.
    pub const fn new(limit: u16) -> Self {
        Self { count: 0, limit }
    }

    /// Count one more waiting tick; `true` once the limit is exceeded.
    pub fn tick(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count > self.limit
    }

    /// Start counting again from zero.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Change the limit, keeping the current count.
    pub fn set_limit(&mut self, limit: u16) {
        self.limit = limit;
    }

    /// Waiting ticks counted so far
    pub fn count(&self) -> u16 {
        self.count
    }

    /// The configured bound
    pub fn limit(&self) -> u16 {
        self.limit
    }
}
