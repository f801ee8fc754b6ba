//! Single-owner access to a client's session.
//!
//! A [`Client`] is one session slot. Whoever acquires it owns the session
//! until release; a second acquire fails instead of trampling on the first
//! owner's connection. Independent sessions are independent `Client` values,
//! each with its own lock.

use super::client::{Client, PublishHandler};
use crate::network::error::{Error, ResponseCode};
use crate::network::{Clock, Resolver, TcpStack};

/// In-use flag guarding one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionLock {
    in_use: bool,
}

impl SessionLock {
    /// An unlocked session.
    pub const fn new() -> Self {
        Self { in_use: false }
    }

    /// Take the lock; `false` if it is already held.
    pub fn try_acquire(&mut self) -> bool {
        if self.in_use {
            return false;
        }
        self.in_use = true;
        true
    }

    /// Give the lock back; `false` if it was not held.
    pub fn release(&mut self) -> bool {
        core::mem::replace(&mut self.in_use, false)
    }

    /// Whether the lock is held
    pub fn is_held(&self) -> bool {
        self.in_use
    }
}

impl<S, R, C, H, const N: usize> Client<S, R, C, H, N>
where
    S: TcpStack,
    R: Resolver,
    C: Clock,
    H: PublishHandler,
{
    /// Take ownership of the session.
    ///
    /// On success the session is reset: options return to their defaults,
    /// message ids restart at 1 and the phase is Home.
    ///
    /// # Errors
    ///
    /// [`Error::SessionInUse`] if the session is already held.
    pub fn acquire(&mut self) -> Result<(), Error> {
        if !self.lock.try_acquire() {
            warn!("session already in use");
            return Err(Error::SessionInUse);
        }
        self.reset_session();
        debug!("session acquired");
        Ok(())
    }

    /// Give up the session, tearing down whatever it was doing.
    ///
    /// Any name resolution in progress is cancelled, a live broker connection
    /// gets a best-effort DISCONNECT, the socket is closed and the phase
    /// returns to Home, regardless of the phase the session was in.
    ///
    /// Returns the last recorded response code.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyReleased`] if the session was not held.
    pub fn release(&mut self) -> Result<ResponseCode, Error> {
        if !self.lock.is_held() {
            return Err(Error::AlreadyReleased);
        }
        self.abandon();
        self.lock.release();
        let code = self.session.response_code;
        debug!("session released, response code {}", code.as_u16());
        Ok(code)
    }

    /// Whether the session is currently held
    pub fn is_acquired(&self) -> bool {
        self.lock.is_held()
    }
}
