//! Connection lifecycle state machine.
//!
//! Pure bookkeeping: no sockets and no timers. The session actor drives it
//! with transport events and acts on what each transition returns.
//!
//! ```text
//!   start ──► Connecting ──opened──► Open
//!                 ▲   │                │
//!   begin_connect │   └──closed──┐     │ closed
//!                 │              ▼     ▼
//!                 └───────────── Closed
//! ```
//!
//! Every `closed` bumps the reconnect attempt counter; every `opened` resets
//! it. `shutdown` moves to `Closed` without asking for a reconnect.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Outcome of a transport closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closure {
    /// The attempt number the reconnect delay was computed for.
    pub attempt: u32,
    /// How long to wait before the next `begin_connect`.
    pub reconnect_in: Duration,
}

#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    attempt: u32,
    policy: ReconnectPolicy,
}

impl ConnectionLifecycle {
    /// A lifecycle that is already `Connecting`, as a fresh session is.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Connecting,
            attempt: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive closures since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// `Closed → Connecting`. Returns false (and changes nothing) while a
    /// handshake is already in flight or the connection is open.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// `Connecting → Open`. Returns false if no handshake was in flight, in
    /// which case the open is stale and the caller should drop it.
    pub fn opened(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Open;
        self.attempt = 0;
        true
    }

    /// `Connecting | Open → Closed` with reconnect scheduling.
    ///
    /// Returns `None` if the lifecycle was already closed.
    pub fn closed(&mut self) -> Option<Closure> {
        self.closed_with(|policy, attempt| policy.delay(attempt))
    }

    /// Like [`closed`](Self::closed) but with the delay computed by `delay`,
    /// so callers can pin the jitter.
    pub fn closed_with(
        &mut self,
        delay: impl FnOnce(&ReconnectPolicy, u32) -> Duration,
    ) -> Option<Closure> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        self.state = ConnectionState::Closed;
        let attempt = self.attempt;
        self.attempt = self.attempt.saturating_add(1);
        Some(Closure {
            attempt,
            reconnect_in: delay(&self.policy, attempt),
        })
    }

    /// Explicit teardown: `Closed` without a reconnect. Returns whether the
    /// state changed.
    pub fn shutdown(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Closed;
        true
    }
}
