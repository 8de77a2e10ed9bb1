//! Link-level connection state.

use std::fmt;

use crate::backoff::{Backoff, BackoffPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but recent polls or writes failed. The panel keeps showing
    /// last-known data while a link is in this state.
    Degraded,
}

impl ConnectionState {
    /// Whether the link can still serve (possibly stale) data.
    pub fn is_usable(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Api,
    Serial,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Api => f.write_str("api"),
            LinkKind::Serial => f.write_str("serial"),
        }
    }
}

/// A state transition reported by a link's own retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEvent {
    pub link: LinkKind,
    pub state: ConnectionState,
}

impl LinkEvent {
    pub fn new(link: LinkKind, state: ConnectionState) -> Self {
        Self { link, state }
    }
}

/// Consecutive-failure bookkeeping for one link.
///
/// `record_*` return `Some(state)` only when the state actually changed, so
/// callers report transitions and not every tick.
#[derive(Debug, Clone)]
pub struct LinkHealth {
    kind: LinkKind,
    state: ConnectionState,
    failures: u32,
    backoff: Backoff,
}

impl LinkHealth {
    pub fn new(kind: LinkKind, policy: BackoffPolicy) -> Self {
        Self {
            kind,
            state: ConnectionState::Disconnected,
            failures: 0,
            backoff: Backoff::new(policy),
        }
    }

    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// In backoff mode the retry loop waits on [`LinkHealth::next_retry_delay`]
    /// instead of its normal cadence.
    pub fn in_backoff(&self) -> bool {
        matches!(self.state, ConnectionState::Disconnected | ConnectionState::Connecting) && self.failures > 0
    }

    pub fn next_retry_delay(&mut self) -> std::time::Duration {
        self.backoff.next_delay()
    }

    pub fn mark_connecting(&mut self) -> Option<ConnectionState> {
        self.transition(ConnectionState::Connecting)
    }

    pub fn record_success(&mut self) -> Option<ConnectionState> {
        self.failures = 0;
        self.backoff.reset();
        self.transition(ConnectionState::Connected)
    }

    /// A failed poll or write on a link that was up. Stays Degraded up to the
    /// policy threshold, then drops to Disconnected.
    pub fn record_failure(&mut self) -> Option<ConnectionState> {
        self.failures = self.failures.saturating_add(1);
        let was_up = self.state.is_usable();
        let next = if was_up && self.failures <= self.backoff.policy().degraded_threshold {
            ConnectionState::Degraded
        } else {
            ConnectionState::Disconnected
        };
        self.transition(next)
    }

    /// The link is known to be gone (port closed, read error).
    pub fn record_lost(&mut self) -> Option<ConnectionState> {
        self.failures = self.failures.saturating_add(1);
        self.transition(ConnectionState::Disconnected)
    }

    fn transition(&mut self, next: ConnectionState) -> Option<ConnectionState> {
        if self.state == next {
            return None;
        }
        tracing::debug!("{} link: {} -> {}", self.kind, self.state, next);
        self.state = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health() -> LinkHealth {
        LinkHealth::new(LinkKind::Api, BackoffPolicy { degraded_threshold: 2, ..Default::default() })
    }

    #[test]
    fn test_failures_degrade_then_disconnect() {
        let mut h = health();
        assert_eq!(h.record_success(), Some(ConnectionState::Connected));
        assert_eq!(h.record_failure(), Some(ConnectionState::Degraded));
        assert_eq!(h.record_failure(), None);
        assert_eq!(h.state(), ConnectionState::Degraded);
        assert_eq!(h.record_failure(), Some(ConnectionState::Disconnected));
        assert_eq!(h.consecutive_failures(), 3);
        assert!(h.in_backoff());
    }

    #[test]
    fn test_success_resets_counter() {
        let mut h = health();
        h.record_success();
        for _ in 0..5 {
            h.record_failure();
        }
        h.next_retry_delay();
        assert_eq!(h.record_success(), Some(ConnectionState::Connected));
        assert_eq!(h.consecutive_failures(), 0);
        assert!(!h.in_backoff());
    }

    #[test]
    fn test_failure_before_first_connect_is_disconnected() {
        let mut h = health();
        h.mark_connecting();
        assert_eq!(h.record_failure(), Some(ConnectionState::Disconnected));
    }

    #[test]
    fn test_lost_link_disconnects_immediately() {
        let mut h = health();
        h.record_success();
        assert_eq!(h.record_lost(), Some(ConnectionState::Disconnected));
    }
}
