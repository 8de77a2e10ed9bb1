// src/bridge/state.rs - Bridge lifecycle phases
use std::fmt;

use tft_shared::{ConnectionState, LinkEvent, LinkKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    Idle,
    /// Waiting for the first successful poll.
    ApiConnecting,
    /// Waiting for the panel port to open.
    SerialConnecting,
    Bridging,
    /// One or both links are failing after both had come up; last-known data
    /// keeps being served.
    Degraded,
    Terminated,
}

impl fmt::Display for BridgePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgePhase::Idle => "idle",
            BridgePhase::ApiConnecting => "api-connecting",
            BridgePhase::SerialConnecting => "serial-connecting",
            BridgePhase::Bridging => "bridging",
            BridgePhase::Degraded => "degraded",
            BridgePhase::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Pure event-driven state machine. It never retries anything itself; the
/// links run their own backoff loops and only report transitions here.
#[derive(Debug, Clone)]
pub struct BridgeStateMachine {
    phase: BridgePhase,
    api: ConnectionState,
    serial: ConnectionState,
    api_seen_up: bool,
    serial_seen_up: bool,
}

impl Default for BridgeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeStateMachine {
    pub fn new() -> Self {
        Self {
            phase: BridgePhase::Idle,
            api: ConnectionState::Disconnected,
            serial: ConnectionState::Disconnected,
            api_seen_up: false,
            serial_seen_up: false,
        }
    }

    pub fn phase(&self) -> BridgePhase {
        self.phase
    }

    pub fn link_state(&self, link: LinkKind) -> ConnectionState {
        match link {
            LinkKind::Api => self.api,
            LinkKind::Serial => self.serial,
        }
    }

    /// Commands are being answered (possibly from stale data).
    pub fn is_bridging(&self) -> bool {
        matches!(self.phase, BridgePhase::Bridging | BridgePhase::Degraded)
    }

    pub fn start(&mut self) -> Option<BridgePhase> {
        if self.phase != BridgePhase::Idle {
            return None;
        }
        self.set(self.derive())
    }

    pub fn on_link_event(&mut self, event: LinkEvent) -> Option<BridgePhase> {
        if self.phase == BridgePhase::Terminated {
            return None;
        }
        match event.link {
            LinkKind::Api => {
                self.api = event.state;
                self.api_seen_up |= event.state == ConnectionState::Connected;
            }
            LinkKind::Serial => {
                self.serial = event.state;
                self.serial_seen_up |= event.state == ConnectionState::Connected;
            }
        }
        if self.phase == BridgePhase::Idle {
            return None;
        }
        self.set(self.derive())
    }

    pub fn terminate(&mut self) -> Option<BridgePhase> {
        self.set(BridgePhase::Terminated)
    }

    fn derive(&self) -> BridgePhase {
        if !self.api_seen_up {
            BridgePhase::ApiConnecting
        } else if !self.serial_seen_up {
            BridgePhase::SerialConnecting
        } else if self.api == ConnectionState::Connected && self.serial == ConnectionState::Connected {
            BridgePhase::Bridging
        } else {
            BridgePhase::Degraded
        }
    }

    fn set(&mut self, next: BridgePhase) -> Option<BridgePhase> {
        if self.phase == next {
            return None;
        }
        self.phase = next;
        Some(next)
    }
}
