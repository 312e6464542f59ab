//! Connection health tracking for the push channel.
//!
//! Pure state and transitions; the realtime client feeds it connect/failure signals and
//! reads back which transport mode to use.

use chrono::{DateTime, Utc};
use std::num::NonZeroU32;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HealthState {
    /// No live push connection; reconnect attempts continue over push.
    Disconnected,
    Connected,
    /// Failure threshold reached; updates come from periodic polling.
    Polling,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportMode {
    Push,
    Poll,
}

impl core::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportMode::Push => write!(f, "push"),
            TransportMode::Poll => write!(f, "poll"),
        }
    }
}

impl HealthState {
    pub fn mode(self) -> TransportMode {
        match self {
            HealthState::Polling => TransportMode::Poll,
            HealthState::Connected | HealthState::Disconnected => TransportMode::Push,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: HealthState,
    pub to: HealthState,
}

impl Transition {
    pub fn mode_changed(&self) -> bool {
        self.from.mode() != self.to.mode()
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    state: HealthState,
    consecutive_failures: u32,
    threshold: NonZeroU32,
    last_known_good: Option<DateTime<Utc>>,
}

impl ConnectionHealth {
    pub fn new(threshold: NonZeroU32) -> Self {
        ConnectionHealth {
            state: HealthState::Disconnected,
            consecutive_failures: 0,
            threshold,
            last_known_good: None,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn mode(&self) -> TransportMode {
        self.state.mode()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn threshold(&self) -> NonZeroU32 {
        self.threshold
    }

    pub fn last_known_good(&self) -> Option<DateTime<Utc>> {
        self.last_known_good
    }

    /// A push connection was established (first connect, reconnect or probe).
    pub fn on_connected(&mut self, now: DateTime<Utc>) -> Transition {
        self.consecutive_failures = 0;
        self.last_known_good = Some(now);
        self.move_to(HealthState::Connected)
    }

    /// A connect attempt failed or a live connection dropped.
    pub fn on_failure(&mut self) -> Transition {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let next = if self.state == HealthState::Polling || self.consecutive_failures >= self.threshold.get() {
            HealthState::Polling
        } else {
            HealthState::Disconnected
        };
        self.move_to(next)
    }

    fn move_to(&mut self, to: HealthState) -> Transition {
        let from = self.state;
        self.state = to;
        Transition { from, to }
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        ConnectionHealth::new(NonZeroU32::new(DEFAULT_FAILURE_THRESHOLD).unwrap_or(NonZeroU32::MIN))
    }
}
