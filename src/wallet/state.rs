//! Per-wallet tracking state machine
//!
//! ```text
//! Unregistered --connect--> Connecting --first poll ok--> Active
//! Active --N consecutive failures--> Degraded --poll ok--> Active
//! Degraded --failures reach hard cap--> Stopped
//! any --stop / fatal error--> Stopped --connect--> Connecting
//! ```
//!
//! `transition` is pure; the tracker persists whatever it returns.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletState {
    Unregistered,
    Connecting,
    Active,
    Degraded,
    Stopped,
}

impl WalletState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletState::Unregistered => "unregistered",
            WalletState::Connecting => "connecting",
            WalletState::Active => "active",
            WalletState::Degraded => "degraded",
            WalletState::Stopped => "stopped",
        }
    }

    /// States in which the wallet has a live polling task
    pub fn is_monitored(&self) -> bool {
        matches!(
            self,
            WalletState::Connecting | WalletState::Active | WalletState::Degraded
        )
    }
}

impl FromStr for WalletState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unregistered" => Ok(WalletState::Unregistered),
            "connecting" => Ok(WalletState::Connecting),
            "active" => Ok(WalletState::Active),
            "degraded" => Ok(WalletState::Degraded),
            "stopped" => Ok(WalletState::Stopped),
            other => Err(format!("unknown wallet state: {}", other)),
        }
    }
}

/// Snapshot of one tracked wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSubscription {
    pub address: String,
    pub state: WalletState,
    pub last_poll_ts: Option<i64>,
    /// Highest block number already ingested; never decreases
    pub tx_cursor: Option<u64>,
    pub alert_count: u64,
    pub tx_count: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl WalletSubscription {
    pub fn unregistered(address: &str) -> Self {
        Self {
            address: address.to_string(),
            state: WalletState::Unregistered,
            last_poll_ts: None,
            tx_cursor: None,
            alert_count: 0,
            tx_count: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletEvent {
    Connect,
    PollSucceeded,
    /// Carries the consecutive failure count including this one
    PollFailed { consecutive: u32 },
    FatalError,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureThresholds {
    pub degrade_after: u32,
    pub stop_after: u32,
}

impl Default for FailureThresholds {
    fn default() -> Self {
        Self {
            degrade_after: 5,
            stop_after: 10,
        }
    }
}

pub fn transition(state: WalletState, event: WalletEvent, limits: FailureThresholds) -> WalletState {
    use WalletState::*;

    match (state, event) {
        (Unregistered | Stopped, WalletEvent::Connect) => Connecting,
        (Connecting | Active | Degraded, WalletEvent::Connect) => state,

        // Stale results from a poll that raced a stop
        (Unregistered | Stopped, _) => state,

        (_, WalletEvent::Stop) | (_, WalletEvent::FatalError) => Stopped,

        (Connecting | Active | Degraded, WalletEvent::PollSucceeded) => Active,

        (Connecting, WalletEvent::PollFailed { consecutive }) => {
            if consecutive >= limits.stop_after {
                Stopped
            } else {
                Connecting
            }
        }
        (Active, WalletEvent::PollFailed { consecutive }) => {
            if consecutive >= limits.stop_after {
                Stopped
            } else if consecutive >= limits.degrade_after {
                Degraded
            } else {
                Active
            }
        }
        (Degraded, WalletEvent::PollFailed { consecutive }) => {
            if consecutive >= limits.stop_after {
                Stopped
            } else {
                Degraded
            }
        }
    }
}
