//! Wallet monitoring
//!
//! - `state` - pure per-wallet state machine
//! - `tracker` - registry, polling tasks and persistence

pub mod state;
pub mod tracker;

pub use state::{FailureThresholds, WalletState, WalletSubscription};
pub use tracker::{WalletError, WalletTracker};
