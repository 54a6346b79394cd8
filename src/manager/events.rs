//! Manager lifecycle states, event notifications, and sync bookkeeping

use std::fmt;

use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::types::{TransferHash, TransferState};

/// Lifecycle state of a [`WalletManager`](crate::manager::WalletManager).
///
/// ```text
/// created ──> connected <──> syncing
///                │  ▲
///                ▼  │
///            disconnected
///                │
///                ▼
///             stopped (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    /// Constructed and loaded from disk, background task not yet running
    Created,
    /// Background task running, periodic and on-demand syncs enabled
    Connected,
    /// A sync pass is currently in flight
    Syncing,
    /// Sync triggers suppressed, can reconnect
    Disconnected,
    /// Terminal, no further transitions
    Stopped,
}

impl ManagerState {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, ManagerState::Stopped)
    }

    /// Whether the lifecycle state machine permits moving to `to` from here.
    pub fn can_transition_to(self, to: ManagerState) -> bool {
        use ManagerState::*;
        match (self, to) {
            (Created, Connected) | (Created, Stopped) => true,
            (Connected, Syncing) | (Connected, Disconnected) | (Connected, Stopped) => true,
            (Syncing, Connected) | (Syncing, Disconnected) | (Syncing, Stopped) => true,
            (Disconnected, Connected) | (Disconnected, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::Created => write!(f, "created"),
            ManagerState::Connected => write!(f, "connected"),
            ManagerState::Syncing => write!(f, "syncing"),
            ManagerState::Disconnected => write!(f, "disconnected"),
            ManagerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Notification broadcast to subscribers on every meaningful manager change.
///
/// Delivered over a `tokio::sync::broadcast` channel; subscribers that fall
/// behind drop the oldest events rather than stalling the manager.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// Lifecycle state changed
    StateChanged {
        from: ManagerState,
        to: ManagerState,
    },
    /// A sync pass began
    SyncStarted,
    /// A sync pass finished, successfully or not
    SyncEnded { success: bool },
    /// The network block height advanced
    BlockHeightUpdated { height: u64 },
    /// A transfer was inserted or changed state, including reversals out of
    /// terminal states after a chain reorganization
    TransferChanged {
        hash: TransferHash,
        state: TransferState,
    },
    /// The confirmed wallet balance changed
    BalanceUpdated { balance: U256 },
}

/// Running record of sync pass outcomes, queryable via
/// [`WalletManager::sync_status`](crate::manager::WalletManager::sync_status).
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// Total passes attempted since creation
    pub passes: u64,
    /// Passes that ended with a client error
    pub failures: u64,
    /// Message from the most recent failed pass, cleared on success
    pub last_error: Option<String>,
    /// History records whose application underflowed the balance; the
    /// transfers are kept but the remote view is inconsistent
    pub underflows: u64,
    /// Block height through which history has been fully scanned
    pub last_synced_block: u64,
    /// Completion time of the most recent pass
    pub last_pass_at: Option<DateTime<Utc>>,
}
