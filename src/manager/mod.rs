//! Manager module
//!
//! The orchestration layer tying one account, one wallet, one network, and
//! one client together:
//! - Lifecycle state machine (created / connected / syncing / disconnected /
//!   stopped)
//! - Background periodic sync plus on-demand sync, serialized onto a single
//!   in-flight pass
//! - Transfer recovery from remote reports and raw transactions
//! - Signing, submission with bounded retry, persistence after every
//!   meaningful transition
//!
//! # Architecture
//!
//! ```text
//! WalletManager ──> Wallet ──> Account ──> ChainAdapter
//!       │
//!       ├── SyncEngine (background task) ──> Client
//!       └── TransferStore
//! ```

pub mod events;
pub mod sync;
pub mod wallet_manager;

pub use events::{ManagerEvent, ManagerState, SyncStatus};
pub use wallet_manager::WalletManager;
