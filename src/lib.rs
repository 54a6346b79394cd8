//! Chain-agnostic wallet core
//!
//! Account, wallet, and transfer management for blockchains without a
//! dedicated native implementation. Chain specifics live behind the
//! [`ChainAdapter`] trait; network access lives behind the host-implemented
//! [`Client`] trait; the [`WalletManager`] ties one account to one network
//! and keeps local state in step with the chain.

pub mod account;
pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod storage;
pub mod transfer;
pub mod types;
pub mod wallet;

// Re-export commonly used types
pub use account::Account;
pub use chain::{AccountKind, ChainAdapter, ChainRegistry, DecodedTransfer, SignedEnvelope};
pub use client::{Client, RemoteStatus, TransactionPage, TransactionRecord, TransferSummary};
pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use manager::{ManagerEvent, ManagerState, SyncStatus, WalletManager};
pub use storage::TransferStore;
pub use transfer::Transfer;
pub use types::{
    Address, ChainType, FeeBasis, Network, TransferDirection, TransferHash, TransferState,
};
pub use wallet::{AddOutcome, Wallet};
