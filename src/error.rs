//! Error types for the wallet core

use primitive_types::U256;
use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the wallet core
#[derive(Error, Debug)]
pub enum Error {
    // Chain dispatch errors
    #[error("Unsupported chain type: {0}")]
    UnsupportedType(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    // Address errors
    #[error("Invalid address for chain {chain}: {address}")]
    InvalidAddress { chain: String, address: String },

    // Account errors
    #[error("Account type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    // Wallet errors
    #[error("Insufficient balance: {available} available, {required} required")]
    InsufficientBalance { available: U256, required: U256 },

    #[error("Balance underflow: debits {debits} exceed credits {credits}")]
    BalanceUnderflow { credits: U256, debits: U256 },

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Transfer is {state}, expected {expected}")]
    InvalidTransferState { state: String, expected: String },

    // Client boundary errors
    #[error("Client unavailable: {0}")]
    ClientUnavailable(String),

    #[error("Client rejected request: {0}")]
    ClientRejected(String),

    // Manager lifecycle errors
    #[error("Manager is stopped")]
    ManagerStopped,

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt storage record at {path}: {detail}")]
    StorageCorrupt { path: String, detail: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ClientUnavailable(_))
    }

    /// Check if this error should be presented to the user rather than logged
    /// as an internal failure
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InsufficientBalance { .. }
                | Error::InvalidAddress { .. }
                | Error::MalformedInput(_)
                | Error::SigningFailed(_)
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from bincode errors
impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
