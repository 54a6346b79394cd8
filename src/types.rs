//! Core value types shared across the wallet stack
//!
//! Networks, addresses, fee bases, transfer hashes, and the transfer
//! lifecycle state machine.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Chain type tag identifying which ledger implementation an entity belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainType(String);

impl ChainType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChainType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Network context: one chain type plus the mainnet/testnet flag
///
/// Immutable after creation; all entities attached to a manager share it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Chain type tag
    chain_type: ChainType,

    /// True for the production network, false for test networks
    is_mainnet: bool,
}

impl Network {
    pub fn new(chain_type: ChainType, is_mainnet: bool) -> Self {
        Self {
            chain_type,
            is_mainnet,
        }
    }

    pub fn chain_type(&self) -> &ChainType {
        &self.chain_type
    }

    pub fn is_mainnet(&self) -> bool {
        self.is_mainnet
    }

    /// Directory-safe tag segregating persisted state per network
    pub fn storage_tag(&self) -> String {
        if self.is_mainnet {
            format!("{}-mainnet", self.chain_type)
        } else {
            format!("{}-testnet", self.chain_type)
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.storage_tag())
    }
}

/// Chain-typed address in canonical string form
///
/// Two addresses are equal iff they have the same chain type and the same
/// canonical string; comparison across chain types is always false.
/// Construction goes through a chain adapter so the canonical form is
/// guaranteed well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    chain_type: ChainType,
    canonical: String,
}

impl Address {
    /// Build from an already-canonicalized string. Adapters are the only
    /// intended callers; everyone else goes through address parsing.
    pub(crate) fn from_canonical(chain_type: ChainType, canonical: String) -> Self {
        Self {
            chain_type,
            canonical,
        }
    }

    pub fn chain_type(&self) -> &ChainType {
        &self.chain_type
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical)
    }
}

/// Chain-typed transfer digest; the dedup key for wallet transfer sets
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferHash(Vec<u8>);

impl TransferHash {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(s)?))
    }
}

impl std::fmt::Display for TransferHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// Persisted records are JSON; hex strings keep them greppable
impl Serialize for TransferHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TransferHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TransferHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Chain-specific transaction cost descriptor: price per unit of cost times
/// the number of units the transfer consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBasis {
    /// Price per cost unit (gas price, fee-per-byte, ...)
    pub price_per_cost_factor: U256,

    /// Number of cost units (gas limit, payload size, ...)
    pub cost_factor: u64,
}

impl FeeBasis {
    pub fn new(price_per_cost_factor: U256, cost_factor: u64) -> Self {
        Self {
            price_per_cost_factor,
            cost_factor,
        }
    }

    /// Total fee this basis describes
    ///
    /// A basis whose product does not fit in a `U256` saturates to
    /// `U256::MAX`; spendable-balance checks then reject any transfer
    /// priced with it as unaffordable rather than wrapping around.
    pub fn fee(&self) -> U256 {
        self.price_per_cost_factor
            .checked_mul(U256::from(self.cost_factor))
            .unwrap_or(U256::MAX)
    }
}

/// Which side of a transfer the wallet's account sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// Account is the source; amount plus fee leave the wallet
    Sent,

    /// Account is the target; amount enters the wallet
    Received,

    /// Account is both endpoints (self-transfer discovered during recovery);
    /// only the fee leaves the wallet
    Recovered,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferDirection::Sent => write!(f, "sent"),
            TransferDirection::Received => write!(f, "received"),
            TransferDirection::Recovered => write!(f, "recovered"),
        }
    }
}

/// Transfer lifecycle state
///
/// ```text
/// created -> signed -> submitted -> included | errored
///                ^                      |
///                └────── resubmit ──────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Built locally, not yet signed; has no hash
    Created,

    /// Signed and hashed, not yet sent to the network
    Signed,

    /// Sent to the network, awaiting confirmation
    Submitted,

    /// Confirmed in a block
    Included {
        /// Height of the including block
        block_height: u64,

        /// Unix timestamp of the including block
        block_timestamp: u64,
    },

    /// Failed to submit or rejected by the chain
    Errored {
        /// Human-readable failure reason
        reason: String,
    },
}

impl TransferState {
    /// Terminal states may still be overwritten (a chain reorganization can
    /// revert an inclusion) but observers treat that as a meaningful event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Included { .. } | TransferState::Errored { .. }
        )
    }

    /// Block height this state carries, if any
    pub fn block_height(&self) -> Option<u64> {
        match self {
            TransferState::Included { block_height, .. } => Some(*block_height),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferState::Created => write!(f, "created"),
            TransferState::Signed => write!(f, "signed"),
            TransferState::Submitted => write!(f, "submitted"),
            TransferState::Included { block_height, .. } => {
                write!(f, "included@{}", block_height)
            }
            TransferState::Errored { reason } => write!(f, "errored: {}", reason),
        }
    }
}
