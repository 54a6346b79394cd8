//! The per-chain adapter seam
//!
//! Everything chain-specific the wallet core needs is behind this trait:
//! address rules, key derivation, transfer hashing and signing, raw
//! transaction decoding, and the chain's fee/balance policy. The core never
//! branches on a chain type string outside an adapter.

use primitive_types::U256;

use crate::error::Result;
use crate::transfer::Transfer;
use crate::types::{Address, ChainType, FeeBasis, TransferHash};

/// Whether an account payload can sign or only observe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    /// Holds signing-capable key material
    Full,

    /// Derived from a public key; address derivation only
    WatchOnly,
}

/// Result of signing a transfer: the fixed hash plus the wire bytes that
/// submission (and resubmission) will broadcast
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    pub hash: TransferHash,
    pub raw: Vec<u8>,
}

/// One transfer decoded out of a raw chain transaction blob
#[derive(Debug, Clone)]
pub struct DecodedTransfer {
    pub hash: TransferHash,
    pub source: Address,
    pub target: Address,
    pub amount: U256,
    pub fee_basis: FeeBasis,
}

/// Chain-specific operations the generic wallet core dispatches to
///
/// Implementations must be pure with respect to their inputs: the same seed
/// derives the same payload and address across process restarts, and the
/// same signed transfer always produces the same hash. Wallet restoration
/// depends on this.
pub trait ChainAdapter: Send + Sync {
    /// Chain type tag this adapter serves
    fn chain_type(&self) -> &ChainType;

    /// Validate and canonicalize an address string
    ///
    /// Fails with `InvalidAddress` if the string is not well-formed for this
    /// chain.
    fn parse_address(&self, s: &str) -> Result<Address>;

    /// Derive an opaque signing-capable account payload from a seed
    fn account_from_seed(&self, seed: &[u8]) -> Result<Vec<u8>>;

    /// Build a watch-only account payload from a public key
    fn account_from_public_key(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Check a payload restored from serialized form and classify it
    ///
    /// Fails with `MalformedInput` if the payload is not one this adapter
    /// produces.
    fn validate_account_payload(&self, payload: &[u8]) -> Result<AccountKind>;

    /// Deterministically derive the account's primary address from a payload
    fn derive_address(&self, payload: &[u8]) -> Result<Address>;

    /// Sign a transfer, producing its immutable hash and wire bytes
    ///
    /// The seed must re-derive the account payload; watch-only payloads and
    /// mismatched seeds fail with `SigningFailed` and leave the transfer
    /// untouched.
    fn sign_transfer(
        &self,
        account_payload: &[u8],
        seed: &[u8],
        transfer: &Transfer,
    ) -> Result<SignedEnvelope>;

    /// Sign a transfer with the account's private key directly, bypassing
    /// seed derivation
    ///
    /// The key must match the payload's stored key material; watch-only
    /// payloads and foreign keys fail with `SigningFailed` and leave the
    /// transfer untouched.
    fn sign_transfer_with_key(
        &self,
        account_payload: &[u8],
        key: &[u8],
        transfer: &Transfer,
    ) -> Result<SignedEnvelope>;

    /// Decode a raw transaction blob into the transfers it contains
    ///
    /// Fails with `MalformedInput` when the blob is not a transaction of
    /// this chain; relevance filtering is the caller's job.
    fn parse_raw_transaction(&self, bytes: &[u8]) -> Result<Vec<DecodedTransfer>>;

    /// Chain cost model: fee basis for moving `amount` to `target` at the
    /// given unit price. Pure computation.
    fn estimate_fee_basis(&self, target: &Address, amount: U256, price_per_cost_factor: U256)
        -> FeeBasis;

    /// Fee basis a fresh wallet starts with
    fn default_fee_basis(&self) -> FeeBasis;

    /// Whether transfers in `submitted` state already count toward balance
    /// on this chain (some ledgers make pending debits visible immediately)
    fn submitted_counts_toward_balance(&self) -> bool {
        false
    }
}
