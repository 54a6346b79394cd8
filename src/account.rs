//! Account: key material and address derivation for one chain type
//!
//! An account is built from exactly one of a seed, a public key, or a
//! serialized blob. It owns no transfers; wallets borrow it (shared,
//! immutable) to derive addresses and sign.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chain::{AccountKind, ChainAdapter, ChainRegistry};
use crate::error::{Error, Result};
use crate::transfer::Transfer;
use crate::types::{Address, ChainType, TransferState};

/// Version tag of the serialized account envelope
const ENVELOPE_VERSION: u8 = 1;

/// Serialized account layout; field order is the wire format
#[derive(Serialize, Deserialize)]
struct AccountEnvelope {
    version: u8,
    chain_type: String,
    timestamp: u64,
    payload: Vec<u8>,
}

/// Key material and derivation state for one chain type
pub struct Account {
    chain_type: ChainType,
    adapter: Arc<dyn ChainAdapter>,
    payload: Vec<u8>,
    kind: AccountKind,
    address: Address,
    timestamp: u64,
}

impl Account {
    /// Create from a seed; the account can sign
    pub fn from_seed(
        registry: &ChainRegistry,
        chain_type: &ChainType,
        seed: &[u8],
        timestamp: u64,
    ) -> Result<Self> {
        let adapter = registry.get(chain_type)?;
        let payload = adapter.account_from_seed(seed)?;
        Self::from_payload(adapter, payload, timestamp)
    }

    /// Create watch-only from a public key; derivation works, signing fails
    pub fn from_public_key(
        registry: &ChainRegistry,
        chain_type: &ChainType,
        key: &[u8],
        timestamp: u64,
    ) -> Result<Self> {
        let adapter = registry.get(chain_type)?;
        let payload = adapter.account_from_public_key(key)?;
        Self::from_payload(adapter, payload, timestamp)
    }

    /// Restore from bytes produced by [`Account::serialize`]
    ///
    /// Fails with `TypeMismatch` when the envelope was written for a
    /// different chain type than requested.
    pub fn from_serialization(
        registry: &ChainRegistry,
        chain_type: &ChainType,
        bytes: &[u8],
    ) -> Result<Self> {
        let envelope: AccountEnvelope = bincode::deserialize(bytes)
            .map_err(|e| Error::Deserialization(format!("account envelope: {}", e)))?;

        if envelope.version != ENVELOPE_VERSION {
            return Err(Error::Deserialization(format!(
                "unsupported account envelope version {}",
                envelope.version
            )));
        }
        if envelope.chain_type != chain_type.as_str() {
            return Err(Error::TypeMismatch {
                expected: chain_type.to_string(),
                found: envelope.chain_type,
            });
        }

        let adapter = registry.get(chain_type)?;
        Self::from_payload(adapter, envelope.payload, envelope.timestamp)
    }

    fn from_payload(
        adapter: Arc<dyn ChainAdapter>,
        payload: Vec<u8>,
        timestamp: u64,
    ) -> Result<Self> {
        let kind = adapter.validate_account_payload(&payload)?;
        let address = adapter.derive_address(&payload)?;
        Ok(Self {
            chain_type: adapter.chain_type().clone(),
            adapter,
            payload,
            kind,
            address,
            timestamp,
        })
    }

    pub fn chain_type(&self) -> &ChainType {
        &self.chain_type
    }

    /// The account's primary address; a pure function of the key material
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Creation time hint (unix seconds); bounds the first history scan
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn is_watch_only(&self) -> bool {
        self.kind == AccountKind::WatchOnly
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn ChainAdapter> {
        &self.adapter
    }

    /// Encode as a versioned envelope; `from_serialization` reverses it
    /// byte-for-byte
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&AccountEnvelope {
            version: ENVELOPE_VERSION,
            chain_type: self.chain_type.to_string(),
            timestamp: self.timestamp,
            payload: self.payload.clone(),
        })?)
    }

    /// Sign a transfer in place, moving it `created -> signed`
    ///
    /// On any failure the transfer is left untouched.
    pub fn sign_transfer(&self, transfer: &mut Transfer, seed: &[u8]) -> Result<()> {
        self.ensure_signable(transfer)?;
        let envelope = self.adapter.sign_transfer(&self.payload, seed, transfer)?;
        transfer.attach_signature(envelope);
        Ok(())
    }

    /// Sign a transfer in place with the account's private key instead of
    /// the seed it was derived from
    ///
    /// On any failure the transfer is left untouched.
    pub fn sign_transfer_with_key(&self, transfer: &mut Transfer, key: &[u8]) -> Result<()> {
        self.ensure_signable(transfer)?;
        let envelope = self
            .adapter
            .sign_transfer_with_key(&self.payload, key, transfer)?;
        transfer.attach_signature(envelope);
        Ok(())
    }

    fn ensure_signable(&self, transfer: &Transfer) -> Result<()> {
        if *transfer.state() != TransferState::Created {
            return Err(Error::SigningFailed(format!(
                "transfer is {}, expected created",
                transfer.state()
            )));
        }
        if transfer.source_address().chain_type() != &self.chain_type {
            return Err(Error::SigningFailed(format!(
                "transfer chain {} does not match account chain {}",
                transfer.source_address().chain_type(),
                self.chain_type
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("chain_type", &self.chain_type)
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
