//! Digest-based reference chain adapter
//!
//! A minimal, fully deterministic ledger scheme used to exercise the whole
//! stack without a real chain: keys and addresses are sha256 derivations,
//! signatures are keyed digests, and the wire format is a bincode envelope.
//! Hermetic by construction, so the same seed always restores the same
//! wallet.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::transfer::Transfer;
use crate::types::{Address, ChainType, FeeBasis, TransferHash};

use super::adapter::{AccountKind, ChainAdapter, DecodedTransfer, SignedEnvelope};

/// Payload tag for signing-capable key material
const TAG_FULL: u8 = 0x01;

/// Payload tag for watch-only (public key) material
const TAG_WATCH: u8 = 0x02;

/// Address length in bytes; canonical form is lowercase hex of this many
const ADDRESS_LEN: usize = 20;

/// Flat cost model: every transfer consumes this many cost units
const FIXED_COST_FACTOR: u64 = 10;

/// Reference chain adapter
///
/// The chain type tag is chosen at construction so tests can run several
/// independent "chains" side by side.
pub struct ReferenceAdapter {
    chain_type: ChainType,
    submitted_counts: bool,
}

impl ReferenceAdapter {
    pub fn new(chain_type: impl Into<ChainType>) -> Self {
        Self {
            chain_type: chain_type.into(),
            submitted_counts: false,
        }
    }

    /// Treat `submitted` transfers as already affecting balance
    pub fn with_submitted_balance(mut self, submitted_counts: bool) -> Self {
        self.submitted_counts = submitted_counts;
        self
    }

    fn secret_from_seed(seed: &[u8]) -> Vec<u8> {
        Sha256::digest(seed).to_vec()
    }

    fn public_from_secret(secret: &[u8]) -> Vec<u8> {
        Sha256::digest(secret).to_vec()
    }

    fn address_from_public(&self, public: &[u8]) -> Address {
        let digest = Sha256::digest(public);
        Address::from_canonical(self.chain_type.clone(), hex::encode(&digest[..ADDRESS_LEN]))
    }

    fn signing_secret<'a>(&self, account_payload: &'a [u8]) -> Result<&'a [u8]> {
        if self.validate_account_payload(account_payload)? != AccountKind::Full {
            return Err(Error::SigningFailed("account is watch-only".to_string()));
        }
        Ok(&account_payload[1..])
    }

    fn sign_with_secret(secret: &[u8], transfer: &Transfer) -> Result<SignedEnvelope> {
        let fee_basis = transfer.fee_basis();
        let mut amount_be = [0u8; 32];
        transfer.amount().to_big_endian(&mut amount_be);
        let mut price_be = [0u8; 32];
        fee_basis.price_per_cost_factor.to_big_endian(&mut price_be);

        let mut hasher = Sha256::new();
        hasher.update(secret);
        hasher.update(transfer.source_address().as_str().as_bytes());
        hasher.update(transfer.target_address().as_str().as_bytes());
        hasher.update(amount_be);
        hasher.update(price_be);
        hasher.update(fee_basis.cost_factor.to_be_bytes());
        let signature = hasher.finalize().to_vec();

        let raw = bincode::serialize(&WireTransfer {
            source: transfer.source_address().as_str().to_string(),
            target: transfer.target_address().as_str().to_string(),
            amount: transfer.amount(),
            price_per_cost_factor: fee_basis.price_per_cost_factor,
            cost_factor: fee_basis.cost_factor,
            signature,
        })?;

        let hash = TransferHash::new(Sha256::digest(&raw).to_vec());
        Ok(SignedEnvelope { hash, raw })
    }
}

/// Wire layout of one reference-chain transaction
#[derive(Serialize, Deserialize)]
struct WireTransfer {
    source: String,
    target: String,
    amount: U256,
    price_per_cost_factor: U256,
    cost_factor: u64,
    signature: Vec<u8>,
}

impl ChainAdapter for ReferenceAdapter {
    fn chain_type(&self) -> &ChainType {
        &self.chain_type
    }

    fn parse_address(&self, s: &str) -> Result<Address> {
        let bare = s.strip_prefix("0x").unwrap_or(s);
        let invalid = || Error::InvalidAddress {
            chain: self.chain_type.to_string(),
            address: s.to_string(),
        };

        let bytes = hex::decode(bare).map_err(|_| invalid())?;
        if bytes.len() != ADDRESS_LEN {
            return Err(invalid());
        }

        Ok(Address::from_canonical(
            self.chain_type.clone(),
            bare.to_ascii_lowercase(),
        ))
    }

    fn account_from_seed(&self, seed: &[u8]) -> Result<Vec<u8>> {
        if seed.is_empty() {
            return Err(Error::MalformedInput("empty seed".to_string()));
        }

        let mut payload = vec![TAG_FULL];
        payload.extend_from_slice(&Self::secret_from_seed(seed));
        Ok(payload)
    }

    fn account_from_public_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.len() != 32 {
            return Err(Error::MalformedInput(format!(
                "public key must be 32 bytes, got {}",
                key.len()
            )));
        }

        let mut payload = vec![TAG_WATCH];
        payload.extend_from_slice(key);
        Ok(payload)
    }

    fn validate_account_payload(&self, payload: &[u8]) -> Result<AccountKind> {
        match payload.first() {
            Some(&TAG_FULL) if payload.len() == 33 => Ok(AccountKind::Full),
            Some(&TAG_WATCH) if payload.len() == 33 => Ok(AccountKind::WatchOnly),
            _ => Err(Error::MalformedInput(
                "unrecognized account payload".to_string(),
            )),
        }
    }

    fn derive_address(&self, payload: &[u8]) -> Result<Address> {
        let public = match self.validate_account_payload(payload)? {
            AccountKind::Full => Self::public_from_secret(&payload[1..]),
            AccountKind::WatchOnly => payload[1..].to_vec(),
        };
        Ok(self.address_from_public(&public))
    }

    fn sign_transfer(
        &self,
        account_payload: &[u8],
        seed: &[u8],
        transfer: &Transfer,
    ) -> Result<SignedEnvelope> {
        let secret = self.signing_secret(account_payload)?;
        if Self::secret_from_seed(seed) != secret {
            return Err(Error::SigningFailed(
                "seed does not match account key material".to_string(),
            ));
        }
        Self::sign_with_secret(secret, transfer)
    }

    fn sign_transfer_with_key(
        &self,
        account_payload: &[u8],
        key: &[u8],
        transfer: &Transfer,
    ) -> Result<SignedEnvelope> {
        let secret = self.signing_secret(account_payload)?;
        if key != secret {
            return Err(Error::SigningFailed(
                "key does not match account key material".to_string(),
            ));
        }
        Self::sign_with_secret(secret, transfer)
    }

    fn parse_raw_transaction(&self, bytes: &[u8]) -> Result<Vec<DecodedTransfer>> {
        let wire: WireTransfer = bincode::deserialize(bytes)
            .map_err(|e| Error::MalformedInput(format!("undecodable raw transaction: {}", e)))?;

        let source = self.parse_address(&wire.source)?;
        let target = self.parse_address(&wire.target)?;

        Ok(vec![DecodedTransfer {
            hash: TransferHash::new(Sha256::digest(bytes).to_vec()),
            source,
            target,
            amount: wire.amount,
            fee_basis: FeeBasis::new(wire.price_per_cost_factor, wire.cost_factor),
        }])
    }

    fn estimate_fee_basis(
        &self,
        _target: &Address,
        _amount: U256,
        price_per_cost_factor: U256,
    ) -> FeeBasis {
        FeeBasis::new(price_per_cost_factor, FIXED_COST_FACTOR)
    }

    fn default_fee_basis(&self) -> FeeBasis {
        FeeBasis::new(U256::one(), FIXED_COST_FACTOR)
    }

    fn submitted_counts_toward_balance(&self) -> bool {
        self.submitted_counts
    }
}
