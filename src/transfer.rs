//! Transfer entity and lifecycle
//!
//! A transfer is one directed value movement. Locally-created transfers are
//! identified by a uid until signing fixes their chain hash; recovered
//! transfers arrive with a hash from the start. The hash is the dedup key
//! inside a wallet, and remote reports merge into an existing transfer
//! instead of duplicating it.

use chrono::Utc;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain::SignedEnvelope;
use crate::error::Result;
use crate::types::{Address, FeeBasis, TransferDirection, TransferHash, TransferState};

/// Outcome of merging a remote report into an existing transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Amount, direction, or state changed; balance must be recomputed
    Updated,

    /// Report matched what was already applied
    Unchanged,

    /// Report carried a lower block height than one already applied
    Stale,
}

/// A single directed value movement on one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Local identity, stable from creation; the chain hash only exists once
    /// the transfer is signed or recovered
    uid: Uuid,

    /// Source endpoint
    source: Address,

    /// Target endpoint
    target: Address,

    /// Value moved, excluding the fee
    amount: U256,

    /// Cost descriptor the fee is computed from
    fee_basis: FeeBasis,

    /// Currency code; the chain's native currency unless recovery says
    /// otherwise
    currency: String,

    /// Which side of the transfer the owning account sits on
    direction: TransferDirection,

    /// Lifecycle state
    state: TransferState,

    /// Chain digest; fixed at signing or recovery, immutable afterwards
    hash: Option<TransferHash>,

    /// Signed wire bytes, kept for submission and resubmission
    #[serde(default, with = "opt_hex")]
    raw: Option<Vec<u8>>,

    /// Unix timestamp the transfer was created locally or first reported
    timestamp: u64,

    /// Block height carried by the most recently applied remote report;
    /// reports below this are stale and ignored
    last_report_height: u64,
}

impl Transfer {
    /// Build a locally-initiated outgoing transfer in state `created`
    pub fn new_outgoing(
        source: Address,
        target: Address,
        amount: U256,
        fee_basis: FeeBasis,
    ) -> Self {
        let currency = source.chain_type().to_string();
        Self {
            uid: Uuid::new_v4(),
            source,
            target,
            amount,
            fee_basis,
            currency,
            direction: TransferDirection::Sent,
            state: TransferState::Created,
            hash: None,
            raw: None,
            timestamp: Utc::now().timestamp().max(0) as u64,
            last_report_height: 0,
        }
    }

    /// Rebuild a transfer from remote-reported fields
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_recovery(
        hash: TransferHash,
        source: Address,
        target: Address,
        amount: U256,
        fee_basis: FeeBasis,
        currency: String,
        direction: TransferDirection,
        state: TransferState,
        timestamp: u64,
        report_height: u64,
    ) -> Self {
        Self {
            uid: Uuid::new_v4(),
            source,
            target,
            amount,
            fee_basis,
            currency,
            direction,
            state,
            hash: Some(hash),
            raw: None,
            timestamp,
            last_report_height: report_height,
        }
    }

    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn hash(&self) -> Option<&TransferHash> {
        self.hash.as_ref()
    }

    pub fn source_address(&self) -> &Address {
        &self.source
    }

    pub fn target_address(&self) -> &Address {
        &self.target
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    pub fn fee_basis(&self) -> FeeBasis {
        self.fee_basis
    }

    /// Total fee this transfer pays
    pub fn fee(&self) -> U256 {
        self.fee_basis.fee()
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn last_report_height(&self) -> u64 {
        self.last_report_height
    }

    /// Signed wire bytes, present once the transfer has been signed
    pub fn raw_bytes(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    /// Replace the lifecycle state; the only state mutator
    ///
    /// Returns true if the state actually changed. Overwriting a terminal
    /// state is allowed (chain reorganizations revert inclusions) and
    /// reports as a change so observers can react.
    pub fn set_state(&mut self, state: TransferState) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        true
    }

    /// Attach the signing result: hash, wire bytes, state `signed`
    pub(crate) fn attach_signature(&mut self, envelope: SignedEnvelope) {
        self.hash = Some(envelope.hash);
        self.raw = Some(envelope.raw);
        self.state = TransferState::Signed;
    }

    /// Merge a remote report for the same hash into this transfer
    ///
    /// Reports carrying a lower block height than the last applied one are
    /// rejected as stale. Otherwise amount, direction, and state are taken
    /// from the report; `Updated` is returned only when one of those
    /// actually changed, since only they affect balance and observers.
    pub(crate) fn merge_from(&mut self, incoming: &Transfer) -> MergeOutcome {
        if incoming.last_report_height < self.last_report_height {
            return MergeOutcome::Stale;
        }

        let changed = self.amount != incoming.amount
            || self.direction != incoming.direction
            || self.state != incoming.state
            || self.fee_basis != incoming.fee_basis;

        self.amount = incoming.amount;
        self.fee_basis = incoming.fee_basis;
        self.currency = incoming.currency.clone();
        self.direction = incoming.direction;
        self.state = incoming.state.clone();
        self.timestamp = incoming.timestamp;
        self.last_report_height = incoming.last_report_height;
        if self.raw.is_none() {
            self.raw = incoming.raw.clone();
        }

        if changed {
            MergeOutcome::Updated
        } else {
            MergeOutcome::Unchanged
        }
    }

    /// Encode for persistence or broadcast; `deserialize` reverses it
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Optional byte blobs as hex strings, so JSON records stay readable
mod opt_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let opt: Option<String> = Option::deserialize(d)?;
        match opt {
            Some(s) => hex::decode(&s).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
