//! Wallet: the transfer set and derived balance for one account
//!
//! The wallet owns every transfer known for its account, keyed by chain
//! hash. Balance is never stored authoritatively anywhere else; it is
//! recomputed from the transfer set whenever the set changes, and an
//! inconsistent remote view (debits exceeding credits) is surfaced as an
//! error instead of being clamped away.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use primitive_types::U256;
use tracing::debug;

use crate::account::Account;
use crate::error::{Error, Result};
use crate::transfer::{MergeOutcome, Transfer};
use crate::types::{Address, FeeBasis, TransferDirection, TransferHash, TransferState};

/// What `add_transfer` did with an incoming transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// New hash; transfer entered the set
    Inserted,

    /// Hash existed; amount, direction, or state changed
    Updated,

    /// Hash existed; nothing balance-relevant changed
    Unchanged,

    /// Hash existed; the report was older than what is already applied
    Stale,
}

impl AddOutcome {
    /// True when observers should be told about the transfer
    pub fn is_change(&self) -> bool {
        matches!(self, AddOutcome::Inserted | AddOutcome::Updated)
    }
}

/// Transfer set, address set, and cached balance for one account
pub struct Wallet {
    account: Arc<Account>,
    addresses: HashSet<Address>,
    transfers: HashMap<TransferHash, Transfer>,
    balance: U256,
    default_fee_basis: FeeBasis,
}

impl Wallet {
    /// Create an empty wallet for an account
    pub fn new(account: Arc<Account>) -> Self {
        let mut addresses = HashSet::new();
        addresses.insert(account.address().clone());
        let default_fee_basis = account.adapter().default_fee_basis();

        Self {
            account,
            addresses,
            transfers: HashMap::new(),
            balance: U256::zero(),
            default_fee_basis,
        }
    }

    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    /// Cached derived balance; see module docs for the derivation rule
    pub fn balance(&self) -> U256 {
        self.balance
    }

    /// Balance minus outgoing value that is signed or submitted but not yet
    /// counted in the balance itself; what `create_transfer` checks against
    pub fn spendable_balance(&self) -> U256 {
        let submitted_counts = self.account.adapter().submitted_counts_toward_balance();

        let mut pending = U256::zero();
        for transfer in self.transfers.values() {
            let reserved = match transfer.state() {
                TransferState::Signed => true,
                TransferState::Submitted => !submitted_counts,
                _ => false,
            };
            if !reserved {
                continue;
            }
            match transfer.direction() {
                TransferDirection::Sent => {
                    pending = pending
                        .saturating_add(transfer.amount())
                        .saturating_add(transfer.fee());
                }
                TransferDirection::Recovered => {
                    pending = pending.saturating_add(transfer.fee());
                }
                TransferDirection::Received => {}
            }
        }

        self.balance.saturating_sub(pending)
    }

    pub fn default_fee_basis(&self) -> FeeBasis {
        self.default_fee_basis
    }

    pub fn set_default_fee_basis(&mut self, fee_basis: FeeBasis) {
        self.default_fee_basis = fee_basis;
    }

    /// Whether an address belongs to this wallet's derived address set
    pub fn has_address(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    /// All addresses the wallet watches
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.addresses.iter()
    }

    /// Track an additional derivation-path address for this account
    pub fn add_address(&mut self, address: Address) -> Result<()> {
        if address.chain_type() != self.account.chain_type() {
            return Err(Error::InvalidAddress {
                chain: self.account.chain_type().to_string(),
                address: address.to_string(),
            });
        }
        self.addresses.insert(address);
        Ok(())
    }

    pub fn has_transfer(&self, hash: &TransferHash) -> bool {
        self.transfers.contains_key(hash)
    }

    pub fn get_transfer(&self, hash: &TransferHash) -> Option<&Transfer> {
        self.transfers.get(hash)
    }

    pub fn transfers(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.values()
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    /// Insert or merge a transfer, idempotently by hash
    ///
    /// Balance is recomputed only when the set actually changed. A balance
    /// underflow is returned as an error with the transfer still applied and
    /// the cached balance left at its last consistent value.
    pub fn add_transfer(&mut self, transfer: Transfer) -> Result<AddOutcome> {
        let hash = transfer
            .hash()
            .cloned()
            .ok_or_else(|| Error::MalformedInput("transfer has no hash".to_string()))?;

        let outcome = match self.transfers.get_mut(&hash) {
            Some(existing) => match existing.merge_from(&transfer) {
                MergeOutcome::Updated => AddOutcome::Updated,
                MergeOutcome::Unchanged => AddOutcome::Unchanged,
                MergeOutcome::Stale => {
                    debug!(hash = %hash, "ignoring stale transfer report");
                    AddOutcome::Stale
                }
            },
            None => {
                self.transfers.insert(hash, transfer);
                AddOutcome::Inserted
            }
        };

        if outcome.is_change() {
            self.recompute_balance()?;
        }
        Ok(outcome)
    }

    /// Replace the state of a held transfer; recomputes balance on change
    pub(crate) fn set_transfer_state(
        &mut self,
        hash: &TransferHash,
        state: TransferState,
    ) -> Result<bool> {
        let transfer = self
            .transfers
            .get_mut(hash)
            .ok_or_else(|| Error::TransferNotFound(hash.to_hex()))?;

        let changed = transfer.set_state(state);
        if changed {
            self.recompute_balance()?;
        }
        Ok(changed)
    }

    /// Build (but do not insert) an outgoing transfer in state `created`
    ///
    /// Fails with `InsufficientBalance` when amount plus fee exceeds the
    /// spendable balance, and with `InvalidAddress` when the target does not
    /// belong to this wallet's chain.
    pub fn create_transfer(
        &self,
        target: &Address,
        amount: U256,
        fee_basis: Option<FeeBasis>,
    ) -> Result<Transfer> {
        if target.chain_type() != self.account.chain_type() {
            return Err(Error::InvalidAddress {
                chain: self.account.chain_type().to_string(),
                address: target.to_string(),
            });
        }

        let basis = fee_basis.unwrap_or(self.default_fee_basis);
        let required = amount.saturating_add(basis.fee());
        let available = self.spendable_balance();
        if required > available {
            return Err(Error::InsufficientBalance {
                available,
                required,
            });
        }

        Ok(Transfer::new_outgoing(
            self.account.address().clone(),
            target.clone(),
            amount,
            basis,
        ))
    }

    /// Chain cost model for a prospective transfer; pure computation
    pub fn estimate_fee_basis(
        &self,
        target: &Address,
        amount: U256,
        price_per_cost_factor: U256,
    ) -> FeeBasis {
        self.account
            .adapter()
            .estimate_fee_basis(target, amount, price_per_cost_factor)
    }

    /// Re-derive the cached balance from the transfer set
    ///
    /// Included transfers always count; submitted ones only when the chain's
    /// policy says pending debits are visible. Received credits the amount,
    /// sent debits amount plus fee, a recovered self-transfer debits the fee
    /// only.
    fn recompute_balance(&mut self) -> Result<()> {
        let submitted_counts = self.account.adapter().submitted_counts_toward_balance();

        let mut credits = U256::zero();
        let mut debits = U256::zero();
        for transfer in self.transfers.values() {
            let counted = match transfer.state() {
                TransferState::Included { .. } => true,
                TransferState::Submitted => submitted_counts,
                _ => false,
            };
            if !counted {
                continue;
            }

            match transfer.direction() {
                TransferDirection::Received => {
                    credits = credits.saturating_add(transfer.amount());
                }
                TransferDirection::Sent => {
                    debits = debits
                        .saturating_add(transfer.amount())
                        .saturating_add(transfer.fee());
                }
                TransferDirection::Recovered => {
                    debits = debits.saturating_add(transfer.fee());
                }
            }
        }

        if debits > credits {
            return Err(Error::BalanceUnderflow { credits, debits });
        }

        self.balance = credits - debits;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainRegistry, ReferenceAdapter};
    use crate::types::ChainType;

    fn registry(submitted_counts: bool) -> ChainRegistry {
        let mut registry = ChainRegistry::new();
        registry.register(Arc::new(
            ReferenceAdapter::new("ref").with_submitted_balance(submitted_counts),
        ));
        registry
    }

    fn wallet_with(registry: &ChainRegistry) -> Wallet {
        let account = Arc::new(
            Account::from_seed(registry, &ChainType::from("ref"), b"seed", 1_700_000_000).unwrap(),
        );
        Wallet::new(account)
    }

    fn other_address() -> Address {
        Address::from_canonical(ChainType::from("ref"), "ab".repeat(20))
    }

    fn incoming(wallet: &Wallet, tag: u8, amount: u64, state: TransferState) -> Transfer {
        let report_height = state.block_height().unwrap_or(0);
        Transfer::from_recovery(
            TransferHash::new(vec![tag; 32]),
            other_address(),
            wallet.account().address().clone(),
            U256::from(amount),
            FeeBasis::new(U256::one(), 10),
            "ref".to_string(),
            TransferDirection::Received,
            state,
            1_700_000_000,
            report_height,
        )
    }

    fn outgoing(wallet: &Wallet, tag: u8, amount: u64, state: TransferState) -> Transfer {
        let report_height = state.block_height().unwrap_or(0);
        Transfer::from_recovery(
            TransferHash::new(vec![tag; 32]),
            wallet.account().address().clone(),
            other_address(),
            U256::from(amount),
            FeeBasis::new(U256::one(), 10),
            "ref".to_string(),
            TransferDirection::Sent,
            state,
            1_700_000_000,
            report_height,
        )
    }

    fn included(height: u64) -> TransferState {
        TransferState::Included {
            block_height: height,
            block_timestamp: 1_700_000_500,
        }
    }

    #[test]
    fn test_new_wallet_is_empty_with_account_address() {
        let registry = registry(false);
        let wallet = wallet_with(&registry);

        assert_eq!(wallet.balance(), U256::zero());
        assert_eq!(wallet.transfer_count(), 0);
        assert!(wallet.has_address(wallet.account().address()));
        assert!(!wallet.has_address(&other_address()));
    }

    #[test]
    fn test_balance_counts_included_only_by_default() {
        let registry = registry(false);
        let mut wallet = wallet_with(&registry);

        wallet
            .add_transfer(incoming(&wallet, 1, 100, included(10)))
            .unwrap();
        assert_eq!(wallet.balance(), U256::from(100u64));

        // Submitted outgoing: reserved, not yet in balance
        wallet
            .add_transfer(outgoing(&wallet, 2, 30, TransferState::Submitted))
            .unwrap();
        assert_eq!(wallet.balance(), U256::from(100u64));
        assert_eq!(wallet.spendable_balance(), U256::from(60u64));

        // Inclusion moves it from reserved to counted: 100 - 30 - 10 fee
        wallet
            .set_transfer_state(&TransferHash::new(vec![2; 32]), included(11))
            .unwrap();
        assert_eq!(wallet.balance(), U256::from(60u64));
        assert_eq!(wallet.spendable_balance(), U256::from(60u64));
    }

    #[test]
    fn test_submitted_counts_when_chain_policy_allows() {
        let registry = registry(true);
        let mut wallet = wallet_with(&registry);

        wallet
            .add_transfer(incoming(&wallet, 1, 100, included(10)))
            .unwrap();
        wallet
            .add_transfer(outgoing(&wallet, 2, 30, TransferState::Submitted))
            .unwrap();

        assert_eq!(wallet.balance(), U256::from(60u64));
        assert_eq!(wallet.spendable_balance(), U256::from(60u64));
    }

    #[test]
    fn test_add_transfer_dedups_by_hash() {
        let registry = registry(false);
        let mut wallet = wallet_with(&registry);

        let first = incoming(&wallet, 1, 100, TransferState::Submitted);
        assert_eq!(wallet.add_transfer(first).unwrap(), AddOutcome::Inserted);

        let update = incoming(&wallet, 1, 100, included(10));
        assert_eq!(wallet.add_transfer(update).unwrap(), AddOutcome::Updated);

        assert_eq!(wallet.transfer_count(), 1);
        assert_eq!(wallet.balance(), U256::from(100u64));
    }

    #[test]
    fn test_identical_report_is_unchanged() {
        let registry = registry(false);
        let mut wallet = wallet_with(&registry);

        wallet
            .add_transfer(incoming(&wallet, 1, 100, included(10)))
            .unwrap();
        let outcome = wallet
            .add_transfer(incoming(&wallet, 1, 100, included(10)))
            .unwrap();

        assert_eq!(outcome, AddOutcome::Unchanged);
        assert_eq!(wallet.transfer_count(), 1);
    }

    #[test]
    fn test_stale_report_does_not_regress() {
        let registry = registry(false);
        let mut wallet = wallet_with(&registry);

        wallet
            .add_transfer(incoming(&wallet, 1, 100, included(100)))
            .unwrap();

        // Same hash, but the report height is older than what was applied
        let stale = Transfer::from_recovery(
            TransferHash::new(vec![1; 32]),
            other_address(),
            wallet.account().address().clone(),
            U256::from(100u64),
            FeeBasis::new(U256::one(), 10),
            "ref".to_string(),
            TransferDirection::Received,
            TransferState::Submitted,
            1_700_000_000,
            90,
        );

        assert_eq!(wallet.add_transfer(stale).unwrap(), AddOutcome::Stale);
        let held = wallet
            .get_transfer(&TransferHash::new(vec![1; 32]))
            .unwrap();
        assert_eq!(held.state().block_height(), Some(100));
        assert_eq!(wallet.balance(), U256::from(100u64));
    }

    #[test]
    fn test_balance_underflow_is_surfaced_not_clamped() {
        let registry = registry(false);
        let mut wallet = wallet_with(&registry);

        wallet
            .add_transfer(incoming(&wallet, 1, 20, included(10)))
            .unwrap();

        // Remote claims we spent more than we ever had
        let err = wallet
            .add_transfer(outgoing(&wallet, 2, 50, included(11)))
            .unwrap_err();
        assert!(matches!(err, Error::BalanceUnderflow { .. }));

        // Transfer is applied, balance keeps its last consistent value
        assert_eq!(wallet.transfer_count(), 2);
        assert_eq!(wallet.balance(), U256::from(20u64));
    }

    #[test]
    fn test_create_transfer_checks_spendable_balance() {
        let registry = registry(false);
        let mut wallet = wallet_with(&registry);

        wallet
            .add_transfer(incoming(&wallet, 1, 100, included(10)))
            .unwrap();

        let target = other_address();
        let mut first = wallet
            .create_transfer(&target, U256::from(40u64), None)
            .unwrap();
        assert_eq!(*first.state(), TransferState::Created);
        assert_eq!(first.direction(), TransferDirection::Sent);

        // Sign and track it; 40 + 10 fee now reserved
        wallet.account().sign_transfer(&mut first, b"seed").unwrap();
        wallet.add_transfer(first).unwrap();
        assert_eq!(wallet.spendable_balance(), U256::from(50u64));

        let err = wallet
            .create_transfer(&target, U256::from(70u64), None)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
    }

    #[test]
    fn test_create_transfer_rejects_foreign_chain_target() {
        let registry = registry(false);
        let mut wallet = wallet_with(&registry);
        wallet
            .add_transfer(incoming(&wallet, 1, 100, included(10)))
            .unwrap();

        let foreign = Address::from_canonical(ChainType::from("other"), "ab".repeat(20));
        let err = wallet
            .create_transfer(&foreign, U256::from(1u64), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAddress { .. }));
    }

    #[test]
    fn test_overflowing_fee_basis_is_unaffordable() {
        let registry = registry(false);
        let mut wallet = wallet_with(&registry);
        wallet
            .add_transfer(incoming(&wallet, 1, 100, included(10)))
            .unwrap();

        // Fee saturates to U256::MAX; the spendable check must reject it
        // cleanly instead of wrapping.
        let absurd = FeeBasis::new(U256::MAX, 2);
        let err = wallet
            .create_transfer(&other_address(), U256::from(1u64), Some(absurd))
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
    }

    #[test]
    fn test_default_fee_basis_is_adjustable() {
        let registry = registry(false);
        let mut wallet = wallet_with(&registry);

        let basis = FeeBasis::new(U256::from(3u64), 7);
        wallet.set_default_fee_basis(basis);
        assert_eq!(wallet.default_fee_basis(), basis);
    }

    #[test]
    fn test_unhashed_transfer_cannot_enter_the_set() {
        let registry = registry(false);
        let mut wallet = wallet_with(&registry);

        let created = Transfer::new_outgoing(
            wallet.account().address().clone(),
            other_address(),
            U256::from(1u64),
            FeeBasis::new(U256::one(), 10),
        );
        assert!(wallet.add_transfer(created).is_err());
        assert_eq!(wallet.transfer_count(), 0);
    }
}
