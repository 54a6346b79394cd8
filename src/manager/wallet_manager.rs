//! WalletManager: the host-facing orchestration surface
//!
//! One manager per (account, network) pair. It owns the wallet, the
//! persistent store, and the client handle, runs the lifecycle state machine,
//! and drives the background sync engine. Hosts hold it behind an `Arc` and
//! call into it from any task; all shared state lives behind its own lock or
//! atomic, and no lock is ever held across a client call.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use primitive_types::U256;
use tokio::sync::{broadcast, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::client::Client;
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::manager::events::{ManagerEvent, ManagerState, SyncStatus};
use crate::manager::sync::{apply_incoming, direction_for, transfer_from_decoded, SyncEngine};
use crate::storage::TransferStore;
use crate::transfer::Transfer;
use crate::types::{Address, FeeBasis, Network, TransferHash, TransferState};
use crate::wallet::Wallet;

/// Subscribers that lag more than this many events drop the oldest ones.
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct WalletManager {
    network: Network,
    account: Arc<Account>,
    wallet: Arc<RwLock<Wallet>>,
    client: Arc<dyn Client>,
    store: TransferStore,
    config: ManagerConfig,
    state: Arc<RwLock<ManagerState>>,
    block_height: Arc<AtomicU64>,
    events: broadcast::Sender<ManagerEvent>,
    sync_requests: Arc<AtomicU64>,
    sync_notify: Arc<Notify>,
    shutdown: broadcast::Sender<()>,
    status: Arc<RwLock<SyncStatus>>,
    engine_started: AtomicBool,
}

impl WalletManager {
    /// Build a manager in state `created` and replay its persisted transfers.
    ///
    /// Nothing touches the network here; the first client call happens after
    /// [`connect`](Self::connect). The account must belong to the network's
    /// chain.
    pub async fn create(
        client: Arc<dyn Client>,
        network: Network,
        account: Arc<Account>,
        config: ManagerConfig,
    ) -> Result<Self> {
        config.validate()?;
        if account.chain_type() != network.chain_type() {
            return Err(Error::TypeMismatch {
                expected: network.chain_type().to_string(),
                found: account.chain_type().to_string(),
            });
        }

        let store = TransferStore::new(&config.storage_dir, &network);
        let mut wallet = Wallet::new(account.clone());

        let mut restored = 0usize;
        for transfer in store.load_all().await? {
            match wallet.add_transfer(transfer) {
                Ok(outcome) if outcome.is_change() => restored += 1,
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "Restored transfer left the balance inconsistent")
                }
            }
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, _) = broadcast::channel(1);

        info!(
            network = %network.storage_tag(),
            address = %account.address(),
            restored,
            "Wallet manager created"
        );

        Ok(Self {
            network,
            account,
            wallet: Arc::new(RwLock::new(wallet)),
            client,
            store,
            block_height: Arc::new(AtomicU64::new(config.initial_block_height)),
            state: Arc::new(RwLock::new(ManagerState::Created)),
            events,
            sync_requests: Arc::new(AtomicU64::new(0)),
            sync_notify: Arc::new(Notify::new()),
            shutdown,
            status: Arc::new(RwLock::new(SyncStatus {
                last_synced_block: config.initial_block_height,
                ..SyncStatus::default()
            })),
            engine_started: AtomicBool::new(false),
            config,
        })
    }

    /// Enable syncing. The background engine starts on the first connect and
    /// survives later disconnects; reconnecting only re-enables it.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.write().await;
        match *state {
            ManagerState::Stopped => Err(Error::ManagerStopped),
            ManagerState::Connected | ManagerState::Syncing => Ok(()),
            from @ (ManagerState::Created | ManagerState::Disconnected) => {
                *state = ManagerState::Connected;
                drop(state);
                let _ = self.events.send(ManagerEvent::StateChanged {
                    from,
                    to: ManagerState::Connected,
                });
                info!(network = %self.network.storage_tag(), "Wallet manager connected");
                if !self.engine_started.swap(true, Ordering::SeqCst) {
                    self.spawn_engine();
                }
                Ok(())
            }
        }
    }

    /// Suppress sync triggers without losing any in-flight work; a pass that
    /// already started runs to completion.
    pub async fn disconnect(&self) {
        let mut state = self.state.write().await;
        match *state {
            from @ (ManagerState::Connected | ManagerState::Syncing) => {
                *state = ManagerState::Disconnected;
                drop(state);
                let _ = self.events.send(ManagerEvent::StateChanged {
                    from,
                    to: ManagerState::Disconnected,
                });
                info!(network = %self.network.storage_tag(), "Wallet manager disconnected");
            }
            other => debug!(state = %other, "Disconnect ignored"),
        }
    }

    /// Request an immediate sync pass. Requests arriving while a pass is in
    /// flight are answered by that pass; a burst of calls costs one client
    /// round-trip. Ignored unless connected.
    pub async fn sync(&self) {
        let state = *self.state.read().await;
        match state {
            ManagerState::Connected | ManagerState::Syncing => {
                self.sync_requests.fetch_add(1, Ordering::SeqCst);
                self.sync_notify.notify_one();
            }
            other => debug!(state = %other, "Sync request ignored while not connected"),
        }
    }

    /// Stop permanently. Terminal: a stopped manager cannot reconnect, and a
    /// fresh one must be created to resume work on this account.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if state.is_terminal() {
            return;
        }
        let from = *state;
        *state = ManagerState::Stopped;
        drop(state);
        let _ = self.events.send(ManagerEvent::StateChanged {
            from,
            to: ManagerState::Stopped,
        });
        let _ = self.shutdown.send(());
        info!(network = %self.network.storage_tag(), "Wallet manager stopped");
    }

    fn spawn_engine(&self) {
        SyncEngine {
            network: self.network.clone(),
            account: self.account.clone(),
            wallet: self.wallet.clone(),
            client: self.client.clone(),
            store: self.store.clone(),
            state: self.state.clone(),
            block_height: self.block_height.clone(),
            events: self.events.clone(),
            status: self.status.clone(),
            sync_requests: self.sync_requests.clone(),
            sync_notify: self.sync_notify.clone(),
            shutdown: self.shutdown.clone(),
            sync_period: Duration::from_secs(self.config.sync_period_secs),
        }
        .spawn();
    }

    /// Sign `transfer` with the account key material, insert it into the
    /// wallet, and persist it.
    ///
    /// Returns `false` instead of an error so interactive callers can show a
    /// message without tearing anything down; the cause lands in the log.
    pub async fn sign_transfer(&self, transfer: &mut Transfer, seed: &[u8]) -> bool {
        if let Err(err) = self.account.sign_transfer(transfer, seed) {
            warn!(uid = %transfer.uid(), error = %err, "Signing failed");
            return false;
        }
        self.record_signed(transfer).await
    }

    /// Like [`sign_transfer`](Self::sign_transfer) but with the account's
    /// private key instead of the seed, for hosts that hold raw key material.
    pub async fn sign_transfer_with_key(&self, transfer: &mut Transfer, key: &[u8]) -> bool {
        if let Err(err) = self.account.sign_transfer_with_key(transfer, key) {
            warn!(uid = %transfer.uid(), error = %err, "Signing failed");
            return false;
        }
        self.record_signed(transfer).await
    }

    async fn record_signed(&self, transfer: &Transfer) -> bool {
        match apply_incoming(&self.wallet, &self.store, &self.events, transfer.clone()).await {
            Ok(_) => true,
            Err(err) => {
                warn!(uid = %transfer.uid(), error = %err, "Failed to record signed transfer");
                false
            }
        }
    }

    /// Send a signed transfer to the network.
    ///
    /// The transfer is marked `submitted` before the wire call; a submission
    /// that keeps failing transiently past the configured retry budget, or
    /// fails outright, marks it `errored` and returns the error. Inclusion is
    /// observed later through sync reports.
    pub async fn submit_transfer(&self, hash: &TransferHash) -> Result<()> {
        let transfer = {
            let wallet = self.wallet.read().await;
            wallet
                .get_transfer(hash)
                .cloned()
                .ok_or_else(|| Error::TransferNotFound(hash.to_hex()))?
        };

        match transfer.state() {
            TransferState::Signed | TransferState::Submitted => {}
            other => {
                return Err(Error::InvalidTransferState {
                    state: other.to_string(),
                    expected: "signed or submitted".to_string(),
                })
            }
        }

        let raw = transfer
            .raw_bytes()
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| Error::MalformedInput("transfer has no signed payload".into()))?;

        self.set_transfer_state(hash, TransferState::Submitted)
            .await?;

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(self.config.submit_retry_secs)),
            ..ExponentialBackoff::default()
        };
        let client = self.client.clone();
        let outcome = backoff::future::retry(policy, || {
            let client = client.clone();
            let raw = raw.clone();
            async move {
                client.submit_transfer(&raw).await.map_err(|err| {
                    if err.is_retryable() {
                        debug!(error = %err, "Submission failed; retrying");
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            }
        })
        .await;

        match outcome {
            Ok(()) => {
                info!(hash = %hash.to_hex(), "Transfer submitted");
                Ok(())
            }
            Err(err) => {
                warn!(
                    hash = %hash.to_hex(),
                    error = %err,
                    "Submission failed; marking transfer errored"
                );
                self.set_transfer_state(
                    hash,
                    TransferState::Errored {
                        reason: err.to_string(),
                    },
                )
                .await?;
                Err(err)
            }
        }
    }

    /// Record or update a transfer reported by the host itself, for example
    /// out of a push notification. Amounts and fees are decimal strings as
    /// they arrive over announcement interfaces. Safe to repeat with the same
    /// report; a report older than what is already applied is ignored.
    #[allow(clippy::too_many_arguments)]
    pub async fn recover_transfer(
        &self,
        hash: TransferHash,
        source: &str,
        target: &str,
        amount: &str,
        currency: &str,
        fee: &str,
        timestamp: u64,
        block_height: u64,
    ) -> Result<Transfer> {
        let adapter = self.account.adapter();
        let source = adapter.parse_address(source)?;
        let target = adapter.parse_address(target)?;
        let amount = U256::from_dec_str(amount)
            .map_err(|_| Error::MalformedInput(format!("bad amount {:?}", amount)))?;
        let fee = U256::from_dec_str(fee)
            .map_err(|_| Error::MalformedInput(format!("bad fee {:?}", fee)))?;

        let (source_owned, target_owned) = {
            let wallet = self.wallet.read().await;
            (wallet.has_address(&source), wallet.has_address(&target))
        };
        let direction = direction_for(source_owned, target_owned).ok_or_else(|| {
            Error::MalformedInput("transfer references no wallet address".into())
        })?;

        let state = if block_height > 0 {
            TransferState::Included {
                block_height,
                block_timestamp: timestamp,
            }
        } else {
            TransferState::Submitted
        };

        let incoming = Transfer::from_recovery(
            hash,
            source,
            target,
            amount,
            FeeBasis::new(fee, 1),
            currency.to_string(),
            direction,
            state,
            timestamp,
            block_height,
        );

        let (_, merged) =
            apply_incoming(&self.wallet, &self.store, &self.events, incoming).await?;
        Ok(merged)
    }

    /// Decode a raw transaction and record every movement touching a wallet
    /// address; movements between foreign addresses are dropped. Used when a
    /// transaction reaches the host as opaque bytes, for example one
    /// submitted by another device against the same account.
    pub async fn recover_transfers_from_raw_transaction(
        &self,
        bytes: &[u8],
        timestamp: u64,
        block_height: u64,
    ) -> Result<Vec<Transfer>> {
        let decoded = self.account.adapter().parse_raw_transaction(bytes)?;

        let addresses: HashSet<Address> = {
            let wallet = self.wallet.read().await;
            wallet.addresses().cloned().collect()
        };

        let mut applied = Vec::new();
        for entry in decoded {
            let incoming = match transfer_from_decoded(
                &addresses,
                entry,
                self.network.chain_type().as_str().to_string(),
                timestamp,
                block_height,
            ) {
                Some(incoming) => incoming,
                None => continue,
            };
            let (_, merged) =
                apply_incoming(&self.wallet, &self.store, &self.events, incoming).await?;
            applied.push(merged);
        }
        Ok(applied)
    }

    /// Fee estimate for a prospective transfer, preferring the network's
    /// answer and falling back to the chain's local cost model when the
    /// client cannot be reached.
    pub async fn estimate_fee(&self, target: &Address, amount: U256) -> Result<FeeBasis> {
        match self.client.estimate_fee(target, amount).await {
            Ok(basis) => Ok(basis),
            Err(err) if err.is_retryable() => {
                debug!(error = %err, "Client fee estimate unavailable; using local model");
                let wallet = self.wallet.read().await;
                let price = wallet.default_fee_basis().price_per_cost_factor;
                Ok(wallet.estimate_fee_basis(target, amount, price))
            }
            Err(err) => Err(err),
        }
    }

    /// Remove all persisted state for `network` under `storage_dir`.
    ///
    /// Not callable on a live manager: stop the manager for this network
    /// first. The next manager created on it starts from an empty transfer
    /// set and rebuilds from chain history.
    pub async fn wipe(storage_dir: impl AsRef<Path>, network: &Network) -> Result<()> {
        TransferStore::wipe(storage_dir, network).await
    }

    async fn set_transfer_state(&self, hash: &TransferHash, state: TransferState) -> Result<bool> {
        let (changed, merged, balance_before, balance) = {
            let mut wallet = self.wallet.write().await;
            let balance_before = wallet.balance();
            let changed = wallet.set_transfer_state(hash, state)?;
            let merged = wallet.get_transfer(hash).cloned();
            (changed, merged, balance_before, wallet.balance())
        };
        let merged = merged.ok_or_else(|| Error::TransferNotFound(hash.to_hex()))?;

        if changed {
            self.store.save(&merged).await?;
            let _ = self.events.send(ManagerEvent::TransferChanged {
                hash: hash.clone(),
                state: merged.state().clone(),
            });
            if balance != balance_before {
                let _ = self.events.send(ManagerEvent::BalanceUpdated { balance });
            }
        }
        Ok(changed)
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    /// The account's primary receive address.
    pub fn account_address(&self) -> &Address {
        self.account.address()
    }

    /// Earliest moment the account could have chain activity.
    pub fn account_timestamp(&self) -> u64 {
        self.account.timestamp()
    }

    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    /// The single wallet this manager maintains.
    pub fn wallet(&self) -> &Arc<RwLock<Wallet>> {
        &self.wallet
    }

    pub async fn state(&self) -> ManagerState {
        *self.state.read().await
    }

    /// Highest chain height observed so far.
    pub fn block_height(&self) -> u64 {
        self.block_height.load(Ordering::SeqCst)
    }

    /// Raise the observed chain height from an out-of-band source. Heights
    /// only move forward; a lower value is ignored.
    pub fn set_block_height(&self, height: u64) {
        let previous = self.block_height.fetch_max(height, Ordering::SeqCst);
        if height > previous {
            let _ = self.events.send(ManagerEvent::BlockHeightUpdated { height });
        }
    }

    pub async fn sync_status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Derived confirmed balance of the wallet.
    pub async fn balance(&self) -> U256 {
        self.wallet.read().await.balance()
    }

    /// Snapshot of one held transfer.
    pub async fn transfer(&self, hash: &TransferHash) -> Option<Transfer> {
        self.wallet.read().await.get_transfer(hash).cloned()
    }

    /// Subscribe to manager events. Each subscriber gets an independent
    /// cursor; slow subscribers lose oldest events rather than applying
    /// backpressure.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for WalletManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletManager")
            .field("network", &self.network)
            .field("address", self.account.address())
            .finish()
    }
}
