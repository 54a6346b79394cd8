//! Background sync engine
//!
//! One task per manager, started on first connect. The loop multiplexes three
//! wakeups: the periodic interval, on-demand requests, and shutdown. At most
//! one pass is ever in flight; requests arriving while a pass runs are merged
//! into it rather than queued behind it, so a burst of `sync()` calls costs a
//! single client round-trip.
//!
//! A pass never holds the wallet lock across a client call: it snapshots the
//! address set, fetches remote state, then applies each record under a short
//! write lock. A failed pass is logged, recorded in [`SyncStatus`], and simply
//! retried at the next wakeup.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future;
use primitive_types::U256;
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::chain::{ChainAdapter, DecodedTransfer};
use crate::client::{Client, RemoteStatus, TransactionRecord, TransferSummary};
use crate::error::{Error, Result};
use crate::manager::events::{ManagerEvent, ManagerState, SyncStatus};
use crate::storage::TransferStore;
use crate::transfer::Transfer;
use crate::types::{Address, FeeBasis, Network, TransferDirection, TransferState};
use crate::wallet::{AddOutcome, Wallet};

/// Handles cloned out of the manager for the background task.
pub(crate) struct SyncEngine {
    pub(crate) network: Network,
    pub(crate) account: Arc<Account>,
    pub(crate) wallet: Arc<RwLock<Wallet>>,
    pub(crate) client: Arc<dyn Client>,
    pub(crate) store: TransferStore,
    pub(crate) state: Arc<RwLock<ManagerState>>,
    pub(crate) block_height: Arc<AtomicU64>,
    pub(crate) events: broadcast::Sender<ManagerEvent>,
    pub(crate) status: Arc<RwLock<SyncStatus>>,
    pub(crate) sync_requests: Arc<AtomicU64>,
    pub(crate) sync_notify: Arc<Notify>,
    pub(crate) shutdown: broadcast::Sender<()>,
    pub(crate) sync_period: Duration,
}

impl SyncEngine {
    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.sync_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Requests answered so far; compared against the shared counter to
        // decide whether a wakeup still has work behind it.
        let mut served_requests: u64 = 0;

        info!(
            network = %self.network.storage_tag(),
            period_secs = self.sync_period.as_secs(),
            "Sync loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.maybe_pass(&mut served_requests, "periodic").await;
                }
                _ = self.sync_notify.notified() => {
                    if self.sync_requests.load(Ordering::SeqCst) > served_requests {
                        self.maybe_pass(&mut served_requests, "requested").await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(network = %self.network.storage_tag(), "Sync loop shutting down");
                    break;
                }
            }
        }
    }

    /// Run one pass if the manager is connected, otherwise drop the wakeup.
    async fn maybe_pass(&self, served_requests: &mut u64, trigger: &str) {
        if !self.begin_pass().await {
            debug!(trigger, "Skipping sync pass while not connected");
            return;
        }

        let _ = self.events.send(ManagerEvent::SyncStarted);
        debug!(network = %self.network.storage_tag(), trigger, "Sync pass starting");

        let result = self.pass().await;

        // Requests that arrived while the pass was in flight were answered by
        // it; mark them served so the pending wakeup does not start another.
        *served_requests = self.sync_requests.load(Ordering::SeqCst);

        let success = result.is_ok();
        {
            let mut status = self.status.write().await;
            status.passes += 1;
            status.last_pass_at = Some(Utc::now());
            match &result {
                Ok(synced_through) => {
                    status.last_error = None;
                    status.last_synced_block = *synced_through;
                }
                Err(err) => {
                    status.failures += 1;
                    status.last_error = Some(err.to_string());
                }
            }
        }

        if let Err(err) = &result {
            warn!(
                network = %self.network.storage_tag(),
                error = %err,
                "Sync pass failed; will retry at the next wakeup"
            );
        }

        self.end_pass().await;
        let _ = self.events.send(ManagerEvent::SyncEnded { success });
    }

    async fn begin_pass(&self) -> bool {
        let mut state = self.state.write().await;
        if *state != ManagerState::Connected {
            return false;
        }
        *state = ManagerState::Syncing;
        drop(state);
        let _ = self.events.send(ManagerEvent::StateChanged {
            from: ManagerState::Connected,
            to: ManagerState::Syncing,
        });
        true
    }

    async fn end_pass(&self) {
        let mut state = self.state.write().await;
        // disconnect() or stop() during the pass wins; do not override it
        if *state == ManagerState::Syncing {
            *state = ManagerState::Connected;
            drop(state);
            let _ = self.events.send(ManagerEvent::StateChanged {
                from: ManagerState::Syncing,
                to: ManagerState::Connected,
            });
        }
    }

    /// One full sync pass. Returns the height through which history has been
    /// scanned, which becomes the start of the next pass.
    async fn pass(&self) -> Result<u64> {
        let tip = self.client.get_block_height().await?;
        let previous = self.block_height.fetch_max(tip, Ordering::SeqCst);
        if tip > previous {
            debug!(height = tip, "Block height advanced");
            let _ = self.events.send(ManagerEvent::BlockHeightUpdated { height: tip });
        }

        let (addresses, local_balance) = {
            let wallet = self.wallet.read().await;
            let addresses: HashSet<Address> = wallet.addresses().cloned().collect();
            (addresses, wallet.balance())
        };

        // Advisory cross-check; the authoritative balance stays derived from
        // the transfer set.
        let queries: Vec<_> = addresses
            .iter()
            .map(|address| self.client.get_balance(address))
            .collect();
        let mut remote_total = U256::zero();
        let mut remote_complete = true;
        for outcome in future::join_all(queries).await {
            match outcome {
                Ok(value) => remote_total = remote_total.saturating_add(value),
                Err(err) => {
                    debug!(error = %err, "Balance query failed during sync pass");
                    remote_complete = false;
                }
            }
        }
        if remote_complete && remote_total != local_balance {
            warn!(
                local = %local_balance,
                remote = %remote_total,
                "Derived balance disagrees with network report"
            );
        }

        let from = self.status.read().await.last_synced_block;
        for address in &addresses {
            let mut next_from = from;
            loop {
                if self.state.read().await.is_terminal() {
                    debug!("Abandoning sync pass; manager stopped");
                    return Ok(from);
                }
                let page = self.client.get_transactions(address, next_from).await?;
                let count = page.records.len();
                self.apply_records(&addresses, page.records).await;
                debug!(address = %address, count, "Applied history page");
                match page.next_from_block {
                    Some(next) if next > next_from => next_from = next,
                    _ => break,
                }
            }
        }

        Ok(tip)
    }

    /// Apply one page of records in report order. A bad record is logged and
    /// skipped; it never aborts the rest of the page.
    async fn apply_records(&self, addresses: &HashSet<Address>, records: Vec<TransactionRecord>) {
        for record in records {
            match record {
                TransactionRecord::Fields(summary) => {
                    let hash_hex = summary.hash.to_hex();
                    match transfer_from_summary(
                        self.account.adapter().as_ref(),
                        addresses,
                        &summary,
                    ) {
                        Ok(Some(incoming)) => {
                            match apply_incoming(&self.wallet, &self.store, &self.events, incoming)
                                .await
                            {
                                Ok((AddOutcome::Stale, _)) => {
                                    debug!(hash = %hash_hex, "Ignoring stale transfer report");
                                }
                                Ok((outcome, merged)) if outcome.is_change() => {
                                    debug!(
                                        hash = %hash_hex,
                                        state = %merged.state(),
                                        "Transfer updated from network report"
                                    );
                                }
                                Ok(_) => {}
                                Err(err @ Error::BalanceUnderflow { .. }) => {
                                    warn!(
                                        hash = %hash_hex,
                                        error = %err,
                                        "Transfer report underflowed the balance"
                                    );
                                    self.status.write().await.underflows += 1;
                                }
                                Err(err) => {
                                    warn!(
                                        hash = %hash_hex,
                                        error = %err,
                                        "Failed to apply transfer report"
                                    );
                                }
                            }
                        }
                        Ok(None) => {
                            debug!(hash = %hash_hex, "Report references no wallet address; skipped");
                        }
                        Err(err) => {
                            warn!(hash = %hash_hex, error = %err, "Malformed transfer report; record skipped");
                        }
                    }
                }
                TransactionRecord::Raw {
                    bytes,
                    timestamp,
                    block_height,
                } => match self.account.adapter().parse_raw_transaction(&bytes) {
                    Ok(decoded) => {
                        for entry in decoded {
                            let incoming = match transfer_from_decoded(
                                addresses,
                                entry,
                                self.network.chain_type().as_str().to_string(),
                                timestamp,
                                block_height,
                            ) {
                                Some(incoming) => incoming,
                                None => continue,
                            };
                            match apply_incoming(&self.wallet, &self.store, &self.events, incoming)
                                .await
                            {
                                Ok(_) => {}
                                Err(err @ Error::BalanceUnderflow { .. }) => {
                                    warn!(error = %err, "Decoded transfer underflowed the balance");
                                    self.status.write().await.underflows += 1;
                                }
                                Err(err) => {
                                    warn!(error = %err, "Failed to apply decoded transfer");
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Undecodable raw transaction; record skipped");
                    }
                },
            }
        }
    }
}

/// Merge one recovered transfer into the wallet, persist it if anything
/// changed, and notify subscribers. The write lock covers only the in-memory
/// merge; persistence happens on a clone taken under the same lock, so a
/// concurrent reader never observes a half-applied transfer.
pub(crate) async fn apply_incoming(
    wallet: &RwLock<Wallet>,
    store: &TransferStore,
    events: &broadcast::Sender<ManagerEvent>,
    incoming: Transfer,
) -> Result<(AddOutcome, Transfer)> {
    let hash = incoming
        .hash()
        .cloned()
        .ok_or_else(|| Error::MalformedInput("cannot apply a transfer without a hash".into()))?;

    let (applied, merged, balance_before, balance) = {
        let mut guard = wallet.write().await;
        let balance_before = guard.balance();
        let applied = guard.add_transfer(incoming);
        let merged = guard.get_transfer(&hash).cloned();
        (applied, merged, balance_before, guard.balance())
    };

    match applied {
        Ok(outcome) => {
            let merged = merged.ok_or_else(|| Error::TransferNotFound(hash.to_hex()))?;
            if outcome.is_change() {
                store.save(&merged).await?;
                let _ = events.send(ManagerEvent::TransferChanged {
                    hash,
                    state: merged.state().clone(),
                });
                // A transfer change does not always move the balance; a
                // signing, for example, only reserves funds.
                if balance != balance_before {
                    let _ = events.send(ManagerEvent::BalanceUpdated { balance });
                }
            }
            Ok((outcome, merged))
        }
        Err(err @ Error::BalanceUnderflow { .. }) => {
            // The transfer itself was merged; keep disk in step with memory
            // before surfacing the accounting failure.
            if let Some(merged) = merged {
                store.save(&merged).await?;
                let _ = events.send(ManagerEvent::TransferChanged {
                    hash,
                    state: merged.state().clone(),
                });
            }
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Direction of a transfer as seen from this wallet's address set, or `None`
/// when neither endpoint belongs to the wallet.
pub(crate) fn direction_for(
    source_owned: bool,
    target_owned: bool,
) -> Option<TransferDirection> {
    match (source_owned, target_owned) {
        (true, true) => Some(TransferDirection::Recovered),
        (true, false) => Some(TransferDirection::Sent),
        (false, true) => Some(TransferDirection::Received),
        (false, false) => None,
    }
}

/// Map a remote report status onto the local lifecycle. A reverted report
/// lands back in `Submitted`: the transfer is out of its block but still
/// known to the network, and a later report settles it either way.
pub(crate) fn state_from_status(
    status: RemoteStatus,
    block_height: u64,
    block_timestamp: u64,
) -> TransferState {
    match status {
        RemoteStatus::Confirmed => TransferState::Included {
            block_height,
            block_timestamp,
        },
        RemoteStatus::Failed => TransferState::Errored {
            reason: "reported failed by the network".into(),
        },
        RemoteStatus::Pending | RemoteStatus::Reverted => TransferState::Submitted,
    }
}

/// Build a transfer from a parsed history record. Returns `Ok(None)` when the
/// record touches no wallet address.
pub(crate) fn transfer_from_summary(
    adapter: &dyn ChainAdapter,
    addresses: &HashSet<Address>,
    summary: &TransferSummary,
) -> Result<Option<Transfer>> {
    let source = adapter.parse_address(&summary.source)?;
    let target = adapter.parse_address(&summary.target)?;

    let direction = match direction_for(addresses.contains(&source), addresses.contains(&target)) {
        Some(direction) => direction,
        None => return Ok(None),
    };

    let amount = U256::from_dec_str(&summary.amount)
        .map_err(|_| Error::MalformedInput(format!("bad amount {:?}", summary.amount)))?;
    let fee = U256::from_dec_str(&summary.fee)
        .map_err(|_| Error::MalformedInput(format!("bad fee {:?}", summary.fee)))?;

    let state = state_from_status(summary.status, summary.block_height, summary.timestamp);

    Ok(Some(Transfer::from_recovery(
        summary.hash.clone(),
        source,
        target,
        amount,
        // Reports carry only the total fee; preserve it as a unit-cost basis.
        FeeBasis::new(fee, 1),
        summary.currency.clone(),
        direction,
        state,
        summary.timestamp,
        summary.block_height,
    )))
}

/// Build a transfer from one decoded entry of a raw transaction. Entries that
/// touch no wallet address are dropped without comment, matching how raw
/// recovery is fed whole transactions that may bundle unrelated movements.
pub(crate) fn transfer_from_decoded(
    addresses: &HashSet<Address>,
    decoded: DecodedTransfer,
    currency: String,
    timestamp: u64,
    block_height: u64,
) -> Option<Transfer> {
    let direction = direction_for(
        addresses.contains(&decoded.source),
        addresses.contains(&decoded.target),
    )?;

    let state = if block_height > 0 {
        TransferState::Included {
            block_height,
            block_timestamp: timestamp,
        }
    } else {
        TransferState::Submitted
    };

    Some(Transfer::from_recovery(
        decoded.hash,
        decoded.source,
        decoded.target,
        decoded.amount,
        decoded.fee_basis,
        currency,
        direction,
        state,
        timestamp,
        block_height,
    ))
}
