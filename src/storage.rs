//! Transfer persistence
//!
//! One JSON file per transfer, under `<dir>/<network-tag>/transfers/`, named
//! by the transfer hash. Writes go through a temp file plus rename so a
//! crash mid-write leaves the previous record or nothing. Loading skips
//! records it cannot read and keeps going; a damaged store must never stop
//! startup, it just yields fewer transfers for the next sync to re-recover.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transfer::Transfer;
use crate::types::Network;

/// Version tag of the on-disk record layout
const RECORD_VERSION: u8 = 1;

/// On-disk envelope around one transfer
#[derive(Serialize, Deserialize)]
struct TransferRecord {
    version: u8,
    saved_at: DateTime<Utc>,
    transfer: Transfer,
}

/// Per-network transfer store
///
/// The only component that touches the storage layout; everything else goes
/// through `save` and `load_all`.
#[derive(Debug, Clone)]
pub struct TransferStore {
    root: PathBuf,
}

impl TransferStore {
    pub fn new(storage_dir: impl AsRef<Path>, network: &Network) -> Self {
        Self {
            root: storage_dir.as_ref().join(network.storage_tag()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn transfers_dir(&self) -> PathBuf {
        self.root.join("transfers")
    }

    fn record_path(&self, hash_hex: &str) -> PathBuf {
        self.transfers_dir().join(format!("{}.json", hash_hex))
    }

    /// Persist one transfer, replacing any previous record for its hash
    ///
    /// Transfers in state `created` have no hash and are never persisted.
    pub async fn save(&self, transfer: &Transfer) -> Result<()> {
        let hash = transfer.hash().ok_or_else(|| {
            Error::MalformedInput("refusing to persist a transfer without a hash".to_string())
        })?;

        let dir = self.transfers_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Storage(format!("create {}: {}", dir.display(), e)))?;

        let record = TransferRecord {
            version: RECORD_VERSION,
            saved_at: Utc::now(),
            transfer: transfer.clone(),
        };
        let data = serde_json::to_string_pretty(&record)?;

        let path = self.record_path(&hash.to_hex());
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Error::Storage(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Storage(format!("rename {}: {}", path.display(), e)))?;

        debug!(hash = %hash, state = %transfer.state(), "persisted transfer");
        Ok(())
    }

    /// Load every readable transfer record
    ///
    /// Unreadable or unparseable records are logged and skipped.
    pub async fn load_all(&self) -> Result<Vec<Transfer>> {
        let dir = self.transfers_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Storage(format!("read {}: {}", dir.display(), e)));
            }
        };

        let mut transfers = Vec::new();
        let mut skipped = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Storage(format!("read {}: {}", dir.display(), e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            match Self::load_record(&path).await {
                Ok(transfer) => transfers.push(transfer),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping corrupt transfer record");
                    skipped += 1;
                }
            }
        }

        info!(
            loaded = transfers.len(),
            skipped,
            dir = %dir.display(),
            "loaded persisted transfers"
        );
        Ok(transfers)
    }

    async fn load_record(path: &Path) -> Result<Transfer> {
        let corrupt = |detail: String| Error::StorageCorrupt {
            path: path.display().to_string(),
            detail,
        };

        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| corrupt(e.to_string()))?;
        let record: TransferRecord =
            serde_json::from_str(&data).map_err(|e| corrupt(e.to_string()))?;

        if record.version != RECORD_VERSION {
            return Err(corrupt(format!("unsupported version {}", record.version)));
        }
        Ok(record.transfer)
    }

    /// Irreversibly delete all persisted state for a network under a path
    ///
    /// Must not be called while a live manager uses the same path; callers
    /// stop the manager first.
    pub async fn wipe(storage_dir: impl AsRef<Path>, network: &Network) -> Result<()> {
        let root = storage_dir.as_ref().join(network.storage_tag());
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {
                info!(dir = %root.display(), "wiped persisted state");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("wipe {}: {}", root.display(), e))),
        }
    }
}
