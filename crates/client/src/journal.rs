//! # Provisioning Journal
//!
//! Persists the last completed provisioning step per `(mint, slot)` so an
//! interrupted run resumes instead of starting over.
//!
//! ## Atomic Write
//!
//! [`FileJournal`] writes to a temp file first and then renames it over
//! the record. A crash mid-write leaves the previous record intact.
//!
//! ## Layout
//!
//! ```text
//! <journal_dir>/
//!   <mint>-<slot>.json
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use staking_common::PoolConfig;
use thiserror::Error;
use tracing::{debug, warn};

use crate::provisioning::ProvisioningStep;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JournalError {
    #[error("io error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("malformed record {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Progress of one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub mint: Pubkey,
    pub pool_slot: u32,
    /// Admin wallet that signs every step.
    pub owner: Pubkey,
    pub config: PoolConfig,
    pub last_completed: Option<ProvisioningStep>,
    /// Signature of each submitted step. A fee transfer with an unknown
    /// outcome is kept here before its step completes.
    pub signatures: BTreeMap<ProvisioningStep, String>,
    pub updated_at: DateTime<Utc>,
}

impl JournalRecord {
    #[must_use]
    pub fn new(mint: Pubkey, pool_slot: u32, owner: Pubkey, config: PoolConfig) -> Self {
        Self {
            mint,
            pool_slot,
            owner,
            config,
            last_completed: None,
            signatures: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Marks `step` done. Steps only move forward.
    pub fn complete(&mut self, step: ProvisioningStep, signature: Option<String>) {
        if self.last_completed.map_or(true, |last| step > last) {
            self.last_completed = Some(step);
        }
        if let Some(signature) = signature {
            self.signatures.insert(step, signature);
        }
        self.updated_at = Utc::now();
    }

    #[must_use]
    pub fn is_done(&self, step: ProvisioningStep) -> bool {
        self.last_completed.is_some_and(|last| last >= step)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.is_done(ProvisioningStep::MirrorRecorded)
    }
}

pub trait ProvisioningJournal: Send + Sync {
    fn load(&self, mint: &Pubkey, pool_slot: u32) -> Result<Option<JournalRecord>, JournalError>;

    fn save(&self, record: &JournalRecord) -> Result<(), JournalError>;

    /// Every record, finished or not.
    fn list(&self) -> Result<Vec<JournalRecord>, JournalError>;
}

// ════════════════════════════════════════════════════════════════════════════════
// FILE JOURNAL
// ════════════════════════════════════════════════════════════════════════════════

pub struct FileJournal {
    dir: PathBuf,
}

impl FileJournal {
    /// Creates the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, JournalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, &e))?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, mint: &Pubkey, pool_slot: u32) -> PathBuf {
        self.dir.join(format!("{mint}-{pool_slot}.json"))
    }

    fn read_record(path: &Path) -> Result<JournalRecord, JournalError> {
        let raw = fs::read_to_string(path).map_err(|e| io_error(path, &e))?;
        serde_json::from_str(&raw).map_err(|e| JournalError::Malformed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> JournalError {
    JournalError::Io { path: path.display().to_string(), reason: e.to_string() }
}

impl ProvisioningJournal for FileJournal {
    fn load(&self, mint: &Pubkey, pool_slot: u32) -> Result<Option<JournalRecord>, JournalError> {
        let path = self.record_path(mint, pool_slot);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_record(&path).map(Some)
    }

    fn save(&self, record: &JournalRecord) -> Result<(), JournalError> {
        let path = self.record_path(&record.mint, record.pool_slot);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record).map_err(|e| JournalError::Malformed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::write(&tmp_path, json).map_err(|e| io_error(&tmp_path, &e))?;
        fs::rename(&tmp_path, &path).map_err(|e| io_error(&path, &e))?;
        debug!(path = %path.display(), step = ?record.last_completed, "journal saved");
        Ok(())
    }

    fn list(&self) -> Result<Vec<JournalRecord>, JournalError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, &e))?;
        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error(&self.dir, &e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path) {
                Ok(record) => records.push(record),
                // One bad file should not hide the others.
                Err(e) => warn!(error = %e, "skipping unreadable journal record"),
            }
        }
        records.sort_by(|a, b| (a.mint, a.pool_slot).cmp(&(b.mint, b.pool_slot)));
        Ok(records)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// MEMORY JOURNAL
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryJournal {
    records: RwLock<HashMap<(Pubkey, u32), JournalRecord>>,
}

impl MemoryJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProvisioningJournal for MemoryJournal {
    fn load(&self, mint: &Pubkey, pool_slot: u32) -> Result<Option<JournalRecord>, JournalError> {
        Ok(self.records.read().get(&(*mint, pool_slot)).cloned())
    }

    fn save(&self, record: &JournalRecord) -> Result<(), JournalError> {
        self.records
            .write()
            .insert((record.mint, record.pool_slot), record.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<JournalRecord>, JournalError> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| (a.mint, a.pool_slot).cmp(&(b.mint, b.pool_slot)));
        Ok(records)
    }
}

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<FileJournal>();
        assert_send_sync::<MemoryJournal>();
    }
    let _ = check;
};
