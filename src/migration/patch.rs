use crate::changeset::SettingsPatchEntry;
use crate::core::{Result, SettingValue, SettingsMap, UpgradeError};
use crate::storage::{BatchWriteReport, SettingsStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Level, event};

const STORE: &str = "settings";

/// Prior state of one mutated key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchUndoEntry {
    pub key: String,
    /// `None` when the key did not exist before the patch.
    pub prior: Option<SettingValue>,
}

/// Undo capture of a settings patch: exactly the keys it mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub entries: Vec<PatchUndoEntry>,
}

impl PatchRecord {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.key.as_str())
    }
}

/// Applies settings patches under per-entry override/create policy.
#[derive(Clone)]
pub struct SettingsPatchApplier {
    store: Arc<dyn SettingsStore>,
}

impl SettingsPatchApplier {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Applies `entries` to `collection` with a single batch write.
    ///
    /// Entries are evaluated in order against the collection snapshot plus the
    /// values staged by earlier entries of the same batch. Only the first
    /// mutation of a key captures its prior state.
    pub fn apply(&self, collection: &str, entries: &[SettingsPatchEntry]) -> Result<PatchRecord> {
        let snapshot = self.store.get_all(collection)?;

        let mut staged = SettingsMap::new();
        let mut record = PatchRecord::default();
        for entry in entries {
            let already_staged = staged.contains_key(&entry.key);
            let exists = already_staged || snapshot.contains_key(&entry.key);
            if !entry.mutates(exists) {
                event!(
                    Level::TRACE,
                    collection,
                    key = %entry.key,
                    exists,
                    "settings entry skipped by policy"
                );
                continue;
            }
            if !already_staged {
                record.entries.push(PatchUndoEntry {
                    key: entry.key.clone(),
                    prior: snapshot.get(&entry.key).cloned(),
                });
            }
            staged.insert(entry.key.clone(), entry.new_value.clone());
        }

        if staged.is_empty() {
            return Ok(record);
        }

        let report = self.store.set_many(collection, &staged)?;
        ensure_complete(collection, &report)?;
        event!(
            Level::DEBUG,
            collection,
            written = report.written,
            "settings patch applied"
        );
        Ok(record)
    }

    /// Restores every captured key: prior values are written back, keys that
    /// did not exist are removed. Last write wins against unrelated writers.
    pub fn undo(&self, collection: &str, record: &PatchRecord) -> Result<()> {
        let mut restore = SettingsMap::new();
        let mut remove = Vec::new();
        for entry in &record.entries {
            match &entry.prior {
                Some(value) => {
                    restore.insert(entry.key.clone(), value.clone());
                }
                None => remove.push(entry.key.clone()),
            }
        }

        if !restore.is_empty() {
            let report = self.store.set_many(collection, &restore)?;
            ensure_complete(collection, &report)?;
        }
        if !remove.is_empty() {
            self.store.remove_many(collection, &remove)?;
        }
        Ok(())
    }
}

fn ensure_complete(collection: &str, report: &BatchWriteReport) -> Result<()> {
    if report.is_complete() {
        return Ok(());
    }
    Err(UpgradeError::adapter(
        STORE,
        format!(
            "collection '{}' rejected {} key(s): {}",
            collection,
            report.rejected.len(),
            report.rejected.join(", ")
        ),
    ))
}
