// ============================================================================
// Changesets
// ============================================================================
//
// Declarative description of one version upgrade. A changeset is plain data:
// it never runs anything itself and is turned into executor stages by
// `migration::plan`.
//
// ============================================================================

pub mod catalog;

pub use catalog::{CatalogDocument, ChangeSetCatalog};

use crate::core::{EntryKey, Result, SettingValue, UpgradeError, VersionId};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// One key of a settings patch together with its write policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatchEntry {
    pub key: String,
    pub new_value: SettingValue,
    /// When false an existing value is left untouched.
    #[serde(default = "default_true")]
    pub override_existing: bool,
    /// When false a missing key stays absent.
    #[serde(default = "default_true")]
    pub allow_create: bool,
}

impl SettingsPatchEntry {
    pub fn new(key: impl Into<String>, new_value: impl Into<SettingValue>) -> Self {
        Self {
            key: key.into(),
            new_value: new_value.into(),
            override_existing: true,
            allow_create: true,
        }
    }

    /// Only fill the key in when it is missing.
    pub fn keep_existing(mut self) -> Self {
        self.override_existing = false;
        self
    }

    /// Only overwrite the key when it already exists.
    pub fn existing_only(mut self) -> Self {
        self.allow_create = false;
        self
    }

    /// The entry mutates its key iff `(exists && override) || (!exists && create)`.
    pub fn mutates(&self, exists: bool) -> bool {
        if exists {
            self.override_existing
        } else {
            self.allow_create
        }
    }
}

/// Batch of settings entries against one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub collection: String,
    pub entries: Vec<SettingsPatchEntry>,
}

/// Forward schema statement and the statement that reverses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaMutation {
    pub forward: String,
    pub backward: String,
}

/// New entry in a keyed table (action registry, rulebook, route table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableAddition {
    pub table: String,
    pub key: EntryKey,
    pub value: SettingValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub from: VersionId,
    pub to: VersionId,
    #[serde(default)]
    pub schema: Vec<SchemaMutation>,
    #[serde(default)]
    pub settings: Vec<SettingsPatch>,
    #[serde(default)]
    pub additions: Vec<TableAddition>,
}

impl ChangeSet {
    /// Empty changeset: applying it only records the new version.
    pub fn new(from: VersionId, to: VersionId) -> Self {
        Self {
            from,
            to,
            schema: Vec::new(),
            settings: Vec::new(),
            additions: Vec::new(),
        }
    }

    pub fn with_schema(mut self, forward: impl Into<String>, backward: impl Into<String>) -> Self {
        self.schema.push(SchemaMutation {
            forward: forward.into(),
            backward: backward.into(),
        });
        self
    }

    /// Appends an entry to the collection's patch, creating the patch on first use.
    pub fn with_setting(mut self, collection: impl Into<String>, entry: SettingsPatchEntry) -> Self {
        let collection = collection.into();
        match self
            .settings
            .iter_mut()
            .find(|patch| patch.collection == collection)
        {
            Some(patch) => patch.entries.push(entry),
            None => self.settings.push(SettingsPatch {
                collection,
                entries: vec![entry],
            }),
        }
        self
    }

    pub fn with_addition(
        mut self,
        table: impl Into<String>,
        key: EntryKey,
        value: impl Into<SettingValue>,
    ) -> Self {
        self.additions.push(TableAddition {
            table: table.into(),
            key,
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.schema.is_empty() && self.settings.is_empty() && self.additions.is_empty()
    }

    /// Checks the changeset's own consistency; store-dependent checks happen
    /// when stages are planned.
    pub fn validate(&self) -> Result<()> {
        if self.to <= self.from {
            return Err(UpgradeError::InvalidChangeSet(format!(
                "Changeset {} -> {} does not move forward",
                self.from, self.to
            )));
        }

        for (i, mutation) in self.schema.iter().enumerate() {
            if mutation.forward.trim().is_empty() || mutation.backward.trim().is_empty() {
                return Err(UpgradeError::InvalidChangeSet(format!(
                    "Schema mutation #{} of {} -> {} needs both a forward and a backward statement",
                    i, self.from, self.to
                )));
            }
        }

        let mut seen_collections = std::collections::HashSet::new();
        for patch in &self.settings {
            if patch.collection.trim().is_empty() {
                return Err(UpgradeError::InvalidChangeSet(
                    "Settings patch without a collection".to_string(),
                ));
            }
            if !seen_collections.insert(patch.collection.as_str()) {
                return Err(UpgradeError::InvalidChangeSet(format!(
                    "Collection '{}' is patched twice",
                    patch.collection
                )));
            }
            if let Some(entry) = patch.entries.iter().find(|e| e.key.trim().is_empty()) {
                return Err(UpgradeError::InvalidChangeSet(format!(
                    "Empty settings key in collection '{}' (value {})",
                    patch.collection, entry.new_value
                )));
            }
        }

        if let Some(addition) = self.additions.iter().find(|a| a.table.trim().is_empty()) {
            return Err(UpgradeError::InvalidChangeSet(format!(
                "Table addition {} has no table name",
                addition.key
            )));
        }

        Ok(())
    }
}
