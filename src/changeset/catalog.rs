use super::ChangeSet;
use crate::core::{Result, UpgradeError, VersionId};
use crate::version::{VersionGraph, VersionResolver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Changesets indexed by the upgrade edge they implement.
#[derive(Debug, Clone, Default)]
pub struct ChangeSetCatalog {
    changesets: BTreeMap<(VersionId, VersionId), ChangeSet>,
}

impl ChangeSetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, changeset: ChangeSet) -> Result<()> {
        changeset.validate()?;
        let edge = (changeset.from.clone(), changeset.to.clone());
        if self.changesets.contains_key(&edge) {
            return Err(UpgradeError::InvalidChangeSet(format!(
                "Duplicate changeset for {} -> {}",
                edge.0, edge.1
            )));
        }
        self.changesets.insert(edge, changeset);
        Ok(())
    }

    /// Fluent form of [`ChangeSetCatalog::register`].
    pub fn with(mut self, changeset: ChangeSet) -> Result<Self> {
        self.register(changeset)?;
        Ok(self)
    }

    /// Changeset for one hop. A hop without registered changes still needs its
    /// version recorded, so it yields an empty changeset.
    pub fn changeset_for(&self, from: &VersionId, to: &VersionId) -> ChangeSet {
        self.changesets
            .get(&(from.clone(), to.clone()))
            .cloned()
            .unwrap_or_else(|| ChangeSet::new(from.clone(), to.clone()))
    }

    pub fn len(&self) -> usize {
        self.changesets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }

    /// Every registered changeset must match an edge of the resolver's graph.
    pub fn check_against(&self, resolver: &VersionResolver) -> Result<()> {
        for (from, to) in self.changesets.keys() {
            if resolver.resolve_next(from).as_ref() != Some(to) {
                return Err(UpgradeError::InvalidChangeSet(format!(
                    "Changeset {} -> {} does not match any upgrade edge",
                    from, to
                )));
            }
        }
        Ok(())
    }
}

/// On-disk catalog: the ordered version list plus the changesets between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub versions: Vec<VersionId>,
    #[serde(default)]
    pub changesets: Vec<ChangeSet>,
}

impl CatalogDocument {
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input)
            .map_err(|e| UpgradeError::SerializationError(format!("Invalid catalog: {}", e)))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            UpgradeError::IoError(format!("Failed to read catalog '{}': {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Builds the resolver and the changeset catalog, checking that they agree.
    pub fn into_parts(self) -> Result<(VersionResolver, ChangeSetCatalog)> {
        let resolver = VersionResolver::new(VersionGraph::linear(self.versions)?);
        let mut catalog = ChangeSetCatalog::new();
        for changeset in self.changesets {
            catalog.register(changeset)?;
        }
        catalog.check_against(&resolver)?;
        Ok((resolver, catalog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::SettingsPatchEntry;

    fn v(s: &str) -> VersionId {
        VersionId::parse(s).unwrap()
    }

    #[test]
    fn test_missing_changeset_is_empty() {
        let catalog = ChangeSetCatalog::new();
        let changeset = catalog.changeset_for(&v("1.0"), &v("1.1"));
        assert!(changeset.is_empty());
        assert_eq!(changeset.to, v("1.1"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut catalog = ChangeSetCatalog::new();
        catalog.register(ChangeSet::new(v("1.0"), v("1.1"))).unwrap();
        assert!(catalog.register(ChangeSet::new(v("1.0"), v("1.1"))).is_err());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_document_parsing() {
        let document = CatalogDocument::from_json_str(
            r#"{
                "versions": ["1.0", "1.1", "2.0"],
                "changesets": [
                    {
                        "from": "1.1",
                        "to": "2.0",
                        "schema": [
                            {"forward": "CREATE TABLE tags (id INTEGER)", "backward": "DROP TABLE tags"}
                        ],
                        "settings": [
                            {"collection": "core", "entries": [
                                {"key": "tags_enabled", "new_value": true, "override_existing": false}
                            ]}
                        ],
                        "additions": [
                            {"table": "actions", "key": ["tags", "manage"], "value": {"level": 1}}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();

        let (resolver, catalog) = document.into_parts().unwrap();
        assert_eq!(resolver.resolve_next(&v("1.1")), Some(v("2.0")));

        let changeset = catalog.changeset_for(&v("1.1"), &v("2.0"));
        assert_eq!(changeset.schema.len(), 1);
        assert_eq!(
            changeset.settings[0].entries[0],
            SettingsPatchEntry::new("tags_enabled", true).keep_existing()
        );
        assert_eq!(changeset.additions[0].key.segments(), ["tags", "manage"]);
    }

    #[test]
    fn test_document_rejects_changeset_off_the_graph() {
        let document = CatalogDocument {
            versions: vec![v("1.0"), v("1.1"), v("2.0")],
            changesets: vec![ChangeSet::new(v("1.0"), v("2.0"))],
        };
        assert!(matches!(
            document.into_parts(),
            Err(UpgradeError::InvalidChangeSet(_))
        ));
    }
}
