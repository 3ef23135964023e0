use crate::core::{Result, UpgradeError, VersionId};
use std::collections::{BTreeMap, BTreeSet};

/// Directed version graph where every version has at most one successor and
/// every edge moves strictly forward in version order.
#[derive(Debug, Clone, Default)]
pub struct VersionGraph {
    successors: BTreeMap<VersionId, VersionId>,
    known: BTreeSet<VersionId>,
}

impl VersionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a chain `v0 -> v1 -> ... -> vn` from an ordered list.
    pub fn linear<I>(versions: I) -> Result<Self>
    where
        I: IntoIterator<Item = VersionId>,
    {
        let mut graph = Self::new();
        let mut previous: Option<VersionId> = None;
        for version in versions {
            if graph.known.contains(&version) {
                return Err(UpgradeError::InvalidVersion(format!(
                    "Version '{}' is listed twice",
                    version
                )));
            }
            match previous.take() {
                Some(from) => graph.add_edge(from, version.clone())?,
                None => {
                    graph.known.insert(version.clone());
                }
            }
            previous = Some(version);
        }
        Ok(graph)
    }

    /// Parses and chains version strings, see [`VersionGraph::linear`].
    pub fn parse_linear<S: AsRef<str>>(versions: &[S]) -> Result<Self> {
        let parsed = versions
            .iter()
            .map(|v| VersionId::parse(v.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::linear(parsed)
    }

    pub fn add_edge(&mut self, from: VersionId, to: VersionId) -> Result<()> {
        if to <= from {
            return Err(UpgradeError::InvalidVersion(format!(
                "Upgrade edge {} -> {} does not move forward",
                from, to
            )));
        }
        if let Some(existing) = self.successors.get(&from) {
            return Err(UpgradeError::InvalidVersion(format!(
                "Version '{}' already upgrades to '{}'",
                from, existing
            )));
        }
        self.known.insert(from.clone());
        self.known.insert(to.clone());
        self.successors.insert(from, to);
        Ok(())
    }

    /// Fluent form of [`VersionGraph::add_edge`].
    pub fn with_edge(mut self, from: VersionId, to: VersionId) -> Result<Self> {
        self.add_edge(from, to)?;
        Ok(self)
    }

    pub fn contains(&self, version: &VersionId) -> bool {
        self.known.contains(version)
    }

    pub fn successor(&self, version: &VersionId) -> Option<&VersionId> {
        self.successors.get(version)
    }

    /// Every known version, ascending.
    pub fn all_versions(&self) -> Vec<VersionId> {
        self.known.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&VersionId> {
        self.known.iter().next_back()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

/// Looks up the next upgrade hop for a version.
#[derive(Debug, Clone, Default)]
pub struct VersionResolver {
    graph: VersionGraph,
}

impl VersionResolver {
    pub fn new(graph: VersionGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &VersionGraph {
        &self.graph
    }

    /// Next version after `current`; `None` for an unknown version or the end of the chain.
    pub fn resolve_next(&self, current: &VersionId) -> Option<VersionId> {
        self.graph.successor(current).cloned()
    }

    /// Every hop from `current` to the last reachable version, in order.
    pub fn path_from(&self, current: &VersionId) -> Vec<VersionId> {
        let mut path = Vec::new();
        let mut cursor = current.clone();
        // edges strictly increase, so the walk always terminates
        while let Some(next) = self.resolve_next(&cursor) {
            path.push(next.clone());
            cursor = next;
        }
        path
    }
}
