// ============================================================================
// Version Resolution
// ============================================================================

pub mod resolver;

pub use resolver::{VersionGraph, VersionResolver};

use crate::core::VersionId;
use serde::{Deserialize, Serialize};

/// Read-only view of where the system stands in the version graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReport {
    /// Version recorded by the version store.
    pub current: Option<VersionId>,
    /// Newest version known to the graph.
    pub available: Option<VersionId>,
    /// Next hop from `current`, if any.
    pub next: Option<VersionId>,
    pub all_known_versions: Vec<VersionId>,
}

impl VersionReport {
    pub fn build(resolver: &VersionResolver, current: Option<VersionId>) -> Self {
        let next = current
            .as_ref()
            .and_then(|version| resolver.resolve_next(version));
        Self {
            available: resolver.graph().latest().cloned(),
            all_known_versions: resolver.graph().all_versions(),
            next,
            current,
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        self.next.is_none()
    }
}
