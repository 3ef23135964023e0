pub mod engine;
pub mod memory;
pub mod persistence;
pub mod schema;

pub use engine::{
    BatchWriteReport, InconsistencyMarker, KeyedStore, LeaseStore, MaintenanceFlagStore,
    SchemaExecutor, SettingsStore, VersionStore,
};
pub use memory::{LeaseRecord, StateBackend, StateDocument, TableRows};
pub use persistence::{StateFile, StateLock};
pub use schema::SchemaCatalog;
