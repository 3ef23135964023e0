use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("Adapter failure in {store}: {message}")]
    AdapterFailure { store: String, message: String },

    #[error("Could not enter maintenance window: {0}")]
    EnterMaintenance(String),

    #[error("No upgrade path from version '{0}'")]
    NoUpgradePath(String),

    #[error("Compensation failed at stage '{stage}': {message}")]
    CompensationFailure { stage: String, message: String },

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Recorded version is '{recorded}', not '{requested}'")]
    VersionMismatch { recorded: String, requested: String },

    #[error("Invalid changeset: {0}")]
    InvalidChangeSet(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Upgrade lease unavailable: {0}")]
    LeaseUnavailable(String),

    #[error("System state is flagged inconsistent: {0}")]
    InconsistentState(String),

    #[error("Migration run {0} is not idle")]
    RunNotIdle(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl UpgradeError {
    /// Shorthand for a failed call against a named store adapter.
    pub fn adapter(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AdapterFailure {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Returns true for failures raised before any stage could run.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            UpgradeError::EnterMaintenance(_)
                | UpgradeError::LeaseUnavailable(_)
                | UpgradeError::InconsistentState(_)
                | UpgradeError::InvalidChangeSet(_)
                | UpgradeError::VersionMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, UpgradeError>;

impl<T> From<std::sync::PoisonError<T>> for UpgradeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for UpgradeError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for UpgradeError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
