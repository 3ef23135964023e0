use crate::core::{Result, UpgradeError};
use crate::storage::MaintenanceFlagStore;
use std::sync::Arc;
use tracing::{Level, event};

/// Raised "upgrade in progress" flag, lowered when the window closes.
///
/// The flag is advisory; it does not keep a second upgrader out.
pub struct MaintenanceWindow {
    store: Option<Arc<dyn MaintenanceFlagStore>>,
    flag: String,
}

impl MaintenanceWindow {
    /// Raises the flag. A failure here means no stage may run.
    pub fn enter(store: Arc<dyn MaintenanceFlagStore>, flag: impl Into<String>) -> Result<Self> {
        let flag = flag.into();
        store
            .set_flag(&flag, true)
            .map_err(|e| UpgradeError::EnterMaintenance(format!("{}: {}", flag, e)))?;
        event!(Level::INFO, flag = %flag, "maintenance window entered");
        Ok(Self {
            store: Some(store),
            flag,
        })
    }

    pub fn flag(&self) -> &str {
        &self.flag
    }

    /// Lowers the flag and reports whether that worked.
    pub fn exit(mut self) -> Result<()> {
        match self.store.take() {
            Some(store) => lower(store.as_ref(), &self.flag),
            None => Ok(()),
        }
    }
}

fn lower(store: &dyn MaintenanceFlagStore, flag: &str) -> Result<()> {
    store.set_flag(flag, false)?;
    event!(Level::INFO, flag = %flag, "maintenance window exited");
    Ok(())
}

impl Drop for MaintenanceWindow {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            if let Err(err) = lower(store.as_ref(), &self.flag) {
                event!(
                    Level::ERROR,
                    flag = %self.flag,
                    error = %err,
                    "failed to lower maintenance flag"
                );
            }
        }
    }
}

impl std::fmt::Debug for MaintenanceWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceWindow")
            .field("flag", &self.flag)
            .field("active", &self.store.is_some())
            .finish()
    }
}
