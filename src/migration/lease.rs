use crate::core::{Result, UpgradeError};
use crate::storage::LeaseStore;
use chrono::Duration;
use std::sync::Arc;
use tracing::{Level, event};

/// Held upgrade lease; released on `release` or drop.
pub struct UpgradeLease {
    store: Option<Arc<dyn LeaseStore>>,
    name: String,
    holder: String,
}

impl UpgradeLease {
    pub fn acquire(
        store: Arc<dyn LeaseStore>,
        name: impl Into<String>,
        holder: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self> {
        let name = name.into();
        let holder = holder.into();
        if !store.try_acquire(&name, &holder, ttl)? {
            return Err(UpgradeError::LeaseUnavailable(format!(
                "lease '{}' is held by another upgrader",
                name
            )));
        }
        event!(
            Level::DEBUG,
            lease = %name,
            holder = %holder,
            ttl_secs = ttl.num_seconds(),
            "upgrade lease acquired"
        );
        Ok(Self {
            store: Some(store),
            name,
            holder,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn release(mut self) -> Result<()> {
        match self.store.take() {
            Some(store) => store.release(&self.name, &self.holder),
            None => Ok(()),
        }
    }
}

impl Drop for UpgradeLease {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            if let Err(err) = store.release(&self.name, &self.holder) {
                event!(
                    Level::ERROR,
                    lease = %self.name,
                    error = %err,
                    "failed to release upgrade lease; it expires on its own"
                );
            }
        }
    }
}

impl std::fmt::Debug for UpgradeLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeLease")
            .field("name", &self.name)
            .field("holder", &self.holder)
            .finish()
    }
}
