pub mod error;
pub mod types;

pub use error::{Result, UpgradeError};
pub use types::{EntryKey, SettingValue, SettingsMap, VersionId};
