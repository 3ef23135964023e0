use serde::{Deserialize, Serialize};

/// Terminal result of an upgrade attempt.
///
/// The numeric codes are the stable contract with front-ends:
/// ```text
/// Success        0   proceed
/// RolledBack     1   investigate; nothing remains applied
/// Catastrophic  -1   page an operator; rollback itself failed
/// NoUpgradePath  2   nothing to do
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    RolledBack,
    Catastrophic,
    NoUpgradePath,
}

impl Outcome {
    pub fn code(self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::RolledBack => 1,
            Outcome::Catastrophic => -1,
            Outcome::NoUpgradePath => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Outcome::Success),
            1 => Some(Outcome::RolledBack),
            -1 => Some(Outcome::Catastrophic),
            2 => Some(Outcome::NoUpgradePath),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Only a catastrophic run needs a human before anything else happens.
    pub fn needs_operator(self) -> bool {
        matches!(self, Outcome::Catastrophic)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "SUCCESS"),
            Outcome::RolledBack => write!(f, "ROLLED_BACK"),
            Outcome::Catastrophic => write!(f, "CATASTROPHIC"),
            Outcome::NoUpgradePath => write!(f, "NO_UPGRADE_PATH"),
        }
    }
}
