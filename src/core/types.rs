use super::{Result, UpgradeError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

lazy_static::lazy_static! {
    static ref VERSION_PATTERN: Regex =
        Regex::new(r"^\d+(\.\d+)*(-[0-9A-Za-z]+(\.[0-9A-Za-z]+)*)?$").unwrap();
}

/// Value stored in a settings collection or keyed table.
pub type SettingValue = serde_json::Value;

/// Full key/value contents of one settings collection.
pub type SettingsMap = BTreeMap<String, SettingValue>;

/// A validated, orderable version identifier such as `21.4`, `3.0.1` or `4.0-beta1`.
///
/// Numeric segments compare numerically with missing trailing segments treated
/// as zero; a suffixed pre-release sorts before the bare release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId {
    raw: String,
    numbers: Vec<u64>,
    suffix: Option<String>,
}

impl VersionId {
    pub fn parse(input: &str) -> Result<Self> {
        let raw = input.trim();
        if !VERSION_PATTERN.is_match(raw) {
            return Err(UpgradeError::InvalidVersion(format!(
                "'{}' is not a dotted version identifier",
                input
            )));
        }

        let (numeric, suffix) = match raw.split_once('-') {
            Some((numeric, suffix)) => (numeric, Some(suffix.to_string())),
            None => (raw, None),
        };

        let numbers = numeric
            .split('.')
            .map(|segment| {
                segment.parse::<u64>().map_err(|e| {
                    UpgradeError::InvalidVersion(format!("'{}': segment '{}': {}", input, segment, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: raw.to_string(),
            numbers,
            suffix,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Numeric segments, e.g. `[3, 0, 1]` for `3.0.1`.
    pub fn numbers(&self) -> &[u64] {
        &self.numbers
    }

    pub fn is_prerelease(&self) -> bool {
        self.suffix.is_some()
    }

    fn numeric_cmp(&self, other: &Self) -> Ordering {
        let len = self.numbers.len().max(other.numbers.len());
        for i in 0..len {
            let left = self.numbers.get(i).copied().unwrap_or(0);
            let right = other.numbers.get(i).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl Ord for VersionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.numeric_cmp(other)
            .then_with(|| match (&self.suffix, &other.suffix) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
            // keeps Ord consistent with Eq for spellings like `1.0` vs `1.0.0`
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for VersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for VersionId {
    type Err = UpgradeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionId {
    type Error = UpgradeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<VersionId> for String {
    fn from(value: VersionId) -> Self {
        value.raw
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Structured key of an action registry, rulebook or route table entry.
///
/// Segments are kept as a list and serialized as a JSON array; they are never
/// joined into a string and split again, so any segment may contain any
/// character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct EntryKey(Vec<String>);

impl EntryKey {
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(UpgradeError::InvalidChangeSet(
                "Entry key needs at least one segment".to_string(),
            ));
        }
        Ok(Self(segments))
    }

    /// Single-segment key.
    pub fn single(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl TryFrom<Vec<String>> for EntryKey {
    type Error = UpgradeError;

    fn try_from(value: Vec<String>) -> Result<Self> {
        Self::new(value)
    }
}

impl From<EntryKey> for Vec<String> {
    fn from(value: EntryKey) -> Self {
        value.0
    }
}

impl fmt::Display for EntryKey {
    // Display is for logs only; the debug form keeps segment boundaries visible.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
