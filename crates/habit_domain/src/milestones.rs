use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_MILESTONE_LADDER: [u32; 4] = [7, 30, 100, 365];

/// Streak lengths already celebrated for a habit. Append-only.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct MilestoneRecord {
    reached: BTreeSet<u32>,
}

/// Non-numeric list items (`null`, strings) are skipped.
impl<'de> Deserialize<'de> for MilestoneRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<Value>::deserialize(deserializer)?;
        Ok(items
            .iter()
            .filter_map(Value::as_u64)
            .filter_map(|value| u32::try_from(value).ok())
            .collect())
    }
}

impl MilestoneRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, value: u32) -> bool {
        self.reached.contains(&value)
    }

    /// Returns `true` when `value` was not recorded before.
    pub fn record(&mut self, value: u32) -> bool {
        self.reached.insert(value)
    }

    pub fn union(&mut self, other: &MilestoneRecord) {
        self.reached.extend(other.reached.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.reached.is_empty()
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.reached.iter().copied().collect()
    }

    pub fn highest(&self) -> Option<u32> {
        self.reached.iter().next_back().copied()
    }
}

impl FromIterator<u32> for MilestoneRecord {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Self {
            reached: iter.into_iter().collect(),
        }
    }
}

/// Returns the ladder value equal to `new_streak` when it has not been
/// celebrated yet. Only exact matches count; skipped rungs are not granted.
pub fn check_milestone(ladder: &[u32], new_streak: u32, existing: &MilestoneRecord) -> Option<u32> {
    if ladder.contains(&new_streak) && !existing.contains(new_streak) {
        Some(new_streak)
    } else {
        None
    }
}
