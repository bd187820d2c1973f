use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{
    de::Deserializer,
    ser::{SerializeMap, Serializer},
    Deserialize, Serialize,
};
use serde_json::Value;
use tracing::warn;

use crate::habit::{is_tracked_day, lenient, Habit};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEntry {
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub completed: bool,
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub undo_count: u32,
}

/// Per-habit completion history keyed by calendar date.
///
/// Entries whose key or value cannot be decoded are carried verbatim so a
/// rewrite of the log never loses them. They never count as completions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionLog {
    entries: BTreeMap<NaiveDate, CompletionEntry>,
    unreadable: BTreeMap<String, Value>,
}

impl CompletionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&CompletionEntry> {
        self.entries.get(&date)
    }

    pub fn is_completed(&self, date: NaiveDate) -> bool {
        self.entries
            .get(&date)
            .map(|entry| entry.completed)
            .unwrap_or(false)
    }

    pub fn mark_completed(&mut self, date: NaiveDate) -> CompletionEntry {
        self.unreadable.remove(&date.format(DATE_FORMAT).to_string());
        let entry = self.entries.entry(date).or_default();
        entry.completed = true;
        *entry
    }

    /// Clears the completion flag and counts the undo. Undoing a day that was
    /// never completed leaves the log unchanged.
    pub fn undo(&mut self, date: NaiveDate) -> Option<CompletionEntry> {
        let entry = self.entries.get_mut(&date)?;
        if entry.completed {
            entry.completed = false;
            entry.undo_count += 1;
        }
        Some(*entry)
    }

    /// Overlays `other` onto this log; entries from `other` win on shared dates.
    pub fn overlay(&mut self, other: &CompletionLog) {
        for (date, entry) in &other.entries {
            self.unreadable.remove(&date.format(DATE_FORMAT).to_string());
            self.entries.insert(*date, *entry);
        }
        for (key, value) in &other.unreadable {
            self.unreadable.insert(key.clone(), value.clone());
        }
    }

    /// Drops entries that precede `first_day`. Returns how many were dropped.
    pub fn retain_from(&mut self, first_day: NaiveDate) -> usize {
        let before = self.entries.len();
        self.entries.retain(|date, _| *date >= first_day);
        before - self.entries.len()
    }

    /// Number of decoded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.unreadable.is_empty()
    }

    pub fn unreadable_count(&self) -> usize {
        self.unreadable.len()
    }

    pub fn completed_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.completed).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &CompletionEntry)> {
        self.entries.iter()
    }
}

impl Serialize for CompletionLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len() + self.unreadable.len()))?;
        for (date, entry) in &self.entries {
            map.serialize_entry(&date.format(DATE_FORMAT).to_string(), entry)?;
        }
        for (key, value) in &self.unreadable {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CompletionLog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        let mut log = CompletionLog::new();
        for (key, value) in raw {
            let date = NaiveDate::parse_from_str(&key, DATE_FORMAT).ok();
            let entry = serde_json::from_value::<CompletionEntry>(value.clone()).ok();
            match (date, entry) {
                (Some(date), Some(entry)) => {
                    log.entries.insert(date, entry);
                }
                _ => {
                    warn!(key = %key, "keeping unreadable completion entry as-is");
                    log.unreadable.insert(key, value);
                }
            }
        }
        Ok(log)
    }
}

impl FromIterator<(NaiveDate, CompletionEntry)> for CompletionLog {
    fn from_iter<T: IntoIterator<Item = (NaiveDate, CompletionEntry)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            unreadable: BTreeMap::new(),
        }
    }
}

/// Counts consecutive completed tracked occurrences walking backward from `today`.
///
/// Days that are not tracked are skipped. The first tracked day without a
/// completion stops the walk, except `today` itself: a day still in progress
/// does not count as missed until it is over.
pub fn current_streak(habit: &Habit, log: &CompletionLog, today: NaiveDate) -> u32 {
    if !habit.has_tracked_days() || today < habit.created_date {
        return 0;
    }

    let mut streak = 0;
    let mut day = today;
    while day >= habit.created_date {
        if is_tracked_day(habit, day) {
            if log.is_completed(day) {
                streak += 1;
            } else if day != today {
                break;
            }
        }
        day = match day.checked_sub_signed(Duration::days(1)) {
            Some(previous) => previous,
            None => break,
        };
    }
    streak
}
