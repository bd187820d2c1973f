use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{HabitError, Result};
use crate::habit::Habit;
use crate::milestones::MilestoneRecord;
use crate::tracking::CompletionLog;

pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    Replace,
    Merge,
}

impl FromStr for ImportMode {
    type Err = HabitError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(ImportMode::Replace),
            "merge" => Ok(ImportMode::Merge),
            other => Err(HabitError::validation(format!(
                "unknown import mode `{other}` (expected `merge` or `replace`)"
            ))),
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportMode::Replace => f.write_str("replace"),
            ImportMode::Merge => f.write_str("merge"),
        }
    }
}

/// Everything the reconciler reads or writes, detached from storage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub habits: Vec<Habit>,
    pub tracking: BTreeMap<String, CompletionLog>,
    pub milestones: BTreeMap<String, MilestoneRecord>,
}

/// Backup file layout shared with earlier releases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub export_date: String,
    pub habits: Vec<Habit>,
    #[serde(default)]
    pub tracking: BTreeMap<String, CompletionLog>,
    #[serde(default)]
    pub milestones: BTreeMap<String, MilestoneRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<ExportDocument> for StoreSnapshot {
    fn from(document: ExportDocument) -> Self {
        Self {
            habits: document.habits,
            tracking: document.tracking,
            milestones: document.milestones,
        }
    }
}

pub fn export(snapshot: &StoreSnapshot, now: DateTime<Utc>) -> ExportDocument {
    let tracking = snapshot
        .tracking
        .iter()
        .filter(|(_, log)| !log.is_empty())
        .map(|(id, log)| (id.clone(), log.clone()))
        .collect();
    let milestones = snapshot
        .milestones
        .iter()
        .filter(|(_, record)| !record.is_empty())
        .map(|(id, record)| (id.clone(), record.clone()))
        .collect();
    ExportDocument {
        version: EXPORT_VERSION.to_string(),
        export_date: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        habits: snapshot.habits.clone(),
        tracking,
        milestones,
        extra: Map::new(),
    }
}

/// Parses and validates a backup. Any problem rejects the whole document.
pub fn parse_import(text: &str) -> Result<ExportDocument> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| HabitError::validation(format!("backup is not valid JSON: {err}")))?;
    validate_import(&value)?;
    let document: ExportDocument = serde_json::from_value(value)
        .map_err(|err| HabitError::validation(format!("backup has an invalid shape: {err}")))?;

    let mut seen = HashSet::new();
    for habit in &document.habits {
        if !seen.insert(habit.id.as_str()) {
            return Err(HabitError::validation(format!(
                "backup lists habit `{}` more than once",
                habit.id
            )));
        }
    }
    Ok(document)
}

/// Structural checks on the raw JSON before it is interpreted.
pub fn validate_import(value: &Value) -> Result<()> {
    let Some(object) = value.as_object() else {
        return Err(HabitError::validation("invalid data format"));
    };
    let Some(habits) = object.get("habits").and_then(Value::as_array) else {
        return Err(HabitError::validation("missing or invalid habits array"));
    };
    for (index, habit) in habits.iter().enumerate() {
        let present = |field: &str| {
            habit
                .get(field)
                .and_then(Value::as_str)
                .map(|text| !text.trim().is_empty())
                .unwrap_or(false)
        };
        if !(present("id") && present("name") && present("createdDate")) {
            return Err(HabitError::validation(format!(
                "invalid habit structure at position {index}: id, name and createdDate are required"
            )));
        }
    }
    Ok(())
}

/// Reconciles an imported backup with the current data.
///
/// `Replace` keeps only what the backup contains. `Merge` appends habits with
/// new ids, keeps local habits on id collisions, lets imported completion
/// entries win per date and unions milestones.
pub fn merge(existing: StoreSnapshot, incoming: StoreSnapshot, mode: ImportMode) -> StoreSnapshot {
    let merged = match mode {
        ImportMode::Replace => incoming,
        ImportMode::Merge => {
            let StoreSnapshot {
                mut habits,
                mut tracking,
                mut milestones,
            } = existing;

            let known: HashSet<String> = habits.iter().map(|habit| habit.id.clone()).collect();
            for habit in incoming.habits {
                if known.contains(&habit.id) {
                    debug!(habit_id = %habit.id, "import keeps local habit on id collision");
                    continue;
                }
                habits.push(habit);
            }
            for (id, log) in &incoming.tracking {
                tracking.entry(id.clone()).or_default().overlay(log);
            }
            for (id, record) in &incoming.milestones {
                milestones.entry(id.clone()).or_default().union(record);
            }
            StoreSnapshot {
                habits,
                tracking,
                milestones,
            }
        }
    };
    normalize(merged)
}

/// Drops data that belongs to no habit, empty entries, and completion entries
/// dated before the habit existed.
fn normalize(mut snapshot: StoreSnapshot) -> StoreSnapshot {
    let created: BTreeMap<&str, _> = snapshot
        .habits
        .iter()
        .map(|habit| (habit.id.as_str(), habit.created_date))
        .collect();

    snapshot.tracking.retain(|id, log| match created.get(id.as_str()) {
        Some(first_day) => {
            let dropped = log.retain_from(*first_day);
            if dropped > 0 {
                debug!(habit_id = %id, dropped, "dropped completion entries before creation");
            }
            !log.is_empty()
        }
        None => false,
    });
    snapshot
        .milestones
        .retain(|id, record| created.contains_key(id.as_str()) && !record.is_empty());
    snapshot
}
