use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{HabitError, Result, StoreError};
use crate::habit::Habit;
use crate::milestones::MilestoneRecord;
use crate::notifications::NotificationSettings;
use crate::tracking::CompletionLog;

pub const HABITS_KEY: &str = "habits";
pub const TRACKING_PREFIX: &str = "tracking_";
pub const MILESTONES_PREFIX: &str = "milestones_";
pub const NOTIFICATION_SETTINGS_PREFIX: &str = "notification_settings_";
pub const CURRENT_INDEX_KEY: &str = "currentHabitIndex";

const FILE_EXTENSION: &str = "json";
const TMP_SUFFIX: &str = "tmp";

/// String-keyed persistence backend. Each `set` replaces a key in full or
/// leaves the previous value untouched.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.values.read().keys().cloned().collect())
    }
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_key(key), FILE_EXTENSION))
    }
}

impl KeyValueStore for JsonDirStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        write_atomic(&self.path_for(key), value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_json = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(FILE_EXTENSION))
                .unwrap_or(false);
            if !is_json {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(decode_key)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Writes to a sibling temp file and renames it into place so a crash or a
/// failed write never leaves a half-written value behind.
fn write_atomic(path: &Path, data: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("{FILE_EXTENSION}.{TMP_SUFFIX}"));
    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(data.as_bytes())?;
        file.sync_all()
    });
    if let Err(err) = written.and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Percent-encodes anything outside `[A-Za-z0-9_-]` so habit ids map to safe
/// file names.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

fn decode_key(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let hex = stem.get(idx + 1..idx + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            idx += 3;
        } else {
            decoded.push(bytes[idx]);
            idx += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

pub fn tracking_key(habit_id: &str) -> String {
    format!("{TRACKING_PREFIX}{habit_id}")
}

pub fn milestones_key(habit_id: &str) -> String {
    format!("{MILESTONES_PREFIX}{habit_id}")
}

pub fn notification_settings_key(habit_id: &str) -> String {
    format!("{NOTIFICATION_SETTINGS_PREFIX}{habit_id}")
}

/// Typed accessors over a [`KeyValueStore`].
///
/// Plain reads never fail: a missing, unreadable or corrupt value is logged
/// and the type's empty default is returned. The `load_*` reads come before a
/// rewrite and report those failures instead, so a value that could not be
/// decoded is never replaced by a default. Writes report failure to the caller.
pub struct HabitRepository {
    store: Box<dyn KeyValueStore>,
}

impl HabitRepository {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn habits(&self) -> Vec<Habit> {
        self.load_habits().unwrap_or_else(|err| {
            warn!(key = HABITS_KEY, %err, "unable to read habits; using default");
            Vec::new()
        })
    }

    /// Decodable habits. Fails only when the list itself cannot be read.
    pub fn load_habits(&self) -> Result<Vec<Habit>> {
        let (habits, _) = self.habit_records()?;
        Ok(habits)
    }

    /// Writes `habits`, keeping stored records this version cannot decode.
    pub fn save_habits(&self, habits: &[Habit]) -> Result<()> {
        let (_, unreadable) = self.habit_records()?;
        self.write_habits(habits, unreadable)
    }

    /// Writes exactly `habits`.
    pub fn replace_habits(&self, habits: &[Habit]) -> Result<()> {
        self.write_habits(habits, Vec::new())
    }

    pub fn tracking(&self, habit_id: &str) -> CompletionLog {
        self.read_or_default(&tracking_key(habit_id))
    }

    pub fn load_tracking(&self, habit_id: &str) -> Result<CompletionLog> {
        self.read_strict(&tracking_key(habit_id))
    }

    pub fn save_tracking(&self, habit_id: &str, log: &CompletionLog) -> Result<()> {
        self.write(&tracking_key(habit_id), log)
    }

    pub fn milestones(&self, habit_id: &str) -> MilestoneRecord {
        self.read_or_default(&milestones_key(habit_id))
    }

    pub fn load_milestones(&self, habit_id: &str) -> Result<MilestoneRecord> {
        self.read_strict(&milestones_key(habit_id))
    }

    pub fn save_milestones(&self, habit_id: &str, record: &MilestoneRecord) -> Result<()> {
        self.write(&milestones_key(habit_id), record)
    }

    pub fn notification_settings(&self, habit_id: &str) -> NotificationSettings {
        self.read_or_default(&notification_settings_key(habit_id))
    }

    pub fn load_notification_settings(&self, habit_id: &str) -> Result<NotificationSettings> {
        self.read_strict(&notification_settings_key(habit_id))
    }

    pub fn save_notification_settings(
        &self,
        habit_id: &str,
        settings: &NotificationSettings,
    ) -> Result<()> {
        self.write(&notification_settings_key(habit_id), settings)
    }

    pub fn current_index(&self) -> usize {
        self.read_or_default(CURRENT_INDEX_KEY)
    }

    pub fn save_current_index(&self, index: usize) -> Result<()> {
        self.write(CURRENT_INDEX_KEY, &index)
    }

    /// Removes every per-habit key. The habit list itself is not touched.
    pub fn remove_habit_data(&self, habit_id: &str) -> Result<()> {
        self.store.remove(&tracking_key(habit_id))?;
        self.store.remove(&milestones_key(habit_id))?;
        self.store.remove(&notification_settings_key(habit_id))?;
        Ok(())
    }

    pub fn remove_tracking(&self, habit_id: &str) -> Result<()> {
        Ok(self.store.remove(&tracking_key(habit_id))?)
    }

    pub fn remove_milestones(&self, habit_id: &str) -> Result<()> {
        Ok(self.store.remove(&milestones_key(habit_id))?)
    }

    /// Removes every key this application owns.
    pub fn clear(&self) -> Result<()> {
        let keys = self.store.keys()?;
        for key in keys.iter().filter(|key| is_owned_key(key)) {
            self.store.remove(key)?;
        }
        Ok(())
    }

    /// Splits the stored list into decoded habits and the raw records that
    /// did not decode.
    fn habit_records(&self) -> Result<(Vec<Habit>, Vec<Value>)> {
        let records: Vec<Value> = self.read_strict(HABITS_KEY)?;
        let mut habits = Vec::with_capacity(records.len());
        let mut unreadable = Vec::new();
        for record in records {
            match serde_json::from_value::<Habit>(record.clone()) {
                Ok(habit) => habits.push(habit),
                Err(err) => {
                    warn!(%err, "keeping unreadable habit record as-is");
                    unreadable.push(record);
                }
            }
        }
        Ok((habits, unreadable))
    }

    fn write_habits(&self, habits: &[Habit], mut unreadable: Vec<Value>) -> Result<()> {
        unreadable.retain(|record| match record.get("id").and_then(Value::as_str) {
            Some(id) => !habits.iter().any(|habit| habit.id == id),
            None => true,
        });
        let mut records = habits
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.extend(unreadable);
        self.write(HABITS_KEY, &records)
    }

    fn read_strict<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(T::default());
        };
        serde_json::from_str(&raw).map_err(|err| {
            HabitError::from(StoreError::Corrupt {
                key: key.to_string(),
                reason: err.to_string(),
            })
        })
    }

    fn read_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.read_strict(key).unwrap_or_else(|err| {
            warn!(key, %err, "unable to read key; using default");
            T::default()
        })
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        self.store.set(key, &payload).map_err(|err| {
            warn!(key, %err, "write failed; previous value kept");
            HabitError::from(err)
        })
    }
}

fn is_owned_key(key: &str) -> bool {
    key == HABITS_KEY
        || key == CURRENT_INDEX_KEY
        || key.starts_with(TRACKING_PREFIX)
        || key.starts_with(MILESTONES_PREFIX)
        || key.starts_with(NOTIFICATION_SETTINGS_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::tests::{daily, date};
    use tempfile::tempdir;

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }

        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }

        fn keys(&self) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn reads_fall_back_to_defaults() {
        let repo = HabitRepository::new(Box::new(BrokenStore));
        assert!(repo.habits().is_empty());
        assert!(repo.tracking("a").is_empty());
        assert!(repo.milestones("a").is_empty());
        assert!(repo.notification_settings("a").enabled);
        assert_eq!(repo.current_index(), 0);
        assert!(repo.save_habits(&[]).is_err());
    }

    #[test]
    fn corrupt_values_read_as_defaults() {
        let store = MemoryStore::new();
        store.set(HABITS_KEY, "{not json").unwrap();
        store.set(&notification_settings_key("a"), "{}").unwrap();
        let repo = HabitRepository::new(Box::new(store));
        assert!(repo.habits().is_empty());
        assert!(repo.notification_settings("a").enabled);
    }

    #[test]
    fn dir_store_persists_across_instances() {
        let temp = tempdir().unwrap();
        {
            let repo = HabitRepository::new(Box::new(JsonDirStore::open(temp.path()).unwrap()));
            repo.save_habits(&[daily("a/b", date(2024, 1, 1))]).unwrap();
            let mut log = CompletionLog::new();
            log.mark_completed(date(2024, 1, 1));
            repo.save_tracking("a/b", &log).unwrap();
        }
        let store = JsonDirStore::open(temp.path()).unwrap();
        assert!(store.path_for("tracking_a/b").ends_with("tracking_a%2Fb.json"));
        assert_eq!(
            store.keys().unwrap(),
            vec![HABITS_KEY.to_string(), "tracking_a/b".to_string()]
        );
        let repo = HabitRepository::new(Box::new(store));
        assert_eq!(repo.habits()[0].id, "a/b");
        assert!(repo.tracking("a/b").is_completed(date(2024, 1, 1)));
    }

    #[test]
    fn clear_only_touches_owned_keys() {
        let store = MemoryStore::new();
        store.set("theme", "\"dark\"").unwrap();
        let repo = HabitRepository::new(Box::new(store));
        repo.save_habits(&[daily("a", date(2024, 1, 1))]).unwrap();
        repo.save_current_index(0).unwrap();
        repo.save_milestones("a", &[7].into_iter().collect()).unwrap();
        repo.clear().unwrap();
        assert!(repo.habits().is_empty());
        assert!(repo.milestones("a").is_empty());
        assert_eq!(repo.store.keys().unwrap(), vec!["theme".to_string()]);
    }

    #[test]
    fn key_encoding_round_trips() {
        for key in ["habits", "tracking_1700000000000", "milestones_a b%c"] {
            assert_eq!(decode_key(&encode_key(key)).as_deref(), Some(key));
        }
    }

    #[test]
    fn a_failed_write_keeps_the_previous_value() {
        let temp = tempdir().unwrap();
        let store = JsonDirStore::open(temp.path()).unwrap();
        store.set(HABITS_KEY, "[]").unwrap();

        // A directory squatting on the temp path makes the next write fail.
        let target = store.path_for(HABITS_KEY);
        let tmp = target.with_extension(format!("{FILE_EXTENSION}.{TMP_SUFFIX}"));
        fs::create_dir(&tmp).unwrap();
        assert!(store.set(HABITS_KEY, "[1]").is_err());
        assert_eq!(store.get(HABITS_KEY).unwrap().as_deref(), Some("[]"));

        let repo = HabitRepository::new(Box::new(store.clone()));
        assert!(repo.save_habits(&[daily("a", date(2024, 1, 1))]).is_err());
        assert!(repo.habits().is_empty());
        assert_eq!(store.get(HABITS_KEY).unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn undecodable_habit_records_are_carried_over() {
        let store = MemoryStore::new();
        store
            .set(
                HABITS_KEY,
                r#"[{"id":"old","name":"Old","createdDate":"2024-01-01","daySelection":null},
                    {"id":"future","createdDate":{"era":"next"}}]"#,
            )
            .unwrap();
        let repo = HabitRepository::new(Box::new(store));
        let mut habits = repo.habits();
        assert_eq!(habits.len(), 1);

        habits.push(daily("new", date(2024, 2, 1)));
        repo.save_habits(&habits).unwrap();
        let stored: Vec<Value> =
            serde_json::from_str(&repo.store.get(HABITS_KEY).unwrap().unwrap()).unwrap();
        let ids: Vec<&str> = stored.iter().filter_map(|r| r["id"].as_str()).collect();
        assert_eq!(ids, vec!["old", "new", "future"]);

        repo.replace_habits(&habits).unwrap();
        assert_eq!(repo.load_habits().unwrap().len(), 2);
        let stored: Vec<Value> =
            serde_json::from_str(&repo.store.get(HABITS_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn strict_loads_report_corrupt_values() {
        let store = MemoryStore::new();
        store.set(&tracking_key("a"), "[1, 2").unwrap();
        store.set(&milestones_key("a"), "[7]").unwrap();
        let repo = HabitRepository::new(Box::new(store));
        assert!(repo.tracking("a").is_empty());
        assert!(matches!(
            repo.load_tracking("a"),
            Err(HabitError::Storage(StoreError::Corrupt { .. }))
        ));
        assert_eq!(repo.load_milestones("a").unwrap().to_vec(), vec![7]);
        assert!(repo.load_tracking("missing").unwrap().is_empty());
    }
}
