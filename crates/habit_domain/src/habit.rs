use chrono::{DateTime, Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{HabitError, Result};

/// Weekday numbering used across the engine: 0 = Sunday .. 6 = Saturday.
pub const WEEKDAY_COUNT: u8 = 7;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: String,
    pub name: String,
    #[serde(with = "calendar_date")]
    pub created_date: NaiveDate,
    #[serde(
        default,
        with = "clock_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub notification_time: Option<NaiveTime>,
    #[serde(default, deserialize_with = "lenient::null_as_default")]
    pub frequency: Frequency,
    #[serde(default, deserialize_with = "lenient::day_selection")]
    pub day_selection: Vec<u8>,
    /// Fields this version does not interpret, kept so a round-trip through
    /// storage or export does not lose them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum Frequency {
    #[default]
    Daily,
    CustomDays,
    /// A frequency written by some other version. Never tracked.
    Unknown(String),
}

impl From<String> for Frequency {
    fn from(value: String) -> Self {
        match value.as_str() {
            "daily" => Frequency::Daily,
            "customDays" | "custom" => Frequency::CustomDays,
            _ => Frequency::Unknown(value),
        }
    }
}

impl From<Frequency> for String {
    fn from(value: Frequency) -> Self {
        match value {
            Frequency::Daily => "daily".to_string(),
            Frequency::CustomDays => "customDays".to_string(),
            Frequency::Unknown(raw) => raw,
        }
    }
}

/// User input for a habit that does not exist yet.
#[derive(Debug, Clone, Default)]
pub struct NewHabit {
    pub name: String,
    pub notification_time: Option<NaiveTime>,
    pub frequency: Frequency,
    pub day_selection: Vec<u8>,
    pub extra: Map<String, Value>,
}

/// Partial edit of an existing habit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct HabitUpdate {
    pub name: Option<String>,
    pub notification_time: Option<Option<NaiveTime>>,
    pub frequency: Option<Frequency>,
    pub day_selection: Option<Vec<u8>>,
}

impl NewHabit {
    pub fn into_habit(self, created_date: NaiveDate) -> Result<Habit> {
        let name = validate_name(&self.name)?;
        let day_selection = validate_schedule(&self.frequency, self.day_selection)?;
        Ok(Habit {
            id: Uuid::new_v4().to_string(),
            name,
            created_date,
            notification_time: self.notification_time,
            frequency: self.frequency,
            day_selection,
            extra: self.extra,
        })
    }
}

impl Habit {
    /// Applies an edit. `id` and `created_date` are immutable.
    pub fn apply(&mut self, update: HabitUpdate) -> Result<()> {
        let name = match update.name {
            Some(name) => validate_name(&name)?,
            None => self.name.clone(),
        };
        let frequency = update.frequency.unwrap_or_else(|| self.frequency.clone());
        let selection = update
            .day_selection
            .unwrap_or_else(|| self.day_selection.clone());
        let day_selection = validate_schedule(&frequency, selection)?;

        self.name = name;
        self.frequency = frequency;
        self.day_selection = day_selection;
        if let Some(time) = update.notification_time {
            self.notification_time = time;
        }
        Ok(())
    }

    /// Whether any calendar date can ever be a tracked occurrence.
    pub fn has_tracked_days(&self) -> bool {
        match &self.frequency {
            Frequency::Daily => true,
            Frequency::CustomDays => self.day_selection.iter().any(|day| *day < WEEKDAY_COUNT),
            Frequency::Unknown(_) => false,
        }
    }
}

/// Decides whether `date` is a tracked occurrence for `habit`.
///
/// Unknown frequencies and an empty `customDays` selection are never tracked,
/// so stored data from other versions cannot make the engine misbehave.
pub fn is_tracked_day(habit: &Habit, date: NaiveDate) -> bool {
    match &habit.frequency {
        Frequency::Daily => true,
        Frequency::CustomDays => habit.day_selection.contains(&weekday_index(date)),
        Frequency::Unknown(_) => false,
    }
}

pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (date part is kept).
pub fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|stamp| stamp.date_naive())
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_clock_time(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .ok()
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(HabitError::validation("habit name must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn validate_schedule(frequency: &Frequency, mut days: Vec<u8>) -> Result<Vec<u8>> {
    match frequency {
        Frequency::Daily => Ok(Vec::new()),
        Frequency::CustomDays => {
            if let Some(bad) = days.iter().find(|day| **day >= WEEKDAY_COUNT) {
                return Err(HabitError::validation(format!(
                    "weekday {bad} is out of range (0 = Sunday .. 6 = Saturday)"
                )));
            }
            days.sort_unstable();
            days.dedup();
            if days.is_empty() {
                return Err(HabitError::validation(
                    "custom day habits need at least one selected weekday",
                ));
            }
            Ok(days)
        }
        Frequency::Unknown(raw) => Err(HabitError::validation(format!(
            "unsupported frequency `{raw}`"
        ))),
    }
}

/// Decoders that read `null` and out-of-shape values from older or newer
/// writers as the field's empty default instead of rejecting the record.
pub(crate) mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }

    /// Keeps the weekday numbers that fit in a `u8`; anything else is ignored.
    pub fn day_selection<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = Option::<Value>::deserialize(deserializer)?;
        let days = match raw {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|day| u8::try_from(day).ok())
                .collect(),
            _ => Vec::new(),
        };
        Ok(days)
    }
}

mod calendar_date {
    use chrono::NaiveDate;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format("%Y-%m-%d").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_calendar_date(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid calendar date `{raw}`")))
    }
}

mod clock_time {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        time: &Option<NaiveTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(time) => serializer.serialize_str(&time.format("%H:%M").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => super::parse_clock_time(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid notification time `{raw}`"))),
        }
    }
}
