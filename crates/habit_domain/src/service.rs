use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    error::{HabitError, Result},
    habit::{Habit, HabitUpdate, NewHabit},
    milestones::{check_milestone, MilestoneRecord, DEFAULT_MILESTONE_LADDER},
    notifications::{
        delay_until_next, next_occurrence, HabitReminder, NotificationScheduler, NotificationSettings,
        NotificationSink, ScheduleState, TickReport,
    },
    state::AppState,
    store::{HabitRepository, KeyValueStore, MemoryStore},
    tracking::{current_streak, CompletionLog},
    transfer::{self, ExportDocument, ImportMode, StoreSnapshot},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOffOutcome {
    pub streak: u32,
    pub milestone: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStatistics {
    pub habits_count: usize,
    pub total_days: usize,
    pub total_completions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub mode: ImportMode,
    pub habits_in_backup: usize,
    pub habits_added: usize,
}

pub struct HabitService {
    repository: HabitRepository,
    milestone_ladder: Vec<u32>,
    scheduler: Mutex<NotificationScheduler>,
}

pub struct HabitServiceBuilder {
    store: Option<Box<dyn KeyValueStore>>,
    milestone_ladder: Vec<u32>,
}

impl Default for HabitServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HabitServiceBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            milestone_ladder: DEFAULT_MILESTONE_LADDER.to_vec(),
        }
    }

    pub fn with_store(mut self, store: Box<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_milestone_ladder(mut self, ladder: impl IntoIterator<Item = u32>) -> Self {
        self.milestone_ladder = ladder.into_iter().collect();
        self
    }

    pub fn build(self) -> Result<HabitService> {
        let mut ladder = self.milestone_ladder;
        if ladder.contains(&0) {
            return Err(HabitError::validation("milestone ladder values must be positive"));
        }
        ladder.sort_unstable();
        ladder.dedup();

        let store = self
            .store
            .unwrap_or_else(|| Box::new(MemoryStore::new()));
        Ok(HabitService {
            repository: HabitRepository::new(store),
            milestone_ladder: ladder,
            scheduler: Mutex::new(NotificationScheduler::new()),
        })
    }
}

impl HabitService {
    pub fn builder() -> HabitServiceBuilder {
        HabitServiceBuilder::new()
    }

    pub fn milestone_ladder(&self) -> &[u32] {
        &self.milestone_ladder
    }

    pub fn state(&self) -> AppState {
        AppState::new(self.repository.habits(), self.repository.current_index())
    }

    pub fn habits(&self) -> Vec<Habit> {
        self.repository.habits()
    }

    pub fn habit(&self, habit_id: &str) -> Result<Habit> {
        self.repository
            .habits()
            .into_iter()
            .find(|habit| habit.id == habit_id)
            .ok_or_else(|| HabitError::UnknownHabit(habit_id.to_string()))
    }

    #[instrument(skip(self, new_habit), fields(name = %new_habit.name))]
    pub fn create_habit(&self, new_habit: NewHabit, today: NaiveDate) -> Result<Habit> {
        let habit = new_habit.into_habit(today)?;
        let mut habits = self.repository.load_habits()?;
        if habits.iter().any(|existing| existing.id == habit.id) {
            return Err(HabitError::validation(format!(
                "habit id `{}` is already in use",
                habit.id
            )));
        }
        habits.push(habit.clone());
        self.repository.save_habits(&habits)?;
        self.repository.save_current_index(habits.len() - 1)?;
        info!(habit_id = %habit.id, "habit created");
        Ok(habit)
    }

    #[instrument(skip(self, update))]
    pub fn update_habit(&self, habit_id: &str, update: HabitUpdate) -> Result<Habit> {
        let mut habits = self.repository.load_habits()?;
        let habit = habits
            .iter_mut()
            .find(|habit| habit.id == habit_id)
            .ok_or_else(|| HabitError::UnknownHabit(habit_id.to_string()))?;
        habit.apply(update)?;
        let updated = habit.clone();
        self.repository.save_habits(&habits)?;
        self.scheduler.lock().disarm(habit_id);
        Ok(updated)
    }

    /// Removes a habit with its log, milestones and notification settings.
    #[instrument(skip(self))]
    pub fn delete_habit(&self, habit_id: &str) -> Result<Habit> {
        let mut state = AppState::new(
            self.repository.load_habits()?,
            self.repository.current_index(),
        );
        let position = state
            .position(habit_id)
            .ok_or_else(|| HabitError::UnknownHabit(habit_id.to_string()))?;
        let mut habits = state.habits().to_vec();
        let removed = habits.remove(position);
        self.repository.save_habits(&habits)?;
        self.repository.remove_habit_data(habit_id)?;
        state.replace_habits(habits);
        self.repository.save_current_index(state.current_index())?;
        self.scheduler.lock().forget(habit_id);
        info!(habit_id, "habit deleted");
        Ok(removed)
    }

    pub fn select(&self, index: usize) -> Result<Option<Habit>> {
        let mut state = self.state();
        let selected = state.select(index).cloned();
        if selected.is_some() {
            self.repository.save_current_index(state.current_index())?;
        }
        Ok(selected)
    }

    pub fn select_next(&self) -> Result<Option<Habit>> {
        let mut state = self.state();
        let selected = state.select_next().cloned();
        self.repository.save_current_index(state.current_index())?;
        Ok(selected)
    }

    pub fn select_previous(&self) -> Result<Option<Habit>> {
        let mut state = self.state();
        let selected = state.select_previous().cloned();
        self.repository.save_current_index(state.current_index())?;
        Ok(selected)
    }

    /// Marks `date` completed with a single log write, then reports the new
    /// streak and any milestone reached by it.
    #[instrument(skip(self))]
    pub fn check_off(&self, habit_id: &str, date: NaiveDate, today: NaiveDate) -> Result<CheckOffOutcome> {
        let habit = self.habit(habit_id)?;
        ensure_loggable(&habit, date, today)?;

        let mut log = self.repository.load_tracking(habit_id)?;
        let mut record = self.repository.load_milestones(habit_id)?;
        log.mark_completed(date);
        self.repository.save_tracking(habit_id, &log)?;

        let streak = current_streak(&habit, &log, today);
        let milestone = check_milestone(&self.milestone_ladder, streak, &record);
        if let Some(reached) = milestone {
            record.record(reached);
            self.repository.save_milestones(habit_id, &record)?;
            info!(habit_id, milestone = reached, "milestone reached");
        }
        Ok(CheckOffOutcome { streak, milestone })
    }

    /// Reverts a completion. Milestones already celebrated stay recorded.
    #[instrument(skip(self))]
    pub fn undo_check_off(&self, habit_id: &str, date: NaiveDate, today: NaiveDate) -> Result<u32> {
        let habit = self.habit(habit_id)?;
        ensure_loggable(&habit, date, today)?;

        let mut log = self.repository.load_tracking(habit_id)?;
        if log.is_completed(date) {
            log.undo(date);
            self.repository.save_tracking(habit_id, &log)?;
        }
        Ok(current_streak(&habit, &log, today))
    }

    pub fn streak(&self, habit_id: &str, today: NaiveDate) -> Result<u32> {
        let habit = self.habit(habit_id)?;
        let log = self.repository.tracking(habit_id);
        Ok(current_streak(&habit, &log, today))
    }

    pub fn completion_log(&self, habit_id: &str) -> Result<CompletionLog> {
        self.habit(habit_id)?;
        Ok(self.repository.tracking(habit_id))
    }

    pub fn milestones(&self, habit_id: &str) -> Result<MilestoneRecord> {
        self.habit(habit_id)?;
        Ok(self.repository.milestones(habit_id))
    }

    pub fn notifications_enabled(&self, habit_id: &str) -> bool {
        self.repository.notification_settings(habit_id).enabled
    }

    pub fn set_notifications_enabled(&self, habit_id: &str, enabled: bool) -> Result<()> {
        self.habit(habit_id)?;
        self.repository
            .save_notification_settings(habit_id, &NotificationSettings { enabled })?;
        // A re-enabled habit is armed afresh on the next tick.
        self.scheduler.lock().disarm(habit_id);
        Ok(())
    }

    pub fn toggle_notifications(&self, habit_id: &str) -> Result<bool> {
        let enabled = !self.repository.load_notification_settings(habit_id)?.enabled;
        self.set_notifications_enabled(habit_id, enabled)?;
        Ok(enabled)
    }

    pub fn start_notifications(&self, now: NaiveDateTime) -> usize {
        let inputs = self.reminder_inputs(now.date());
        let reminders = as_reminders(&inputs);
        self.scheduler.lock().start(&reminders, now)
    }

    pub fn stop_notifications(&self) {
        self.scheduler.lock().stop();
    }

    /// Runs one scheduling pass over every habit.
    #[instrument(skip(self, sink))]
    pub fn notification_tick(&self, now: NaiveDateTime, sink: &dyn NotificationSink) -> TickReport {
        let inputs = self.reminder_inputs(now.date());
        let reminders = as_reminders(&inputs);
        self.scheduler.lock().tick(&reminders, now, sink)
    }

    pub fn schedule_state(&self, habit_id: &str) -> ScheduleState {
        self.scheduler.lock().state(habit_id)
    }

    pub fn next_reminder_delay(&self, habit_id: &str, now: NaiveDateTime) -> Result<Option<Duration>> {
        let habit = self.habit(habit_id)?;
        if !self.notifications_enabled(habit_id) {
            return Ok(None);
        }
        Ok(delay_until_next(&habit, now))
    }

    /// Wall-clock time of the next reminder, if reminders are on.
    pub fn next_reminder_at(&self, habit_id: &str, now: NaiveDateTime) -> Result<Option<NaiveDateTime>> {
        let habit = self.habit(habit_id)?;
        if !self.notifications_enabled(habit_id) {
            return Ok(None);
        }
        Ok(next_occurrence(&habit, now))
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let habits = self.repository.habits();
        let mut tracking = BTreeMap::new();
        let mut milestones = BTreeMap::new();
        for habit in &habits {
            tracking.insert(habit.id.clone(), self.repository.tracking(&habit.id));
            milestones.insert(habit.id.clone(), self.repository.milestones(&habit.id));
        }
        StoreSnapshot {
            habits,
            tracking,
            milestones,
        }
    }

    pub fn export(&self, now: DateTime<Utc>) -> ExportDocument {
        transfer::export(&self.snapshot(), now)
    }

    pub fn export_json(&self, now: DateTime<Utc>) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export(now))?)
    }

    /// Validates and applies a backup. Nothing is written when validation fails.
    #[instrument(skip(self, text))]
    pub fn import_json(&self, text: &str, mode: ImportMode) -> Result<ImportSummary> {
        let document = transfer::parse_import(text)?;
        let habits_in_backup = document.habits.len();
        let existing = match mode {
            ImportMode::Merge => self.load_snapshot()?,
            ImportMode::Replace => self.snapshot(),
        };
        let merged = transfer::merge(existing.clone(), document.into(), mode);
        self.write_snapshot(&existing, &merged, mode)?;

        let known: HashSet<&str> = existing.habits.iter().map(|habit| habit.id.as_str()).collect();
        let habits_added = merged
            .habits
            .iter()
            .filter(|habit| !known.contains(habit.id.as_str()))
            .count();

        let kept: HashSet<&str> = merged.habits.iter().map(|habit| habit.id.as_str()).collect();
        let mut scheduler = self.scheduler.lock();
        for habit in existing.habits.iter().chain(merged.habits.iter()) {
            if kept.contains(habit.id.as_str()) {
                scheduler.disarm(&habit.id);
            } else {
                scheduler.forget(&habit.id);
            }
        }
        info!(%mode, habits_in_backup, habits_added, "backup imported");
        Ok(ImportSummary {
            mode,
            habits_in_backup,
            habits_added,
        })
    }

    pub fn statistics(&self) -> DataStatistics {
        let habits = self.repository.habits();
        let mut stats = DataStatistics {
            habits_count: habits.len(),
            ..DataStatistics::default()
        };
        for habit in &habits {
            let log = self.repository.tracking(&habit.id);
            stats.total_days += log.len();
            stats.total_completions += log.completed_count();
        }
        stats
    }

    #[instrument(skip(self))]
    pub fn clear_all(&self) -> Result<()> {
        let habits = self.repository.habits();
        self.repository.clear()?;
        let mut scheduler = self.scheduler.lock();
        for habit in &habits {
            scheduler.forget(&habit.id);
        }
        info!(removed = habits.len(), "all habit data cleared");
        Ok(())
    }

    /// Like [`snapshot`](Self::snapshot), but fails instead of substituting
    /// defaults for values that cannot be read.
    fn load_snapshot(&self) -> Result<StoreSnapshot> {
        let habits = self.repository.load_habits()?;
        let mut tracking = BTreeMap::new();
        let mut milestones = BTreeMap::new();
        for habit in &habits {
            tracking.insert(habit.id.clone(), self.repository.load_tracking(&habit.id)?);
            milestones.insert(habit.id.clone(), self.repository.load_milestones(&habit.id)?);
        }
        Ok(StoreSnapshot {
            habits,
            tracking,
            milestones,
        })
    }

    fn write_snapshot(
        &self,
        previous: &StoreSnapshot,
        next: &StoreSnapshot,
        mode: ImportMode,
    ) -> Result<()> {
        let kept: HashSet<&str> = next.habits.iter().map(|habit| habit.id.as_str()).collect();
        for habit in &next.habits {
            match next.tracking.get(&habit.id) {
                Some(log) => self.repository.save_tracking(&habit.id, log)?,
                None => self.repository.remove_tracking(&habit.id)?,
            }
            match next.milestones.get(&habit.id) {
                Some(record) => self.repository.save_milestones(&habit.id, record)?,
                None => self.repository.remove_milestones(&habit.id)?,
            }
        }
        for habit in previous
            .habits
            .iter()
            .filter(|habit| !kept.contains(habit.id.as_str()))
        {
            self.repository.remove_habit_data(&habit.id)?;
        }
        match mode {
            ImportMode::Merge => self.repository.save_habits(&next.habits)?,
            ImportMode::Replace => self.repository.replace_habits(&next.habits)?,
        }

        let state = AppState::new(next.habits.clone(), self.repository.current_index());
        self.repository.save_current_index(state.current_index())
    }

    fn reminder_inputs(&self, today: NaiveDate) -> Vec<(Habit, NotificationSettings, u32)> {
        self.repository
            .habits()
            .into_iter()
            .map(|habit| {
                let settings = self.repository.notification_settings(&habit.id);
                let streak = current_streak(&habit, &self.repository.tracking(&habit.id), today);
                (habit, settings, streak)
            })
            .collect()
    }
}

fn as_reminders(inputs: &[(Habit, NotificationSettings, u32)]) -> Vec<HabitReminder<'_>> {
    inputs
        .iter()
        .map(|(habit, settings, streak)| HabitReminder {
            habit,
            settings: *settings,
            streak: *streak,
        })
        .collect()
}

fn ensure_loggable(habit: &Habit, date: NaiveDate, today: NaiveDate) -> Result<()> {
    if date < habit.created_date {
        return Err(HabitError::validation(format!(
            "{date} is before `{}` was created ({})",
            habit.name, habit.created_date
        )));
    }
    if date > today {
        return Err(HabitError::validation(format!(
            "{date} is in the future"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::{tests::date, Frequency};
    use crate::error::StoreError;
    use crate::notifications::{NotificationHandle, NotificationRequest, Permission};
    use crate::store::{tracking_key, JsonDirStore, HABITS_KEY};
    use chrono::NaiveTime;
    use serde_json::Value;
    use tempfile::tempdir;

    struct NullSink;

    /// Serves reads from a seeded store and refuses every write.
    struct ReadOnlyStore(MemoryStore);

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read-only".into()))
        }

        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read-only".into()))
        }

        fn keys(&self) -> Result<Vec<String>, StoreError> {
            self.0.keys()
        }
    }

    impl NotificationSink for NullSink {
        fn request_permission(&self) -> Permission {
            Permission::Default
        }

        fn show(&self, _notification: &NotificationRequest) -> Option<NotificationHandle> {
            None
        }
    }

    fn service() -> HabitService {
        HabitService::builder()
            .with_milestone_ladder([7, 30, 100])
            .build()
            .unwrap()
    }

    fn new_daily(name: &str) -> NewHabit {
        NewHabit {
            name: name.into(),
            ..NewHabit::default()
        }
    }

    #[test]
    fn builder_rejects_zero_rungs() {
        assert!(HabitService::builder()
            .with_milestone_ladder([0, 7])
            .build()
            .is_err());
        let service = HabitService::builder()
            .with_milestone_ladder([30, 7, 7])
            .build()
            .unwrap();
        assert_eq!(service.milestone_ladder(), &[7, 30]);
    }

    #[test]
    fn checking_off_a_week_celebrates_once() {
        let service = service();
        let start = date(2024, 1, 1);
        let habit = service.create_habit(new_daily("Walk"), start).unwrap();

        let mut outcomes = Vec::new();
        for offset in 0..7 {
            let day = start + Duration::days(offset);
            outcomes.push(service.check_off(&habit.id, day, day).unwrap());
        }
        assert_eq!(outcomes[5], CheckOffOutcome { streak: 6, milestone: None });
        assert_eq!(outcomes[6], CheckOffOutcome { streak: 7, milestone: Some(7) });

        let seventh = date(2024, 1, 7);
        service.undo_check_off(&habit.id, seventh, seventh).unwrap();
        let again = service.check_off(&habit.id, seventh, seventh).unwrap();
        assert_eq!(again, CheckOffOutcome { streak: 7, milestone: None });
        assert_eq!(service.milestones(&habit.id).unwrap().to_vec(), vec![7]);
        assert_eq!(
            service
                .completion_log(&habit.id)
                .unwrap()
                .get(seventh)
                .unwrap()
                .undo_count,
            1
        );
    }

    #[test]
    fn check_off_rejects_dates_outside_the_habit_lifetime() {
        let service = service();
        let habit = service
            .create_habit(new_daily("Walk"), date(2024, 1, 5))
            .unwrap();
        assert!(matches!(
            service.check_off(&habit.id, date(2024, 1, 4), date(2024, 1, 5)),
            Err(HabitError::Validation(_))
        ));
        assert!(service
            .check_off(&habit.id, date(2024, 1, 6), date(2024, 1, 5))
            .is_err());
        assert!(matches!(
            service.check_off("missing", date(2024, 1, 5), date(2024, 1, 5)),
            Err(HabitError::UnknownHabit(_))
        ));
        assert!(service.completion_log(&habit.id).unwrap().is_empty());
    }

    #[test]
    fn deleting_clamps_the_view_pointer_and_drops_data() {
        let service = service();
        let today = date(2024, 1, 1);
        let a = service.create_habit(new_daily("A"), today).unwrap();
        let b = service.create_habit(new_daily("B"), today).unwrap();
        service.check_off(&b.id, today, today).unwrap();
        assert_eq!(service.state().current_index(), 1);

        service.delete_habit(&b.id).unwrap();
        let state = service.state();
        assert_eq!(state.current_index(), 0);
        assert_eq!(state.current().map(|h| h.id.clone()), Some(a.id));
        assert_eq!(service.statistics().total_days, 0);
        assert!(service.delete_habit(&b.id).is_err());
    }

    #[test]
    fn navigation_persists_the_pointer() {
        let service = service();
        let today = date(2024, 1, 1);
        let a = service.create_habit(new_daily("A"), today).unwrap();
        service.create_habit(new_daily("B"), today).unwrap();
        assert_eq!(service.select_next().unwrap().map(|h| h.id), Some(a.id));
        assert_eq!(service.state().current_index(), 0);
        assert!(service.select(5).unwrap().is_none());
        assert_eq!(service.state().current_index(), 0);
    }

    #[test]
    fn toggling_notifications_disarms_the_habit() {
        let service = service();
        let today = date(2024, 1, 1);
        let habit = service
            .create_habit(
                NewHabit {
                    name: "Stretch".into(),
                    notification_time: NaiveTime::from_hms_opt(7, 0, 0),
                    ..NewHabit::default()
                },
                today,
            )
            .unwrap();
        let now = today.and_hms_opt(6, 0, 0).unwrap();
        assert_eq!(service.start_notifications(now), 1);
        assert!(matches!(
            service.schedule_state(&habit.id),
            ScheduleState::Armed { .. }
        ));

        assert!(!service.toggle_notifications(&habit.id).unwrap());
        assert_eq!(service.schedule_state(&habit.id), ScheduleState::Idle);
        assert_eq!(service.next_reminder_delay(&habit.id, now).unwrap(), None);
        let report = service.notification_tick(today.and_hms_opt(7, 0, 0).unwrap(), &NullSink);
        assert!(report.fired.is_empty());

        assert!(service.toggle_notifications(&habit.id).unwrap());
        assert_eq!(
            service.next_reminder_delay(&habit.id, now).unwrap(),
            Some(Duration::hours(1))
        );
        let report = service.notification_tick(today.and_hms_opt(7, 0, 0).unwrap(), &NullSink);
        assert_eq!(report.fired.len(), 1);
        assert_eq!(report.delivered, 0);
    }

    #[test]
    fn deleting_a_habit_drops_its_reminder_history() {
        let service = service();
        let today = date(2024, 1, 1);
        let keep = service
            .create_habit(
                NewHabit {
                    name: "Stretch".into(),
                    notification_time: NaiveTime::from_hms_opt(7, 0, 0),
                    ..NewHabit::default()
                },
                today,
            )
            .unwrap();
        let gone = service
            .create_habit(
                NewHabit {
                    name: "Read".into(),
                    notification_time: NaiveTime::from_hms_opt(7, 0, 0),
                    ..NewHabit::default()
                },
                today,
            )
            .unwrap();
        service.start_notifications(today.and_hms_opt(6, 0, 0).unwrap());
        let fired_at = today.and_hms_opt(7, 0, 0).unwrap();
        assert_eq!(service.notification_tick(fired_at, &NullSink).fired.len(), 2);
        assert_eq!(
            service.schedule_state(&gone.id),
            ScheduleState::Fired {
                on: today,
                next_fire: Some(date(2024, 1, 2).and_hms_opt(7, 0, 0).unwrap())
            }
        );

        service.set_notifications_enabled(&keep.id, false).unwrap();
        service.delete_habit(&gone.id).unwrap();
        let scheduler = service.scheduler.lock();
        assert_eq!(scheduler.last_fired(&keep.id), Some(today));
        assert_eq!(scheduler.last_fired(&gone.id), None);
        assert_eq!(scheduler.state(&gone.id), ScheduleState::Idle);
        drop(scheduler);

        service.clear_all().unwrap();
        assert_eq!(service.scheduler.lock().last_fired(&keep.id), None);
    }

    #[test]
    fn update_revalidates_custom_days() {
        let service = service();
        let habit = service
            .create_habit(new_daily("Gym"), date(2024, 1, 1))
            .unwrap();
        let rejected = service.update_habit(
            &habit.id,
            HabitUpdate {
                frequency: Some(Frequency::CustomDays),
                ..HabitUpdate::default()
            },
        );
        assert!(rejected.is_err());
        assert_eq!(service.habit(&habit.id).unwrap().frequency, Frequency::Daily);
    }

    #[test]
    fn clear_all_removes_everything() {
        let service = service();
        let today = date(2024, 1, 1);
        let habit = service.create_habit(new_daily("A"), today).unwrap();
        service.check_off(&habit.id, today, today).unwrap();
        service.clear_all().unwrap();
        assert!(service.habits().is_empty());
        assert_eq!(service.statistics(), DataStatistics::default());
    }

    fn service_in(dir: &std::path::Path) -> HabitService {
        HabitService::builder()
            .with_store(Box::new(JsonDirStore::open(dir).unwrap()))
            .build()
            .unwrap()
    }

    #[test]
    fn legacy_habit_records_survive_a_rewrite() {
        let temp = tempdir().unwrap();
        let raw = JsonDirStore::open(temp.path()).unwrap();
        raw.set(
            HABITS_KEY,
            r#"[{"id":"1","name":"Walk","createdDate":"2024-01-01","daySelection":null},
                {"id":"2","name":"Read","createdDate":"sometime"}]"#,
        )
        .unwrap();

        let service = service_in(temp.path());
        assert_eq!(service.habits().len(), 1);
        service.create_habit(new_daily("Gym"), date(2024, 1, 2)).unwrap();

        let names: Vec<String> = service.habits().into_iter().map(|habit| habit.name).collect();
        assert_eq!(names, vec!["Walk", "Gym"]);
        let stored: Vec<Value> =
            serde_json::from_str(&raw.get(HABITS_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().any(|record| record["id"] == "2"));
    }

    #[test]
    fn a_null_field_in_one_entry_keeps_the_rest_of_the_log() {
        let temp = tempdir().unwrap();
        let raw = JsonDirStore::open(temp.path()).unwrap();
        raw.set(
            HABITS_KEY,
            r#"[{"id":"1","name":"Walk","createdDate":"2024-01-01","frequency":"daily"}]"#,
        )
        .unwrap();
        raw.set(
            &tracking_key("1"),
            r#"{"2024-01-01":{"completed":true,"undoCount":0},
                "2024-01-02":{"completed":true,"undoCount":null},
                "2024-01-03":{"completed":true,"undoCount":0}}"#,
        )
        .unwrap();

        let service = service_in(temp.path());
        let today = date(2024, 1, 4);
        let outcome = service.check_off("1", today, today).unwrap();
        assert_eq!(outcome.streak, 4);
        assert_eq!(service.completion_log("1").unwrap().len(), 4);
    }

    #[test]
    fn an_unreadable_log_is_never_overwritten() {
        let temp = tempdir().unwrap();
        let raw = JsonDirStore::open(temp.path()).unwrap();
        raw.set(
            HABITS_KEY,
            r#"[{"id":"1","name":"Walk","createdDate":"2024-01-01"}]"#,
        )
        .unwrap();
        raw.set(&tracking_key("1"), "{truncated").unwrap();

        let service = service_in(temp.path());
        let today = date(2024, 1, 2);
        let result = service.check_off("1", today, today);
        assert!(matches!(
            result,
            Err(HabitError::Storage(StoreError::Corrupt { .. }))
        ));
        assert!(service.undo_check_off("1", today, today).is_err());
        assert_eq!(raw.get(&tracking_key("1")).unwrap().as_deref(), Some("{truncated"));
        // Read-only paths still work on the default.
        assert_eq!(service.streak("1", today).unwrap(), 0);
    }

    #[test]
    fn an_unreadable_habit_list_blocks_creation() {
        let temp = tempdir().unwrap();
        let raw = JsonDirStore::open(temp.path()).unwrap();
        raw.set(HABITS_KEY, r#"{"not":"a list"}"#).unwrap();

        let service = service_in(temp.path());
        assert!(service.habits().is_empty());
        assert!(service.create_habit(new_daily("Gym"), date(2024, 1, 1)).is_err());
        assert_eq!(
            raw.get(HABITS_KEY).unwrap().as_deref(),
            Some(r#"{"not":"a list"}"#)
        );
    }

    #[test]
    fn failed_writes_leave_habits_unchanged() {
        let seeded = MemoryStore::new();
        seeded
            .set(
                HABITS_KEY,
                r#"[{"id":"1","name":"Walk","createdDate":"2024-01-01"}]"#,
            )
            .unwrap();
        let service = HabitService::builder()
            .with_store(Box::new(ReadOnlyStore(seeded)))
            .build()
            .unwrap();

        let result = service.create_habit(new_daily("Gym"), date(2024, 1, 2));
        assert!(matches!(result, Err(HabitError::Storage(_))));
        let habits = service.habits();
        assert_eq!(habits.len(), 1);
        assert_eq!(habits[0].name, "Walk");
        assert!(service.delete_habit("1").is_err());
        assert_eq!(service.habits().len(), 1);
    }
}
