use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::habit::{is_tracked_day, Habit};
use crate::quotes::contextual_quote;

/// Days searched ahead for the next reminder. One full week covers every
/// weekday selection.
const LOOKAHEAD_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Granted,
    Denied,
    Default,
}

/// Opaque identifier returned by a sink for a displayed notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationHandle(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationRequest {
    pub habit_id: String,
    pub title: String,
    pub body: String,
    pub scheduled_for: NaiveDateTime,
}

/// Platform-specific notification adapters implement this trait.
///
/// A sink without permission returns `None` from `show`; the scheduler treats
/// that as an inert delivery rather than a failure.
pub trait NotificationSink: Send + Sync {
    fn request_permission(&self) -> Permission;
    fn show(&self, notification: &NotificationRequest) -> Option<NotificationHandle>;
}

/// Builds the reminder text for a habit at its current streak.
pub fn compose_reminder(habit: &Habit, streak: u32, at: NaiveDateTime) -> NotificationRequest {
    let mut body = match streak {
        0 => "Time to start your streak! Let's do this!".to_string(),
        1 => "You're on day 1! Keep the momentum going!".to_string(),
        n => format!("You're on day {n}! Keep up the amazing work!"),
    };
    match streak {
        7..=29 => body.push_str("\nYou're building a real habit!"),
        30..=99 => body.push_str("\nYou're unstoppable!"),
        n if n >= 100 => body.push_str("\nLegendary dedication!"),
        _ => {}
    }
    body.push('\n');
    body.push_str(contextual_quote(at, streak));
    NotificationRequest {
        habit_id: habit.id.clone(),
        title: format!("{}!", habit.name),
        body,
        scheduled_for: at,
    }
}

/// Decides whether a reminder should be shown at `now`.
///
/// The check is evaluated once per poll, so the clock must sit inside the
/// configured minute. `last_fired` holds the date of the previous reminder for
/// this habit; a habit fires at most once per calendar day.
pub fn is_notification_due(
    habit: &Habit,
    settings: &NotificationSettings,
    now: NaiveDateTime,
    last_fired: Option<NaiveDate>,
) -> bool {
    if !settings.enabled {
        return false;
    }
    let Some(time) = habit.notification_time else {
        return false;
    };
    if now.hour() != time.hour() || now.minute() != time.minute() {
        return false;
    }
    let today = now.date();
    if !is_tracked_day(habit, today) {
        return false;
    }
    last_fired != Some(today)
}

/// The next instant strictly after `now` at which a reminder is scheduled.
pub fn next_occurrence(habit: &Habit, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let time = habit.notification_time?;
    if !habit.has_tracked_days() {
        return None;
    }
    (0..=LOOKAHEAD_DAYS)
        .filter_map(|offset| now.date().checked_add_signed(Duration::days(offset)))
        .filter(|day| is_tracked_day(habit, *day))
        .map(|day| day.and_time(time))
        .find(|candidate| *candidate > now)
}

/// Time left until the next reminder, always measured from `now`.
///
/// Both readings are local wall-clock times, so across a daylight-saving
/// change the result is off by the shift. Callers that know the time zone
/// should resolve [`next_occurrence`] themselves.
pub fn delay_until_next(habit: &Habit, now: NaiveDateTime) -> Option<Duration> {
    next_occurrence(habit, now).map(|next| next - now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    Idle,
    Armed { next_fire: NaiveDateTime },
    /// Reminded on `on`; becomes `Armed` again on the first tick of a later
    /// day or once `next_fire` is reached.
    Fired {
        on: NaiveDate,
        next_fire: Option<NaiveDateTime>,
    },
}

impl ScheduleState {
    /// The upcoming reminder this state is waiting for, if any.
    pub fn next_fire(&self) -> Option<NaiveDateTime> {
        match self {
            ScheduleState::Idle => None,
            ScheduleState::Armed { next_fire } => Some(*next_fire),
            ScheduleState::Fired { next_fire, .. } => *next_fire,
        }
    }
}

/// Input for one habit during a scheduling pass.
#[derive(Debug, Clone, Copy)]
pub struct HabitReminder<'a> {
    pub habit: &'a Habit,
    pub settings: NotificationSettings,
    pub streak: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fired: Vec<NotificationRequest>,
    pub delivered: usize,
    pub armed: usize,
}

/// Per-habit Armed/Fired state machine driven by a recurring tick.
#[derive(Debug, Default)]
pub struct NotificationScheduler {
    states: HashMap<String, ScheduleState>,
    last_fired: HashMap<String, NaiveDate>,
    running: bool,
}

impl NotificationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn state(&self, habit_id: &str) -> ScheduleState {
        self.states
            .get(habit_id)
            .copied()
            .unwrap_or(ScheduleState::Idle)
    }

    pub fn last_fired(&self, habit_id: &str) -> Option<NaiveDate> {
        self.last_fired.get(habit_id).copied()
    }

    /// Drops every pending entry and arms a fresh schedule.
    pub fn start(&mut self, reminders: &[HabitReminder<'_>], now: NaiveDateTime) -> usize {
        self.states.clear();
        self.running = true;
        for reminder in reminders {
            self.arm(reminder, now);
        }
        let armed = self.armed_count();
        info!(armed, "notification schedule started");
        armed
    }

    /// Cancels every armed entry. Dedup markers are kept so a restart within
    /// the same day cannot repeat a reminder.
    pub fn stop(&mut self) {
        self.states.clear();
        self.running = false;
        info!("notification schedule stopped");
    }

    /// Cancels the pending entry. The dedup marker is kept.
    pub fn disarm(&mut self, habit_id: &str) {
        self.states.remove(habit_id);
    }

    /// Drops everything held for a habit that no longer exists.
    pub fn forget(&mut self, habit_id: &str) {
        self.states.remove(habit_id);
        self.last_fired.remove(habit_id);
    }

    /// Recomputes the entry for one habit, e.g. after its settings changed.
    pub fn rearm(&mut self, reminder: &HabitReminder<'_>, now: NaiveDateTime) {
        if self.running {
            self.arm(reminder, now);
        }
    }

    /// Evaluates every habit once. A tick is one unit of work: all decisions
    /// for this instant are made before the method returns.
    pub fn tick(
        &mut self,
        reminders: &[HabitReminder<'_>],
        now: NaiveDateTime,
        sink: &dyn NotificationSink,
    ) -> TickReport {
        let mut report = TickReport::default();
        if !self.running {
            debug!("notification tick skipped; scheduler stopped");
            return report;
        }

        let known = |id: &String| reminders.iter().any(|reminder| reminder.habit.id == *id);
        self.states.retain(|id, _| known(id));
        self.last_fired.retain(|id, _| known(id));

        let today = now.date();
        for reminder in reminders {
            let id = reminder.habit.id.as_str();
            if !reminder.settings.enabled {
                self.states.remove(id);
                continue;
            }

            let last = self.last_fired(id);
            let state = self.state(id);
            let on_time = is_notification_due(reminder.habit, &reminder.settings, now, last);
            let overdue = match state.next_fire() {
                Some(next_fire) => {
                    next_fire <= now
                        && next_fire.date() == today
                        && last != Some(today)
                        && is_tracked_day(reminder.habit, today)
                }
                None => false,
            };

            if on_time || overdue {
                let request = compose_reminder(reminder.habit, reminder.streak, now);
                match sink.show(&request) {
                    Some(_) => report.delivered += 1,
                    None => debug!(habit_id = id, "reminder not delivered; sink inert"),
                }
                info!(habit_id = id, streak = reminder.streak, "reminder fired");
                self.last_fired.insert(id.to_string(), today);
                let next_fire = next_occurrence(reminder.habit, now);
                self.states
                    .insert(id.to_string(), ScheduleState::Fired { on: today, next_fire });
                report.fired.push(request);
                continue;
            }

            let stale = match state {
                ScheduleState::Idle => true,
                ScheduleState::Armed { next_fire } => next_fire <= now,
                ScheduleState::Fired { on, next_fire } => {
                    on != today || next_fire.map_or(true, |next| next <= now)
                }
            };
            if stale {
                self.arm(reminder, now);
            }
        }

        report.armed = self.armed_count();
        report
    }

    fn arm(&mut self, reminder: &HabitReminder<'_>, now: NaiveDateTime) {
        let id = reminder.habit.id.clone();
        if !reminder.settings.enabled {
            self.states.remove(&id);
            return;
        }
        match next_occurrence(reminder.habit, now) {
            Some(next_fire) => {
                debug!(habit_id = %id, %next_fire, "reminder armed");
                self.states.insert(id, ScheduleState::Armed { next_fire });
            }
            None => {
                self.states.insert(id, ScheduleState::Idle);
            }
        }
    }

    fn armed_count(&self) -> usize {
        self.states
            .values()
            .filter(|state| state.next_fire().is_some())
            .count()
    }
}
