use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use habit_domain::{
    habit::{parse_calendar_date, parse_clock_time, Frequency, Habit, NewHabit},
    milestones::DEFAULT_MILESTONE_LADDER,
    notifications::{NotificationHandle, NotificationRequest, NotificationSink, Permission},
    quotes::quote_of_the_day,
    store::JsonDirStore,
    transfer::ImportMode,
    HabitService,
};
use tracing::{debug, info, warn};

const DEFAULT_DATA_DIR: &str = "habit-data";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) data_dir: PathBuf,
    pub(crate) poll_interval: StdDuration,
    pub(crate) milestone_ladder: Vec<u32>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("HABIT_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(interval) = std::env::var("HABIT_POLL_INTERVAL_SECS") {
            match interval.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.poll_interval = StdDuration::from_secs(secs),
                _ => warn!(value = %interval, "ignoring invalid HABIT_POLL_INTERVAL_SECS"),
            }
        }
        if let Ok(list) = std::env::var("HABIT_MILESTONES") {
            match parse_ladder(&list) {
                Some(ladder) => config.milestone_ladder = ladder,
                None => warn!(value = %list, "ignoring invalid HABIT_MILESTONES"),
            }
        }
        Ok(config)
    }

    pub fn set_data_dir(&mut self, dir: PathBuf) {
        info!(path = %dir.display(), "using data directory");
        self.data_dir = dir;
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            poll_interval: StdDuration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            milestone_ladder: DEFAULT_MILESTONE_LADDER.to_vec(),
        }
    }
}

fn parse_ladder(raw: &str) -> Option<Vec<u32>> {
    let ladder = raw
        .split(',')
        .map(|part| part.trim().parse::<u32>().ok().filter(|value| *value > 0))
        .collect::<Option<Vec<_>>>()?;
    (!ladder.is_empty()).then_some(ladder)
}

#[derive(Parser, Debug)]
#[command(name = "habit_helper", version, about = "Track habits, streaks and reminders")]
pub struct Cli {
    /// Directory holding the habit store. Overrides HABIT_DATA_DIR.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a habit.
    Add {
        name: String,
        /// Reminder time, 24-hour `HH:MM`.
        #[arg(long)]
        time: Option<String>,
        /// Tracked weekdays (0 = Sunday .. 6 = Saturday). Omit for daily.
        #[arg(long, value_delimiter = ',')]
        days: Vec<u8>,
    },
    /// Show every habit with its streak.
    List,
    /// Move the current-habit pointer.
    Select {
        index: Option<usize>,
        #[arg(long, conflicts_with_all = ["index", "previous"])]
        next: bool,
        #[arg(long, conflicts_with = "index")]
        previous: bool,
    },
    /// Mark a day completed (defaults to today).
    Check {
        habit: String,
        #[arg(long)]
        date: Option<String>,
    },
    /// Revert a completion (defaults to today).
    Undo {
        habit: String,
        #[arg(long)]
        date: Option<String>,
    },
    /// Delete a habit and all of its data.
    Delete { habit: String },
    /// Toggle reminders for a habit.
    Notify { habit: String },
    /// Write a backup document.
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Load a backup document.
    Import {
        file: PathBuf,
        /// `merge` or `replace`.
        #[arg(long, default_value = "merge")]
        mode: String,
    },
    /// Show totals across all habits.
    Stats,
    /// Remove every habit and all tracking data.
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// Poll for due reminders until interrupted.
    Watch {
        /// Run a single check and exit.
        #[arg(long)]
        once: bool,
    },
}

/// Delivers reminders by printing them to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleNotifier {
    shown: AtomicU64,
}

impl NotificationSink for ConsoleNotifier {
    fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    fn show(&self, notification: &NotificationRequest) -> Option<NotificationHandle> {
        let id = self.shown.fetch_add(1, Ordering::Relaxed) + 1;
        println!(
            "[{}] {}\n{}",
            notification.scheduled_for.format("%H:%M"),
            notification.title,
            notification.body
        );
        Some(NotificationHandle(format!("console-{id}")))
    }
}

pub fn open_service(config: &AppConfig) -> Result<HabitService> {
    let store = JsonDirStore::open(&config.data_dir)
        .with_context(|| format!("unable to open {}", config.data_dir.display()))?;
    let service = HabitService::builder()
        .with_store(Box::new(store))
        .with_milestone_ladder(config.milestone_ladder.clone())
        .build()?;
    Ok(service)
}

pub fn run(config: &AppConfig, command: Command, out: &mut dyn Write) -> Result<()> {
    let service = open_service(config)?;
    let now = Local::now().naive_local();
    execute(&service, config, command, now, out)
}

/// Runs one command against `service` as of `now`.
pub fn execute(
    service: &HabitService,
    config: &AppConfig,
    command: Command,
    now: NaiveDateTime,
    out: &mut dyn Write,
) -> Result<()> {
    let today = now.date();
    match command {
        Command::Add { name, time, days } => {
            let notification_time = match time {
                Some(raw) => Some(
                    parse_clock_time(&raw).ok_or_else(|| anyhow!("invalid time `{raw}`, expected HH:MM"))?,
                ),
                None => None,
            };
            let frequency = if days.is_empty() {
                Frequency::Daily
            } else {
                Frequency::CustomDays
            };
            let habit = service.create_habit(
                NewHabit {
                    name,
                    notification_time,
                    frequency,
                    day_selection: days,
                    ..NewHabit::default()
                },
                today,
            )?;
            writeln!(out, "Created {} ({})", habit.name, habit.id)?;
        }
        Command::List => render_list(service, today, out)?,
        Command::Select {
            index,
            next,
            previous,
        } => {
            let selected = if next {
                service.select_next()?
            } else if previous {
                service.select_previous()?
            } else if let Some(index) = index {
                service.select(index)?
            } else {
                service.state().current().cloned()
            };
            match selected {
                Some(habit) => {
                    let streak = service.streak(&habit.id, today)?;
                    writeln!(out, "{}: {} day streak", habit.name, streak)?;
                    writeln!(out, "{}", navigation_dots(service))?;
                }
                None => writeln!(out, "No habit at that position")?,
            }
        }
        Command::Check { habit, date } => {
            let habit = resolve_habit(service, &habit)?;
            let day = resolve_date(date.as_deref(), today)?;
            let outcome = service.check_off(&habit.id, day, today)?;
            writeln!(out, "{}: {} day streak", habit.name, outcome.streak)?;
            if let Some(milestone) = outcome.milestone {
                writeln!(out, "Milestone reached: {milestone} days!")?;
            }
        }
        Command::Undo { habit, date } => {
            let habit = resolve_habit(service, &habit)?;
            let day = resolve_date(date.as_deref(), today)?;
            let streak = service.undo_check_off(&habit.id, day, today)?;
            writeln!(out, "{}: {} day streak", habit.name, streak)?;
        }
        Command::Delete { habit } => {
            let habit = resolve_habit(service, &habit)?;
            service.delete_habit(&habit.id)?;
            writeln!(out, "Deleted {}", habit.name)?;
        }
        Command::Notify { habit } => {
            let habit = resolve_habit(service, &habit)?;
            let enabled = service.toggle_notifications(&habit.id)?;
            let state = if enabled { "on" } else { "off" };
            writeln!(out, "Reminders for {} are {state}", habit.name)?;
            if let Some(next) = service.next_reminder_at(&habit.id, now)? {
                let delay = elapsed_between(&Local, now, next);
                writeln!(out, "Next reminder in {}", format_delay(delay))?;
            }
        }
        Command::Export { out: target } => {
            let document = service.export_json(Utc::now())?;
            let target = target.unwrap_or_else(|| {
                PathBuf::from(format!("habit-helper-backup-{}.json", today.format("%Y-%m-%d")))
            });
            std::fs::write(&target, document)
                .with_context(|| format!("unable to write {}", target.display()))?;
            writeln!(out, "Exported to {}", target.display())?;
        }
        Command::Import { file, mode } => {
            let mode: ImportMode = mode.parse()?;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("unable to read {}", file.display()))?;
            let summary = service.import_json(&text, mode)?;
            writeln!(
                out,
                "Imported {} habit(s) ({} new, {} mode)",
                summary.habits_in_backup, summary.habits_added, summary.mode
            )?;
        }
        Command::Stats => {
            let stats = service.statistics();
            writeln!(out, "Habits: {}", stats.habits_count)?;
            writeln!(out, "Tracked days: {}", stats.total_days)?;
            writeln!(out, "Completions: {}", stats.total_completions)?;
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to clear without --yes");
            }
            service.clear_all()?;
            writeln!(out, "All data cleared")?;
        }
        Command::Watch { once } => watch(service, config, once)?,
    }
    Ok(())
}

fn watch(service: &HabitService, config: &AppConfig, once: bool) -> Result<()> {
    let sink = ConsoleNotifier::default();
    let permission = sink.request_permission();
    if permission != Permission::Granted {
        warn!(?permission, "notifications not permitted; reminders will be silent");
    }

    let armed = service.start_notifications(Local::now().naive_local());
    info!(armed, interval_secs = config.poll_interval.as_secs(), "watching for reminders");
    loop {
        let report = service.notification_tick(Local::now().naive_local(), &sink);
        debug!(
            fired = report.fired.len(),
            delivered = report.delivered,
            armed = report.armed,
            "tick complete"
        );
        if once {
            break;
        }
        std::thread::sleep(config.poll_interval);
    }
    service.stop_notifications();
    Ok(())
}

fn render_list(service: &HabitService, today: NaiveDate, out: &mut dyn Write) -> Result<()> {
    let state = service.state();
    if state.habits().is_empty() {
        writeln!(out, "No habits yet. Add one with `habit_helper add <name>`.")?;
        return Ok(());
    }
    writeln!(out, "{}", quote_of_the_day(today))?;
    for (index, habit) in state.habits().iter().enumerate() {
        let marker = if index == state.current_index() { '>' } else { ' ' };
        let streak = service.streak(&habit.id, today)?;
        let done = service.completion_log(&habit.id)?.is_completed(today);
        writeln!(
            out,
            "{marker} {index}. {} [{}] {} day streak{}{}",
            habit.name,
            describe_schedule(habit),
            streak,
            if done { ", done today" } else { "" },
            habit
                .notification_time
                .map(|time| format!(", reminder {}", time.format("%H:%M")))
                .unwrap_or_default(),
        )?;
    }
    writeln!(out, "{}", navigation_dots(service))?;
    Ok(())
}

fn navigation_dots(service: &HabitService) -> String {
    let state = service.state();
    (0..state.habits().len())
        .map(|index| if index == state.current_index() { "●" } else { "○" })
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe_schedule(habit: &Habit) -> String {
    const NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
    match &habit.frequency {
        Frequency::Daily => "daily".to_string(),
        Frequency::CustomDays => habit
            .day_selection
            .iter()
            .filter_map(|day| NAMES.get(usize::from(*day)).copied())
            .collect::<Vec<_>>()
            .join(","),
        Frequency::Unknown(raw) => format!("unsupported: {raw}"),
    }
}

/// Real time elapsed between two wall-clock readings in `zone`. A reading
/// inside a daylight-saving gap has no instant, so the plain wall-clock
/// difference is used for it.
fn elapsed_between<Tz: TimeZone>(zone: &Tz, from: NaiveDateTime, to: NaiveDateTime) -> chrono::Duration {
    let start = zone.from_local_datetime(&from).earliest();
    let end = zone.from_local_datetime(&to).earliest();
    match (start, end) {
        (Some(start), Some(end)) => end.signed_duration_since(start),
        _ => to - from,
    }
}

fn format_delay(delay: chrono::Duration) -> String {
    let minutes = delay.num_minutes();
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

/// Finds a habit by id, list position or case-insensitive name.
fn resolve_habit(service: &HabitService, key: &str) -> Result<Habit> {
    let habits = service.habits();
    if let Some(habit) = habits.iter().find(|habit| habit.id == key) {
        return Ok(habit.clone());
    }
    if let Ok(index) = key.parse::<usize>() {
        if let Some(habit) = habits.get(index) {
            return Ok(habit.clone());
        }
    }
    habits
        .into_iter()
        .find(|habit| habit.name.eq_ignore_ascii_case(key.trim()))
        .ok_or_else(|| anyhow!("no habit matches `{key}`"))
}

fn resolve_date(raw: Option<&str>, today: NaiveDate) -> Result<NaiveDate> {
    match raw {
        None => Ok(today),
        Some(raw) => parse_calendar_date(raw).ok_or_else(|| anyhow!("invalid date `{raw}`, expected YYYY-MM-DD")),
    }
}
