use crate::habit::Habit;

/// Habit list plus the pointer to the habit currently on screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    habits: Vec<Habit>,
    current_index: usize,
}

impl AppState {
    pub fn new(habits: Vec<Habit>, current_index: usize) -> Self {
        let current_index = clamp_index(current_index, habits.len());
        Self {
            habits,
            current_index,
        }
    }

    pub fn habits(&self) -> &[Habit] {
        &self.habits
    }

    pub fn into_habits(self) -> Vec<Habit> {
        self.habits
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> Option<&Habit> {
        self.habits.get(self.current_index)
    }

    pub fn position(&self, habit_id: &str) -> Option<usize> {
        self.habits.iter().position(|habit| habit.id == habit_id)
    }

    /// Moves the pointer to `index`. Out-of-range targets are ignored.
    pub fn select(&mut self, index: usize) -> Option<&Habit> {
        if index >= self.habits.len() {
            return None;
        }
        self.current_index = index;
        self.habits.get(index)
    }

    pub fn select_next(&mut self) -> Option<&Habit> {
        if self.habits.is_empty() {
            return None;
        }
        let next = (self.current_index + 1) % self.habits.len();
        self.select(next)
    }

    pub fn select_previous(&mut self) -> Option<&Habit> {
        if self.habits.is_empty() {
            return None;
        }
        let len = self.habits.len();
        let previous = (self.current_index + len - 1) % len;
        self.select(previous)
    }

    /// Replaces the list and re-validates the pointer against it.
    pub fn replace_habits(&mut self, habits: Vec<Habit>) {
        self.current_index = clamp_index(self.current_index, habits.len());
        self.habits = habits;
    }
}

/// Keeps `index` inside `[0, len - 1]`; anything out of range resets to 0.
pub fn clamp_index(index: usize, len: usize) -> usize {
    if index < len {
        index
    } else {
        0
    }
}
