use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Streak length from which the streak category replaces the general one.
pub const STREAK_QUOTE_THRESHOLD: u32 = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QuoteCategory {
    General,
    Morning,
    Evening,
    Streak,
    Encouragement,
}

impl QuoteCategory {
    pub const ALL: [QuoteCategory; 5] = [
        QuoteCategory::General,
        QuoteCategory::Morning,
        QuoteCategory::Evening,
        QuoteCategory::Streak,
        QuoteCategory::Encouragement,
    ];

    pub fn quotes(self) -> &'static [&'static str] {
        match self {
            QuoteCategory::General => GENERAL,
            QuoteCategory::Morning => MORNING,
            QuoteCategory::Evening => EVENING,
            QuoteCategory::Streak => STREAK,
            QuoteCategory::Encouragement => ENCOURAGEMENT,
        }
    }
}

const GENERAL: &[&str] = &[
    "You're doing amazing! Keep going! 💪",
    "Every day is a new opportunity to grow! 🌱",
    "Small steps lead to big changes! 🚀",
    "You've got this! Believe in yourself! ⭐",
    "Progress, not perfection! 🎯",
    "One day at a time, you're crushing it! 🔥",
    "Your consistency is inspiring! 🌟",
    "Keep up the fantastic work! 🎉",
    "You're building something great! 🏗️",
    "Every effort counts! You're doing great! 💖",
];

const MORNING: &[&str] = &[
    "Good morning! Today is a fresh start! ☀️",
    "Rise and shine! Let's make today count! 🌅",
    "New day, new possibilities! 🌈",
    "Start your day with intention! 🌸",
    "Morning is your canvas. Paint it well! 🎨",
];

const EVENING: &[&str] = &[
    "Great job today! Rest well! 🌙",
    "You made it through another day! 🌟",
    "Reflect on your wins today! 🏆",
    "Tomorrow is another chance to shine! ✨",
    "Rest and recharge for tomorrow! 💤",
];

const STREAK: &[&str] = &[
    "Your streak is proof of your dedication! 🔥",
    "Look at that streak! You're unstoppable! 🚀",
    "Consistency is your superpower! ⚡",
    "Your commitment is inspiring! 🌟",
    "That's what determination looks like! 💪",
];

const ENCOURAGEMENT: &[&str] = &[
    "Don't give up! You're stronger than you think! 💪",
    "It's okay to have tough days. Keep going! 🌈",
    "You're making progress, even on hard days! 🌱",
    "Believe in your journey! 🗺️",
    "You're capable of amazing things! ⭐",
    "Every small win matters! 🎯",
    "You're not alone in this journey! 🤝",
    "Progress takes time, and you're doing great! ⏰",
];

/// Morning is 05:00-11:59 and evening 18:00-21:59; time of day wins over
/// the streak.
pub fn contextual_category(at: NaiveDateTime, streak: u32) -> QuoteCategory {
    match at.hour() {
        5..=11 => QuoteCategory::Morning,
        18..=21 => QuoteCategory::Evening,
        _ if streak >= STREAK_QUOTE_THRESHOLD => QuoteCategory::Streak,
        _ => QuoteCategory::General,
    }
}

/// Picks a quote from `category`. The same `seed` always yields the same quote.
pub fn quote(category: QuoteCategory, seed: u64) -> &'static str {
    let quotes = category.quotes();
    let index = (seed % quotes.len() as u64) as usize;
    quotes[index]
}

/// Quote for a moment and streak. Varies by day and streak, stable within a day.
pub fn contextual_quote(at: NaiveDateTime, streak: u32) -> &'static str {
    let seed = u64::from(at.date().num_days_from_ce().unsigned_abs()) + u64::from(streak);
    quote(contextual_category(at, streak), seed)
}

/// One quote per calendar day, drawn from every category.
pub fn quote_of_the_day(date: NaiveDate) -> &'static str {
    let all: Vec<&'static str> = QuoteCategory::ALL
        .iter()
        .flat_map(|category| category.quotes().iter().copied())
        .collect();
    let seed = date.year().unsigned_abs() + date.month() + date.day();
    all[seed as usize % all.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::habit::tests::date;

    fn at(hour: u32) -> NaiveDateTime {
        date(2024, 3, 4).and_hms_opt(hour, 30, 0).unwrap()
    }

    #[test]
    fn time_of_day_wins_over_the_streak() {
        assert_eq!(contextual_category(at(5), 0), QuoteCategory::Morning);
        assert_eq!(contextual_category(at(11), 40), QuoteCategory::Morning);
        assert_eq!(contextual_category(at(18), 40), QuoteCategory::Evening);
        assert_eq!(contextual_category(at(21), 0), QuoteCategory::Evening);
        assert_eq!(contextual_category(at(14), 7), QuoteCategory::Streak);
        assert_eq!(contextual_category(at(14), 6), QuoteCategory::General);
        assert_eq!(contextual_category(at(22), 0), QuoteCategory::General);
        assert_eq!(contextual_category(at(4), 9), QuoteCategory::Streak);
    }

    #[test]
    fn contextual_quotes_come_from_the_chosen_category() {
        let quote = contextual_quote(at(13), 12);
        assert!(STREAK.contains(&quote));
        assert_eq!(quote, contextual_quote(at(15), 12));
        assert!(EVENING.contains(&contextual_quote(at(19), 12)));
    }

    #[test]
    fn quote_of_the_day_is_stable() {
        // 2024 + 1 + 15 = 2040 and 2040 % 33 = 27: the third encouragement.
        let day = date(2024, 1, 15);
        assert_eq!(quote_of_the_day(day), quote_of_the_day(day));
        assert_eq!(quote_of_the_day(day), ENCOURAGEMENT[2]);
    }
}
