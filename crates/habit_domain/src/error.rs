use std::io;

use thiserror::Error;

/// Failures raised by a [`KeyValueStore`](crate::store::KeyValueStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored value for `{key}` is unreadable: {reason}")]
    Corrupt { key: String, reason: String },
}

#[derive(Debug, Error)]
pub enum HabitError {
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("{0}")]
    Validation(String),

    #[error("unknown habit `{0}`")]
    UnknownHabit(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HabitError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type Result<T, E = HabitError> = std::result::Result<T, E>;
