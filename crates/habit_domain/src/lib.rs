pub mod error;
pub mod habit;
pub mod milestones;
pub mod notifications;
pub mod quotes;
pub mod service;
pub mod state;
pub mod store;
pub mod tracking;
pub mod transfer;

pub use crate::error::{HabitError, StoreError};
pub use crate::service::{HabitService, HabitServiceBuilder};
