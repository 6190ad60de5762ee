//! Campus record store — reference data and live-chat feedback.
//!
//! Read-mostly lookups over locations, faculty, courses and events,
//! plus append-only feedback records. Backed by SQLite.

pub mod seed;
mod sqlite;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use sqlite::SqliteStore;

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollegeInfo {
    pub name: String,
    pub map_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    pub name: String,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Faculty {
    pub name: String,
    pub department: String,
    pub location: String,
    pub contact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Course {
    pub code: String,
    pub name: String,
    pub department: String,
    pub instructor: String,
    pub description: String,
    pub credits: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub venue: String,
    /// ISO date, `YYYY-MM-DD`.
    pub date: String,
    pub description: String,
}

/// Feedback left by a user after a live chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feedback {
    pub session_id: String,
    #[serde(default)]
    pub rating: Option<i64>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Everything in the store, as context for a generated answer.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PromptSnapshot {
    pub college_info: Option<CollegeInfo>,
    pub locations: Vec<Location>,
    pub faculty: Vec<Faculty>,
    pub events: Vec<Event>,
    pub courses: Vec<Course>,
}

/// Record lookups. Implementations are synchronous; async callers go
/// through [`run_blocking`].
pub trait RecordStore: Send + Sync {
    fn college_info(&self) -> Result<Option<CollegeInfo>, StoreError>;

    /// First location whose name contains `name` (case-insensitive).
    fn find_location(&self, name: &str) -> Result<Option<Location>, StoreError>;

    fn find_faculty(&self, name: &str) -> Result<Option<Faculty>, StoreError>;

    /// First course whose code or name contains `query`.
    fn find_course(&self, query: &str) -> Result<Option<Course>, StoreError>;

    /// Events dated today or later, soonest first.
    fn upcoming_events(&self) -> Result<Vec<Event>, StoreError>;

    fn prompt_snapshot(&self) -> Result<PromptSnapshot, StoreError>;

    fn save_feedback(&self, feedback: &Feedback) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn RecordStore>;

/// Run a store call on the blocking pool.
pub async fn run_blocking<T, F>(store: &SharedStore, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn RecordStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref())).await?
}
