//! SQLite-backed [`RecordStore`].

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{
    CollegeInfo, Course, Event, Faculty, Feedback, Location, PromptSnapshot, RecordStore,
    StoreError, seed,
};

/// rusqlite is synchronous; the connection sits behind a mutex and is
/// used from `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure all tables exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        seed::create_schema(&conn)?;
        tracing::info!(path = %path.display(), "record store opened");
        Ok(Self::wrap(conn))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        seed::create_schema(&conn)?;
        Ok(Self::wrap(conn))
    }

    /// Insert the reference data.
    pub fn seed(&self) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        seed::seed(&mut conn)?;
        Ok(())
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn all<T>(
        &self,
        sql: &str,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], map)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn like(fragment: &str) -> String {
    format!("%{fragment}%")
}

fn location_row(row: &Row<'_>) -> rusqlite::Result<Location> {
    Ok(Location {
        name: row.get("name")?,
        details: row.get("details")?,
    })
}

fn faculty_row(row: &Row<'_>) -> rusqlite::Result<Faculty> {
    Ok(Faculty {
        name: row.get("name")?,
        department: row.get("department")?,
        location: row.get("location")?,
        contact: row.get("contact")?,
    })
}

fn course_row(row: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        code: row.get("code")?,
        name: row.get("name")?,
        department: row.get("department")?,
        instructor: row.get("instructor")?,
        description: row.get("description")?,
        credits: row.get("credits")?,
    })
}

fn event_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        name: row.get("name")?,
        venue: row.get("venue")?,
        date: row.get("date")?,
        description: row.get("description")?,
    })
}

impl RecordStore for SqliteStore {
    fn college_info(&self) -> Result<Option<CollegeInfo>, StoreError> {
        let conn = self.lock()?;
        let info = conn
            .query_row(
                "SELECT name, map_url FROM college_info WHERE id = 1",
                [],
                |row| {
                    Ok(CollegeInfo {
                        name: row.get("name")?,
                        map_url: row.get("map_url")?,
                    })
                },
            )
            .optional()?;
        Ok(info)
    }

    fn find_location(&self, name: &str) -> Result<Option<Location>, StoreError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT name, details FROM locations WHERE name LIKE ?1 ORDER BY id LIMIT 1",
                params![like(name)],
                location_row,
            )
            .optional()?;
        Ok(found)
    }

    fn find_faculty(&self, name: &str) -> Result<Option<Faculty>, StoreError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT name, department, location, contact FROM faculty
                 WHERE name LIKE ?1 ORDER BY id LIMIT 1",
                params![like(name)],
                faculty_row,
            )
            .optional()?;
        Ok(found)
    }

    fn find_course(&self, query: &str) -> Result<Option<Course>, StoreError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT code, name, department, instructor, description, credits FROM courses
                 WHERE code LIKE ?1 OR name LIKE ?1 ORDER BY id LIMIT 1",
                params![like(query)],
                course_row,
            )
            .optional()?;
        Ok(found)
    }

    fn upcoming_events(&self) -> Result<Vec<Event>, StoreError> {
        self.all(
            "SELECT name, venue, date, description FROM events
             WHERE date >= date('now') ORDER BY date ASC",
            event_row,
        )
    }

    fn prompt_snapshot(&self) -> Result<PromptSnapshot, StoreError> {
        Ok(PromptSnapshot {
            college_info: self.college_info()?,
            locations: self.all("SELECT name, details FROM locations ORDER BY id", location_row)?,
            faculty: self.all(
                "SELECT name, department, location, contact FROM faculty ORDER BY id",
                faculty_row,
            )?,
            events: self.all(
                "SELECT name, venue, date, description FROM events ORDER BY date",
                event_row,
            )?,
            courses: self.all(
                "SELECT code, name, department, instructor, description, credits FROM courses ORDER BY id",
                course_row,
            )?,
        })
    }

    fn save_feedback(&self, feedback: &Feedback) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO live_chat_feedback (session_id, rating, comment) VALUES (?1, ?2, ?3)",
            params![feedback.session_id, feedback.rating, feedback.comment],
        )?;
        tracing::info!(session_id = %feedback.session_id, "feedback saved");
        Ok(())
    }
}
