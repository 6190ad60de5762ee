//! Schema and reference data for the campus record store.

use rusqlite::{Connection, params};

/// Table definitions. Safe to run against an existing database.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS college_info (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    map_url TEXT
);
CREATE TABLE IF NOT EXISTS locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    details TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS faculty (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    department TEXT NOT NULL,
    location TEXT NOT NULL,
    contact TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    venue TEXT NOT NULL,
    date TEXT NOT NULL,
    description TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS courses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    department TEXT NOT NULL,
    instructor TEXT NOT NULL,
    description TEXT NOT NULL,
    credits INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS live_chat_feedback (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    rating INTEGER,
    comment TEXT,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
);
";

const COLLEGE_NAME: &str = "St. John College of Engineering and Management";
// Replace with the "Embed a map" src URL for the campus.
const COLLEGE_MAP_URL: &str = "https://www.google.com/maps/embed?pb=!1m18!1m12!1m3!1d...";

const LOCATIONS: &[(&str, &str)] = &[
    (
        "Engineering Building",
        "Go straight from the first gate, take a left, and enter the main entrance.",
    ),
    (
        "Admin Office",
        "Ground floor, near the main entrance of the Engineering Building.",
    ),
    (
        "Canteen",
        "Enter from the first gate, take a left, go straight, and you will find it.",
    ),
    ("Library", "Block A, near the Main Gate"),
    ("Mechanical Lab", "Block C, Room 204"),
    ("Computer Science Department", "Block B, 3rd Floor"),
];

const FACULTY: &[(&str, &str, &str, &str)] = &[
    ("Dr. Mehta", "Computer Science", "Room 305, Block B", "mehta.cse@sjcem.edu.in"),
    ("Prof. Rao", "Mechanical", "Room 210, Block C", "rao.mech@sjcem.edu.in"),
    ("Dr. Sharma", "Electronics", "Room 215, Block D", "sharma.elec@sjcem.edu.in"),
];

const EVENTS: &[(&str, &str, &str, &str)] = &[
    (
        "Tech Fest 2025",
        "Main Auditorium",
        "2025-11-20",
        "A national-level technical festival with competitions, workshops, and guest lectures.",
    ),
    (
        "Cultural Night",
        "Open Grounds",
        "2025-12-05",
        "An evening filled with performances, music, and food stalls.",
    ),
];

const COURSES: &[(&str, &str, &str, &str, &str, i64)] = &[
    (
        "CS101",
        "Introduction to Programming",
        "Computer Science",
        "Dr. Mehta",
        "A foundational course on Python programming, data structures, and algorithms.",
        4,
    ),
    (
        "ME203",
        "Thermodynamics",
        "Mechanical",
        "Prof. Rao",
        "Study of energy, heat, work, and the laws of thermodynamics.",
        3,
    ),
    (
        "EC305",
        "Digital Circuits",
        "Electronics",
        "Dr. Sharma",
        "Design and analysis of digital electronic circuits.",
        3,
    ),
];

/// Create all tables.
pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

/// Create tables and insert the reference rows. Running it again
/// leaves existing rows alone, except college info which is replaced.
pub fn seed(conn: &mut Connection) -> rusqlite::Result<()> {
    create_schema(conn)?;
    let tx = conn.transaction()?;

    tx.execute(
        "REPLACE INTO college_info (id, name, map_url) VALUES (1, ?1, ?2)",
        params![COLLEGE_NAME, COLLEGE_MAP_URL],
    )?;

    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO locations (name, details) VALUES (?1, ?2)")?;
        for (name, details) in LOCATIONS {
            stmt.execute(params![name, details])?;
        }
    }
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO faculty (name, department, location, contact) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (name, department, location, contact) in FACULTY {
            stmt.execute(params![name, department, location, contact])?;
        }
    }
    {
        // events has no unique key; skip rows that already exist by name
        let mut stmt = tx.prepare(
            "INSERT INTO events (name, venue, date, description)
             SELECT ?1, ?2, ?3, ?4 WHERE NOT EXISTS (SELECT 1 FROM events WHERE name = ?1)",
        )?;
        for (name, venue, date, description) in EVENTS {
            stmt.execute(params![name, venue, date, description])?;
        }
    }
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO courses (code, name, department, instructor, description, credits)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (code, name, department, instructor, description, credits) in COURSES {
            stmt.execute(params![code, name, department, instructor, description, credits])?;
        }
    }

    tx.commit()?;
    tracing::info!(
        locations = LOCATIONS.len(),
        faculty = FACULTY.len(),
        events = EVENTS.len(),
        courses = COURSES.len(),
        "record store seeded"
    );
    Ok(())
}
