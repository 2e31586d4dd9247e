//! SQLite-backed student record store.

use rollcall_core::store::{RecordStore, StoreError};
use rollcall_core::types::StudentRecord;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    id                   TEXT PRIMARY KEY,
    name                 TEXT NOT NULL,
    major                TEXT NOT NULL,
    starting_year        INTEGER NOT NULL,
    total_attendance     INTEGER NOT NULL DEFAULT 0,
    standing             TEXT NOT NULL,
    year                 INTEGER NOT NULL,
    last_attendance_time TEXT
);
";

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Student records in a single `students` table. The connection is behind
/// a mutex; the frame loop treats every call as blocking anyway.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<StudentRecord> {
    Ok(StudentRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        major: row.get(2)?,
        starting_year: row.get(3)?,
        total_attendance: row.get(4)?,
        standing: row.get(5)?,
        year: row.get(6)?,
        last_attendance_time: row.get(7)?,
    })
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, id: &str) -> Result<Option<StudentRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, major, starting_year, total_attendance, standing, year, \
             last_attendance_time FROM students WHERE id = ?1",
            params![id],
            row_to_record,
        )
        .optional()
        .map_err(backend)
    }

    fn set(&self, record: &StudentRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO students (id, name, major, starting_year, total_attendance, standing, \
             year, last_attendance_time) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT(id) DO UPDATE SET name = ?2, major = ?3, starting_year = ?4, \
             total_attendance = ?5, standing = ?6, year = ?7, last_attendance_time = ?8",
            params![
                record.id,
                record.name,
                record.major,
                record.starting_year,
                record.total_attendance,
                record.standing,
                record.year,
                record.last_attendance_time,
            ],
        )
        .map_err(backend)?;
        Ok(())
    }

    fn update_attendance(
        &self,
        id: &str,
        total_attendance: u32,
        last_attendance_time: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE students SET total_attendance = ?2, last_attendance_time = ?3 \
                 WHERE id = ?1",
                params![id, total_attendance, last_attendance_time],
            )
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM students WHERE id = ?1", params![id])
            .map_err(backend)?;
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id FROM students ORDER BY id")
            .map_err(backend)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        Ok(ids)
    }
}
