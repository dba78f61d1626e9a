//! SQLite database module for the unlock engine
//!
//! Fast local storage for the course catalog (chapters, lessons,
//! prerequisite edges, quizzes) and the per-learner progress ledger.
//!
//! ## Architecture
//!
//! - Catalog rows are written by course authoring through the catalog
//!   service and read-only to the rest of the engine
//! - `user_progress` rows are created and owned exclusively by the engine,
//!   mutated only through event ingress, never deleted
//! - `enrollments.progress_percentage` is a cache of the pure rollup over
//!   the ledger, not a source of truth
//!
//! ## Tables
//!
//! - `courses` / `chapters` / `lessons` - catalog with order and gating fields
//! - `lesson_prerequisites` - explicit, possibly cross-chapter edges
//! - `quizzes` / `quiz_attempts` - pass/attempt history for the quiz gate
//! - `enrollments` - (learner, course) with cached progress
//! - `user_progress` - (learner, lesson) ledger

pub mod schema;
pub mod courses;
pub mod enrollments;
pub mod progress;
pub mod quizzes;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::EngineError;

/// Wall-clock timestamp in the format stored in TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// SQLite database for the catalog and progress ledger
///
/// All access goes through the connection mutex, which serializes
/// read-modify-write cycles on shared rows (the progress-store boundary).
pub struct CourseDb {
    conn: Mutex<Connection>,
}

impl CourseDb {
    /// Open or create the engine database
    pub fn open(storage_dir: &Path, db_file: &str) -> Result<Self, EngineError> {
        let db_path = storage_dir.join(db_file);
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(&db_path)
            .map_err(|e| EngineError::Internal(format!("Failed to open SQLite: {}", e)))?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| EngineError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, EngineError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| EngineError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), EngineError> {
        let conn = self.conn.lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(())
    }

    /// Run a read operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, EngineError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Connection) -> Result<T, EngineError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, EngineError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<i64, EngineError> {
                conn.query_row(sql, [], |row| row.get(0))
                    .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))
            };

            Ok(DbStats {
                course_count: count("SELECT COUNT(*) FROM courses")? as u64,
                chapter_count: count("SELECT COUNT(*) FROM chapters")? as u64,
                lesson_count: count("SELECT COUNT(*) FROM lessons")? as u64,
                enrollment_count: count("SELECT COUNT(*) FROM enrollments")? as u64,
                progress_count: count("SELECT COUNT(*) FROM user_progress")? as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub course_count: u64,
    pub chapter_count: u64,
    pub lesson_count: u64,
    pub enrollment_count: u64,
    pub progress_count: u64,
}

// Re-exports
pub use courses::{ChapterRow, CourseRow, LessonRow, PrerequisiteRow};
pub use enrollments::EnrollmentRow;
pub use progress::UserProgressRow;
pub use quizzes::{QuizAttemptRow, QuizRow};
