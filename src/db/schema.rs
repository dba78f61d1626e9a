//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::EngineError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), EngineError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, EngineError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| EngineError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), EngineError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| EngineError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| EngineError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(CATALOG_SCHEMA)
        .map_err(|e| EngineError::Internal(format!("Failed to create catalog tables: {}", e)))?;

    conn.execute_batch(QUIZ_SCHEMA)
        .map_err(|e| EngineError::Internal(format!("Failed to create quiz tables: {}", e)))?;

    conn.execute_batch(PROGRESS_SCHEMA)
        .map_err(|e| EngineError::Internal(format!("Failed to create progress tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| EngineError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), EngineError> {
    match from_version {
        // 1 -> 2 migration would go here
        _ => {}
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Catalog tables: courses, chapters, lessons, prerequisite edges
const CATALOG_SCHEMA: &str = r#"
-- Courses: authored externally, stored here for course-level policy flags
CREATE TABLE IF NOT EXISTS courses (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,

    -- Course-level access policy
    enforce_sequential_access INTEGER NOT NULL DEFAULT 0,
    allow_lesson_preview INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Chapters: ordered within their course, optional unlock-after pointer
CREATE TABLE IF NOT EXISTS chapters (
    id TEXT PRIMARY KEY NOT NULL,
    course_id TEXT NOT NULL,
    title TEXT NOT NULL,
    chapter_order INTEGER NOT NULL,

    -- When 0, the chapter is always accessible regardless of prerequisites
    is_locked INTEGER NOT NULL DEFAULT 1,
    unlock_after_chapter_id TEXT,

    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),

    UNIQUE (course_id, chapter_order),
    FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
);

-- Lessons: ordered within their chapter, completion thresholds inline
CREATE TABLE IF NOT EXISTS lessons (
    id TEXT PRIMARY KEY NOT NULL,
    chapter_id TEXT NOT NULL,
    title TEXT NOT NULL,
    lesson_order INTEGER NOT NULL,

    is_locked INTEGER NOT NULL DEFAULT 1,
    -- Non-mandatory lessons are excluded from course percentage rollup
    is_mandatory INTEGER NOT NULL DEFAULT 1,
    unlock_after_lesson_id TEXT,

    -- Completion thresholds
    min_completion_percentage REAL NOT NULL DEFAULT 100.0,
    min_time_spent INTEGER NOT NULL DEFAULT 0,
    min_quiz_score REAL,
    requires_quiz_pass INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),

    UNIQUE (chapter_id, lesson_order),
    FOREIGN KEY (chapter_id) REFERENCES chapters(id) ON DELETE CASCADE
);

-- Explicit prerequisite edges, possibly cross-chapter, globally acyclic
-- NOTE: no FK on prerequisite_lesson_id because targets may be archived
-- independently; dangling edges are treated as satisfied at evaluation
CREATE TABLE IF NOT EXISTS lesson_prerequisites (
    lesson_id TEXT NOT NULL,
    prerequisite_lesson_id TEXT NOT NULL,
    prerequisite_type TEXT NOT NULL DEFAULT 'completion',
    required_score REAL,
    required_time INTEGER,
    PRIMARY KEY (lesson_id, prerequisite_lesson_id),
    FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
);
"#;

/// Quiz tables
const QUIZ_SCHEMA: &str = r#"
-- Quizzes bound to lessons for completion gating
CREATE TABLE IF NOT EXISTS quizzes (
    id TEXT PRIMARY KEY NOT NULL,
    lesson_id TEXT,
    title TEXT NOT NULL,

    passing_score REAL NOT NULL DEFAULT 70.0,
    -- NULL means unbounded attempts
    max_attempts INTEGER,
    is_prerequisite_quiz INTEGER NOT NULL DEFAULT 0,
    blocks_lesson_completion INTEGER NOT NULL DEFAULT 0,

    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),

    FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
);

-- Attempt history, append-only
CREATE TABLE IF NOT EXISTS quiz_attempts (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    quiz_id TEXT NOT NULL,
    attempt_number INTEGER NOT NULL,

    score REAL NOT NULL DEFAULT 0,
    percentage_score REAL NOT NULL DEFAULT 0,
    is_passed INTEGER NOT NULL DEFAULT 0,

    started_at TEXT,
    finished_at TEXT,

    UNIQUE (user_id, quiz_id, attempt_number),
    FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
);
"#;

/// Progress tables: enrollments and the per-learner ledger
const PROGRESS_SCHEMA: &str = r#"
-- (learner, course) enrollment with cached rollup
CREATE TABLE IF NOT EXISTS enrollments (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    course_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',

    -- Cache of the pure rollup over user_progress, not a source of truth
    progress_percentage REAL NOT NULL DEFAULT 0,
    current_lesson_id TEXT,
    last_accessed_lesson_id TEXT,

    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),

    UNIQUE (user_id, course_id),
    FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
);

-- (learner, lesson) ledger: created lazily, merged on write, never deleted
CREATE TABLE IF NOT EXISTS user_progress (
    user_id TEXT NOT NULL,
    lesson_id TEXT NOT NULL,

    is_unlocked INTEGER NOT NULL DEFAULT 0,
    unlocked_at TEXT,
    is_completed INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT,

    time_spent INTEGER NOT NULL DEFAULT 0,
    access_count INTEGER NOT NULL DEFAULT 0,
    progress_percentage REAL NOT NULL DEFAULT 0,

    meets_time_requirement INTEGER NOT NULL DEFAULT 0,
    meets_percentage_requirement INTEGER NOT NULL DEFAULT 0,
    meets_quiz_requirement INTEGER NOT NULL DEFAULT 0,

    first_accessed_at TEXT,
    last_accessed_at TEXT,

    -- Bumped on every write for optimistic concurrency at the boundary
    version INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (user_id, lesson_id)
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
-- Catalog indexes
CREATE INDEX IF NOT EXISTS idx_chapters_course ON chapters(course_id, chapter_order);
CREATE INDEX IF NOT EXISTS idx_lessons_chapter ON lessons(chapter_id, lesson_order);
CREATE INDEX IF NOT EXISTS idx_prereq_target ON lesson_prerequisites(prerequisite_lesson_id);

-- Quiz indexes
CREATE INDEX IF NOT EXISTS idx_quizzes_lesson ON quizzes(lesson_id);
CREATE INDEX IF NOT EXISTS idx_attempts_user_quiz ON quiz_attempts(user_id, quiz_id);

-- Progress indexes
CREATE INDEX IF NOT EXISTS idx_enrollments_user ON enrollments(user_id);
CREATE INDEX IF NOT EXISTS idx_enrollments_course ON enrollments(course_id, user_id);
CREATE INDEX IF NOT EXISTS idx_progress_lesson ON user_progress(lesson_id);
"#;
