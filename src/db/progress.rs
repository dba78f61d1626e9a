//! UserProgress ledger operations
//!
//! The per-(learner, lesson) ledger is created lazily on first touch and
//! never deleted. Writes merge rather than replace: `time_spent`
//! accumulates, `access_count` increments, `progress_percentage` only
//! rises, and the requirement flags only flip toward satisfied. The one
//! sanctioned exception is [`relock`], which an authoring re-lock sweep
//! uses to clear `is_unlocked` on rows that never completed.
//!
//! Every write bumps `version` so callers holding a stale row can detect
//! a concurrent update.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::current_timestamp;
use crate::error::EngineError;

/// Ledger row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProgressRow {
    pub user_id: String,
    pub lesson_id: String,
    pub is_unlocked: bool,
    pub unlocked_at: Option<String>,
    pub is_completed: bool,
    pub completed_at: Option<String>,
    pub time_spent: i64,
    pub access_count: i64,
    pub progress_percentage: f64,
    pub meets_time_requirement: bool,
    pub meets_percentage_requirement: bool,
    pub meets_quiz_requirement: bool,
    pub first_accessed_at: Option<String>,
    pub last_accessed_at: Option<String>,
    pub version: i64,
}

impl UserProgressRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            lesson_id: row.get("lesson_id")?,
            is_unlocked: row.get("is_unlocked")?,
            unlocked_at: row.get("unlocked_at")?,
            is_completed: row.get("is_completed")?,
            completed_at: row.get("completed_at")?,
            time_spent: row.get("time_spent")?,
            access_count: row.get("access_count")?,
            progress_percentage: row.get("progress_percentage")?,
            meets_time_requirement: row.get("meets_time_requirement")?,
            meets_percentage_requirement: row.get("meets_percentage_requirement")?,
            meets_quiz_requirement: row.get("meets_quiz_requirement")?,
            first_accessed_at: row.get("first_accessed_at")?,
            last_accessed_at: row.get("last_accessed_at")?,
            version: row.get("version")?,
        })
    }

    /// All three completion requirements satisfied
    pub fn meets_all_requirements(&self) -> bool {
        self.meets_time_requirement && self.meets_percentage_requirement && self.meets_quiz_requirement
    }
}

/// Get a ledger row
pub fn get_progress(conn: &Connection, user_id: &str, lesson_id: &str) -> Result<Option<UserProgressRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM user_progress WHERE user_id = ? AND lesson_id = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![user_id, lesson_id])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            UserProgressRow::from_row(row)
                .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Get every ledger row a learner has in one course
pub fn progress_for_course(conn: &Connection, user_id: &str, course_id: &str) -> Result<Vec<UserProgressRow>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT up.* FROM user_progress up
             JOIN lessons l ON l.id = up.lesson_id
             JOIN chapters c ON c.id = l.chapter_id
             WHERE up.user_id = ? AND c.course_id = ?",
        )
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let rows: Vec<UserProgressRow> = stmt
        .query_map(params![user_id, course_id], |row| UserProgressRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

/// Total seconds a learner has spent across a course
pub fn total_time_spent(conn: &Connection, user_id: &str, course_id: &str) -> Result<i64, EngineError> {
    conn.query_row(
        "SELECT COALESCE(SUM(up.time_spent), 0) FROM user_progress up
         JOIN lessons l ON l.id = up.lesson_id
         JOIN chapters c ON c.id = l.chapter_id
         WHERE up.user_id = ? AND c.course_id = ?",
        params![user_id, course_id],
        |row| row.get(0),
    )
    .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))
}

/// Get or create the ledger row for (learner, lesson)
///
/// First touch creates a zeroed row: locked, not completed, no evidence.
pub fn ensure_progress(conn: &Connection, user_id: &str, lesson_id: &str) -> Result<UserProgressRow, EngineError> {
    if let Some(existing) = get_progress(conn, user_id, lesson_id)? {
        return Ok(existing);
    }

    debug!(user = %user_id, lesson = %lesson_id, "Creating progress ledger row");
    conn.execute(
        "INSERT INTO user_progress (user_id, lesson_id) VALUES (?, ?)",
        params![user_id, lesson_id],
    ).map_err(|e| EngineError::Internal(format!("Progress insert failed: {}", e)))?;

    get_progress(conn, user_id, lesson_id)?
        .ok_or_else(|| EngineError::Internal("Progress row not found after insert".to_string()))
}

/// Record a lesson access: accumulate time, bump the access counter, raise
/// the content percentage, stamp first/last access timestamps
pub fn record_access(
    conn: &Connection,
    user_id: &str,
    lesson_id: &str,
    time_delta: i64,
    content_percentage: f64,
) -> Result<UserProgressRow, EngineError> {
    let existing = ensure_progress(conn, user_id, lesson_id)?;
    let now = current_timestamp();

    let new_percentage = existing.progress_percentage.max(content_percentage);
    let first_accessed = existing.first_accessed_at.unwrap_or_else(|| now.clone());

    conn.execute(
        "UPDATE user_progress SET
            time_spent = time_spent + ?,
            access_count = access_count + 1,
            progress_percentage = ?,
            first_accessed_at = ?,
            last_accessed_at = ?,
            version = version + 1
         WHERE user_id = ? AND lesson_id = ?",
        params![time_delta, new_percentage, first_accessed, now, user_id, lesson_id],
    ).map_err(|e| EngineError::Internal(format!("Progress update failed: {}", e)))?;

    get_progress(conn, user_id, lesson_id)?
        .ok_or_else(|| EngineError::Internal("Progress row not found after update".to_string()))
}

/// Mark a lesson unlocked for a learner
///
/// Idempotent; `unlocked_at` is stamped on the first transition only.
pub fn mark_unlocked(conn: &Connection, user_id: &str, lesson_id: &str) -> Result<UserProgressRow, EngineError> {
    let existing = ensure_progress(conn, user_id, lesson_id)?;

    if existing.is_unlocked {
        return Ok(existing);
    }

    conn.execute(
        "UPDATE user_progress SET
            is_unlocked = 1,
            unlocked_at = ?,
            version = version + 1
         WHERE user_id = ? AND lesson_id = ?",
        params![current_timestamp(), user_id, lesson_id],
    ).map_err(|e| EngineError::Internal(format!("Progress update failed: {}", e)))?;

    get_progress(conn, user_id, lesson_id)?
        .ok_or_else(|| EngineError::Internal("Progress row not found after update".to_string()))
}

/// Mark a lesson completed for a learner
///
/// Idempotent. Guarded: fails with `RequirementsNotMet` when any of the
/// three requirement flags is still false. The guard is not a bypass;
/// callers recompute the flags first.
pub fn mark_completed(conn: &Connection, user_id: &str, lesson_id: &str) -> Result<UserProgressRow, EngineError> {
    let existing = ensure_progress(conn, user_id, lesson_id)?;

    if existing.is_completed {
        return Ok(existing);
    }

    if !existing.meets_all_requirements() {
        return Err(EngineError::RequirementsNotMet(format!(
            "lesson {} for user {}: time={} percentage={} quiz={}",
            lesson_id,
            user_id,
            existing.meets_time_requirement,
            existing.meets_percentage_requirement,
            existing.meets_quiz_requirement,
        )));
    }

    let now = current_timestamp();
    conn.execute(
        "UPDATE user_progress SET
            is_completed = 1,
            completed_at = ?,
            last_accessed_at = ?,
            version = version + 1
         WHERE user_id = ? AND lesson_id = ?",
        params![now, now, user_id, lesson_id],
    ).map_err(|e| EngineError::Internal(format!("Progress update failed: {}", e)))?;

    get_progress(conn, user_id, lesson_id)?
        .ok_or_else(|| EngineError::Internal("Progress row not found after update".to_string()))
}

/// Merge requirement flags, forward only
///
/// A flag already satisfied stays satisfied; new evidence can never
/// retract one without an explicit recompute pass.
pub fn set_requirement_flags(
    conn: &Connection,
    user_id: &str,
    lesson_id: &str,
    meets_time: bool,
    meets_percentage: bool,
    meets_quiz: bool,
) -> Result<UserProgressRow, EngineError> {
    let existing = ensure_progress(conn, user_id, lesson_id)?;

    let merged_time = existing.meets_time_requirement || meets_time;
    let merged_percentage = existing.meets_percentage_requirement || meets_percentage;
    let merged_quiz = existing.meets_quiz_requirement || meets_quiz;

    if merged_time == existing.meets_time_requirement
        && merged_percentage == existing.meets_percentage_requirement
        && merged_quiz == existing.meets_quiz_requirement
    {
        return Ok(existing);
    }

    conn.execute(
        "UPDATE user_progress SET
            meets_time_requirement = ?,
            meets_percentage_requirement = ?,
            meets_quiz_requirement = ?,
            version = version + 1
         WHERE user_id = ? AND lesson_id = ?",
        params![merged_time, merged_percentage, merged_quiz, user_id, lesson_id],
    ).map_err(|e| EngineError::Internal(format!("Progress update failed: {}", e)))?;

    get_progress(conn, user_id, lesson_id)?
        .ok_or_else(|| EngineError::Internal("Progress row not found after update".to_string()))
}

/// Clear the unlocked flag after an authoring re-lock
///
/// No-op on completed rows: completion is monotonic and never retracted.
/// Returns true when the row actually flipped back to locked.
pub fn relock(conn: &Connection, user_id: &str, lesson_id: &str) -> Result<bool, EngineError> {
    let changes = conn
        .execute(
            "UPDATE user_progress SET
                is_unlocked = 0,
                unlocked_at = NULL,
                version = version + 1
             WHERE user_id = ? AND lesson_id = ? AND is_unlocked = 1 AND is_completed = 0",
            params![user_id, lesson_id],
        )
        .map_err(|e| EngineError::Internal(format!("Progress update failed: {}", e)))?;

    Ok(changes > 0)
}

/// Completed lesson IDs for a learner in a course
pub fn completed_lesson_ids(conn: &Connection, user_id: &str, course_id: &str) -> Result<Vec<String>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT up.lesson_id FROM user_progress up
             JOIN lessons l ON l.id = up.lesson_id
             JOIN chapters c ON c.id = l.chapter_id
             WHERE up.user_id = ? AND c.course_id = ? AND up.is_completed = 1",
        )
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let ids: Vec<String> = stmt
        .query_map(params![user_id, course_id], |row| row.get(0))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(ids)
}
