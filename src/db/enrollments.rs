//! Enrollment operations
//!
//! `progress_percentage` here is a cache of the rollup over the ledger;
//! the completion aggregator refreshes it on every completion change.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::current_timestamp;
use crate::error::EngineError;

/// Valid enrollment statuses
pub mod enrollment_statuses {
    pub const ACTIVE: &str = "active";
    pub const COMPLETED: &str = "completed";
    pub const CANCELLED: &str = "cancelled";

    pub const ALL: [&str; 3] = [ACTIVE, COMPLETED, CANCELLED];

    pub fn is_valid(status: &str) -> bool {
        ALL.contains(&status)
    }
}

/// Enrollment row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRow {
    pub id: String,
    pub user_id: String,
    pub course_id: String,
    pub status: String,
    pub progress_percentage: f64,
    pub current_lesson_id: Option<String>,
    pub last_accessed_lesson_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl EnrollmentRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            course_id: row.get("course_id")?,
            status: row.get("status")?,
            progress_percentage: row.get("progress_percentage")?,
            current_lesson_id: row.get("current_lesson_id")?,
            last_accessed_lesson_id: row.get("last_accessed_lesson_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Get enrollment for (learner, course)
pub fn get_enrollment(conn: &Connection, user_id: &str, course_id: &str) -> Result<Option<EnrollmentRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM enrollments WHERE user_id = ? AND course_id = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![user_id, course_id])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            EnrollmentRow::from_row(row)
                .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Create an enrollment; returns the existing row when already enrolled
pub fn create_enrollment(conn: &Connection, user_id: &str, course_id: &str) -> Result<EnrollmentRow, EngineError> {
    if let Some(existing) = get_enrollment(conn, user_id, course_id)? {
        return Ok(existing);
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO enrollments (id, user_id, course_id) VALUES (?, ?, ?)",
        params![id, user_id, course_id],
    ).map_err(|e| EngineError::Internal(format!("Enrollment insert failed: {}", e)))?;

    get_enrollment(conn, user_id, course_id)?
        .ok_or_else(|| EngineError::Internal("Enrollment not found after insert".to_string()))
}

/// Refresh the cached progress percentage
pub fn update_cached_progress(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    percentage: f64,
) -> Result<EnrollmentRow, EngineError> {
    let changes = conn
        .execute(
            "UPDATE enrollments SET progress_percentage = ?, updated_at = ?
             WHERE user_id = ? AND course_id = ?",
            params![percentage, current_timestamp(), user_id, course_id],
        )
        .map_err(|e| EngineError::Internal(format!("Enrollment update failed: {}", e)))?;

    if changes == 0 {
        return Err(EngineError::NotFound(format!("enrollment for user {} in course {}", user_id, course_id)));
    }

    get_enrollment(conn, user_id, course_id)?
        .ok_or_else(|| EngineError::Internal("Enrollment not found after update".to_string()))
}

/// Track the learner's position in the course
pub fn set_current_lesson(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    lesson_id: &str,
) -> Result<(), EngineError> {
    conn.execute(
        "UPDATE enrollments SET current_lesson_id = ?, last_accessed_lesson_id = ?, updated_at = ?
         WHERE user_id = ? AND course_id = ?",
        params![lesson_id, lesson_id, current_timestamp(), user_id, course_id],
    ).map_err(|e| EngineError::Internal(format!("Enrollment update failed: {}", e)))?;

    Ok(())
}

/// Set enrollment status
pub fn set_status(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
    status: &str,
) -> Result<EnrollmentRow, EngineError> {
    if !enrollment_statuses::is_valid(status) {
        return Err(EngineError::InvalidInput(format!(
            "Invalid enrollment status: {}. Valid statuses: {:?}",
            status,
            enrollment_statuses::ALL
        )));
    }

    let changes = conn
        .execute(
            "UPDATE enrollments SET status = ?, updated_at = ? WHERE user_id = ? AND course_id = ?",
            params![status, current_timestamp(), user_id, course_id],
        )
        .map_err(|e| EngineError::Internal(format!("Enrollment update failed: {}", e)))?;

    if changes == 0 {
        return Err(EngineError::NotFound(format!("enrollment for user {} in course {}", user_id, course_id)));
    }

    get_enrollment(conn, user_id, course_id)?
        .ok_or_else(|| EngineError::Internal("Enrollment not found after update".to_string()))
}

/// Page through a course's enrollments in user-id order
///
/// Cursor-based so a re-lock sweep can stop between batches and resume
/// from the last user it finished.
pub fn enrollments_for_course_after(
    conn: &Connection,
    course_id: &str,
    after_user_id: Option<&str>,
    limit: usize,
) -> Result<Vec<EnrollmentRow>, EngineError> {
    let cursor = after_user_id.unwrap_or("");
    let mut stmt = conn
        .prepare(
            "SELECT * FROM enrollments
             WHERE course_id = ? AND user_id > ?
             ORDER BY user_id
             LIMIT ?",
        )
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let rows: Vec<EnrollmentRow> = stmt
        .query_map(params![course_id, cursor, limit as i64], |row| EnrollmentRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CourseDb;

    #[test]
    fn create_is_idempotent() {
        let db = CourseDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute("INSERT INTO courses (id, title) VALUES ('c1', 'Course')", [])
                .unwrap();
            let first = create_enrollment(conn, "u1", "c1")?;
            let second = create_enrollment(conn, "u1", "c1")?;
            assert_eq!(first.id, second.id);
            assert_eq!(first.status, enrollment_statuses::ACTIVE);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn cursor_paging_walks_users_in_order() {
        let db = CourseDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute("INSERT INTO courses (id, title) VALUES ('c1', 'Course')", [])
                .unwrap();
            for user in ["u3", "u1", "u2"] {
                create_enrollment(conn, user, "c1")?;
            }

            let first = enrollments_for_course_after(conn, "c1", None, 2)?;
            assert_eq!(first.len(), 2);
            assert_eq!(first[0].user_id, "u1");
            assert_eq!(first[1].user_id, "u2");

            let rest = enrollments_for_course_after(conn, "c1", Some("u2"), 2)?;
            assert_eq!(rest.len(), 1);
            assert_eq!(rest[0].user_id, "u3");
            Ok(())
        })
        .unwrap();
    }
}
