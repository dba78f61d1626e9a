//! Catalog CRUD operations: courses, chapters, lessons, prerequisite edges
//!
//! Authoring writes land here through the catalog service; everything else
//! in the engine reads these rows through [`crate::graph::CourseGraph`].

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::db::current_timestamp;
use crate::error::EngineError;

/// Valid prerequisite edge kinds
pub mod prerequisite_types {
    pub const COMPLETION: &str = "completion";
    pub const SCORE: &str = "score";
    pub const TIME: &str = "time";

    pub const ALL: [&str; 3] = [COMPLETION, SCORE, TIME];

    pub fn is_valid(kind: &str) -> bool {
        ALL.contains(&kind)
    }
}

/// Course row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseRow {
    pub id: String,
    pub title: String,
    pub enforce_sequential_access: bool,
    pub allow_lesson_preview: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl CourseRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            enforce_sequential_access: row.get("enforce_sequential_access")?,
            allow_lesson_preview: row.get("allow_lesson_preview")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Chapter row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterRow {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub chapter_order: i32,
    pub is_locked: bool,
    pub unlock_after_chapter_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ChapterRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            course_id: row.get("course_id")?,
            title: row.get("title")?,
            chapter_order: row.get("chapter_order")?,
            is_locked: row.get("is_locked")?,
            unlock_after_chapter_id: row.get("unlock_after_chapter_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Lesson row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonRow {
    pub id: String,
    pub chapter_id: String,
    pub title: String,
    pub lesson_order: i32,
    pub is_locked: bool,
    pub is_mandatory: bool,
    pub unlock_after_lesson_id: Option<String>,
    pub min_completion_percentage: f64,
    pub min_time_spent: i64,
    pub min_quiz_score: Option<f64>,
    pub requires_quiz_pass: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl LessonRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            chapter_id: row.get("chapter_id")?,
            title: row.get("title")?,
            lesson_order: row.get("lesson_order")?,
            is_locked: row.get("is_locked")?,
            is_mandatory: row.get("is_mandatory")?,
            unlock_after_lesson_id: row.get("unlock_after_lesson_id")?,
            min_completion_percentage: row.get("min_completion_percentage")?,
            min_time_spent: row.get("min_time_spent")?,
            min_quiz_score: row.get("min_quiz_score")?,
            requires_quiz_pass: row.get("requires_quiz_pass")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Explicit prerequisite edge from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrerequisiteRow {
    pub lesson_id: String,
    pub prerequisite_lesson_id: String,
    pub prerequisite_type: String,
    pub required_score: Option<f64>,
    pub required_time: Option<i64>,
}

impl PrerequisiteRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            lesson_id: row.get("lesson_id")?,
            prerequisite_lesson_id: row.get("prerequisite_lesson_id")?,
            prerequisite_type: row.get("prerequisite_type")?,
            required_score: row.get("required_score")?,
            required_time: row.get("required_time")?,
        })
    }
}

/// Input for creating a course
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCourseInput {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub enforce_sequential_access: bool,
    #[serde(default)]
    pub allow_lesson_preview: bool,
}

/// Input for creating a chapter
#[derive(Debug, Clone, Deserialize)]
pub struct CreateChapterInput {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub chapter_order: i32,
    #[serde(default = "default_locked")]
    pub is_locked: bool,
    #[serde(default)]
    pub unlock_after_chapter_id: Option<String>,
}

/// Input for creating a lesson
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLessonInput {
    pub id: String,
    pub chapter_id: String,
    pub title: String,
    pub lesson_order: i32,
    #[serde(default = "default_locked")]
    pub is_locked: bool,
    #[serde(default = "default_mandatory")]
    pub is_mandatory: bool,
    #[serde(default)]
    pub unlock_after_lesson_id: Option<String>,
    #[serde(default = "default_min_completion")]
    pub min_completion_percentage: f64,
    #[serde(default)]
    pub min_time_spent: i64,
    #[serde(default)]
    pub min_quiz_score: Option<f64>,
    #[serde(default)]
    pub requires_quiz_pass: bool,
}

fn default_locked() -> bool { true }
fn default_mandatory() -> bool { true }
fn default_min_completion() -> f64 { 100.0 }

/// Input for creating a prerequisite edge
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePrerequisiteInput {
    pub lesson_id: String,
    pub prerequisite_lesson_id: String,
    #[serde(default = "default_prerequisite_type")]
    pub prerequisite_type: String,
    #[serde(default)]
    pub required_score: Option<f64>,
    #[serde(default)]
    pub required_time: Option<i64>,
}

fn default_prerequisite_type() -> String { prerequisite_types::COMPLETION.to_string() }

/// Get course by ID
pub fn get_course(conn: &Connection, id: &str) -> Result<Option<CourseRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM courses WHERE id = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            CourseRow::from_row(row)
                .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Get chapter by ID
pub fn get_chapter(conn: &Connection, id: &str) -> Result<Option<ChapterRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM chapters WHERE id = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            ChapterRow::from_row(row)
                .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Get lesson by ID
pub fn get_lesson(conn: &Connection, id: &str) -> Result<Option<LessonRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM lessons WHERE id = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            LessonRow::from_row(row)
                .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Get all chapters for a course, ordered
pub fn chapters_for_course(conn: &Connection, course_id: &str) -> Result<Vec<ChapterRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM chapters WHERE course_id = ? ORDER BY chapter_order")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let chapters: Vec<ChapterRow> = stmt
        .query_map(params![course_id], |row| ChapterRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(chapters)
}

/// Get all lessons for a chapter, ordered
pub fn lessons_for_chapter(conn: &Connection, chapter_id: &str) -> Result<Vec<LessonRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM lessons WHERE chapter_id = ? ORDER BY lesson_order")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let lessons: Vec<LessonRow> = stmt
        .query_map(params![chapter_id], |row| LessonRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(lessons)
}

/// Get all lessons for a course (chapter order, then lesson order)
pub fn lessons_for_course(conn: &Connection, course_id: &str) -> Result<Vec<LessonRow>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT l.* FROM lessons l
             JOIN chapters c ON c.id = l.chapter_id
             WHERE c.course_id = ?
             ORDER BY c.chapter_order, l.lesson_order",
        )
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let lessons: Vec<LessonRow> = stmt
        .query_map(params![course_id], |row| LessonRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(lessons)
}

/// Get the course a lesson belongs to
pub fn course_id_for_lesson(conn: &Connection, lesson_id: &str) -> Result<Option<String>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT c.course_id FROM lessons l
             JOIN chapters c ON c.id = l.chapter_id
             WHERE l.id = ?",
        )
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![lesson_id])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            row.get(0)
                .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Get explicit prerequisite edges for every lesson in a course
pub fn prerequisites_for_course(conn: &Connection, course_id: &str) -> Result<Vec<PrerequisiteRow>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT p.* FROM lesson_prerequisites p
             JOIN lessons l ON l.id = p.lesson_id
             JOIN chapters c ON c.id = l.chapter_id
             WHERE c.course_id = ?",
        )
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let edges: Vec<PrerequisiteRow> = stmt
        .query_map(params![course_id], |row| PrerequisiteRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(edges)
}

/// Get explicit prerequisite edges for one lesson
pub fn prerequisites_for_lesson(conn: &Connection, lesson_id: &str) -> Result<Vec<PrerequisiteRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM lesson_prerequisites WHERE lesson_id = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let edges: Vec<PrerequisiteRow> = stmt
        .query_map(params![lesson_id], |row| PrerequisiteRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(edges)
}

/// Create a course
pub fn create_course(conn: &Connection, input: &CreateCourseInput) -> Result<CourseRow, EngineError> {
    conn.execute(
        "INSERT INTO courses (id, title, enforce_sequential_access, allow_lesson_preview)
         VALUES (?, ?, ?, ?)",
        params![
            input.id,
            input.title,
            input.enforce_sequential_access,
            input.allow_lesson_preview,
        ],
    ).map_err(|e| EngineError::Internal(format!("Course insert failed: {}", e)))?;

    get_course(conn, &input.id)?
        .ok_or_else(|| EngineError::Internal("Course not found after insert".to_string()))
}

/// Create a chapter
pub fn create_chapter(conn: &Connection, input: &CreateChapterInput) -> Result<ChapterRow, EngineError> {
    conn.execute(
        "INSERT INTO chapters (id, course_id, title, chapter_order, is_locked, unlock_after_chapter_id)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            input.id,
            input.course_id,
            input.title,
            input.chapter_order,
            input.is_locked,
            input.unlock_after_chapter_id,
        ],
    ).map_err(|e| EngineError::Internal(format!("Chapter insert failed: {}", e)))?;

    get_chapter(conn, &input.id)?
        .ok_or_else(|| EngineError::Internal("Chapter not found after insert".to_string()))
}

/// Create a lesson
pub fn create_lesson(conn: &Connection, input: &CreateLessonInput) -> Result<LessonRow, EngineError> {
    conn.execute(
        "INSERT INTO lessons (
            id, chapter_id, title, lesson_order, is_locked, is_mandatory,
            unlock_after_lesson_id, min_completion_percentage, min_time_spent,
            min_quiz_score, requires_quiz_pass
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            input.id,
            input.chapter_id,
            input.title,
            input.lesson_order,
            input.is_locked,
            input.is_mandatory,
            input.unlock_after_lesson_id,
            input.min_completion_percentage,
            input.min_time_spent,
            input.min_quiz_score,
            input.requires_quiz_pass,
        ],
    ).map_err(|e| EngineError::Internal(format!("Lesson insert failed: {}", e)))?;

    get_lesson(conn, &input.id)?
        .ok_or_else(|| EngineError::Internal("Lesson not found after insert".to_string()))
}

/// Create an explicit prerequisite edge
pub fn create_prerequisite(conn: &Connection, input: &CreatePrerequisiteInput) -> Result<PrerequisiteRow, EngineError> {
    conn.execute(
        "INSERT INTO lesson_prerequisites (
            lesson_id, prerequisite_lesson_id, prerequisite_type, required_score, required_time
         ) VALUES (?, ?, ?, ?, ?)",
        params![
            input.lesson_id,
            input.prerequisite_lesson_id,
            input.prerequisite_type,
            input.required_score,
            input.required_time,
        ],
    ).map_err(|e| EngineError::Internal(format!("Prerequisite insert failed: {}", e)))?;

    Ok(PrerequisiteRow {
        lesson_id: input.lesson_id.clone(),
        prerequisite_lesson_id: input.prerequisite_lesson_id.clone(),
        prerequisite_type: input.prerequisite_type.clone(),
        required_score: input.required_score,
        required_time: input.required_time,
    })
}

/// Remove an explicit prerequisite edge
pub fn delete_prerequisite(conn: &Connection, lesson_id: &str, prerequisite_lesson_id: &str) -> Result<bool, EngineError> {
    let changes = conn
        .execute(
            "DELETE FROM lesson_prerequisites WHERE lesson_id = ? AND prerequisite_lesson_id = ?",
            params![lesson_id, prerequisite_lesson_id],
        )
        .map_err(|e| EngineError::Internal(format!("Prerequisite delete failed: {}", e)))?;

    Ok(changes > 0)
}

/// Toggle the lock flag on a lesson
pub fn set_lesson_locked(conn: &Connection, lesson_id: &str, locked: bool) -> Result<LessonRow, EngineError> {
    let changes = conn
        .execute(
            "UPDATE lessons SET is_locked = ?, updated_at = ? WHERE id = ?",
            params![locked, current_timestamp(), lesson_id],
        )
        .map_err(|e| EngineError::Internal(format!("Lesson update failed: {}", e)))?;

    if changes == 0 {
        return Err(EngineError::NotFound(format!("lesson {}", lesson_id)));
    }

    get_lesson(conn, lesson_id)?
        .ok_or_else(|| EngineError::Internal("Lesson not found after update".to_string()))
}

/// Toggle the lock flag on a chapter
pub fn set_chapter_locked(conn: &Connection, chapter_id: &str, locked: bool) -> Result<ChapterRow, EngineError> {
    let changes = conn
        .execute(
            "UPDATE chapters SET is_locked = ?, updated_at = ? WHERE id = ?",
            params![locked, current_timestamp(), chapter_id],
        )
        .map_err(|e| EngineError::Internal(format!("Chapter update failed: {}", e)))?;

    if changes == 0 {
        return Err(EngineError::NotFound(format!("chapter {}", chapter_id)));
    }

    get_chapter(conn, chapter_id)?
        .ok_or_else(|| EngineError::Internal("Chapter not found after update".to_string()))
}

/// Update a lesson's gating fields (unlock pointer and thresholds)
pub fn update_lesson_gates(
    conn: &Connection,
    lesson_id: &str,
    unlock_after_lesson_id: Option<&str>,
    min_completion_percentage: f64,
    min_time_spent: i64,
    min_quiz_score: Option<f64>,
    requires_quiz_pass: bool,
) -> Result<LessonRow, EngineError> {
    let changes = conn
        .execute(
            "UPDATE lessons SET
                unlock_after_lesson_id = ?,
                min_completion_percentage = ?,
                min_time_spent = ?,
                min_quiz_score = ?,
                requires_quiz_pass = ?,
                updated_at = ?
             WHERE id = ?",
            params![
                unlock_after_lesson_id,
                min_completion_percentage,
                min_time_spent,
                min_quiz_score,
                requires_quiz_pass,
                current_timestamp(),
                lesson_id,
            ],
        )
        .map_err(|e| EngineError::Internal(format!("Lesson update failed: {}", e)))?;

    if changes == 0 {
        return Err(EngineError::NotFound(format!("lesson {}", lesson_id)));
    }

    get_lesson(conn, lesson_id)?
        .ok_or_else(|| EngineError::Internal("Lesson not found after update".to_string()))
}
