//! Quiz and quiz-attempt operations

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Quiz row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizRow {
    pub id: String,
    pub lesson_id: Option<String>,
    pub title: String,
    pub passing_score: f64,
    pub max_attempts: Option<u32>,
    pub is_prerequisite_quiz: bool,
    pub blocks_lesson_completion: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl QuizRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            lesson_id: row.get("lesson_id")?,
            title: row.get("title")?,
            passing_score: row.get("passing_score")?,
            max_attempts: row.get("max_attempts")?,
            is_prerequisite_quiz: row.get("is_prerequisite_quiz")?,
            blocks_lesson_completion: row.get("blocks_lesson_completion")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Attempt row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttemptRow {
    pub id: String,
    pub user_id: String,
    pub quiz_id: String,
    pub attempt_number: u32,
    pub score: f64,
    pub percentage_score: f64,
    pub is_passed: bool,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl QuizAttemptRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            quiz_id: row.get("quiz_id")?,
            attempt_number: row.get("attempt_number")?,
            score: row.get("score")?,
            percentage_score: row.get("percentage_score")?,
            is_passed: row.get("is_passed")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Input for creating a quiz
#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuizInput {
    pub id: String,
    #[serde(default)]
    pub lesson_id: Option<String>,
    pub title: String,
    #[serde(default = "default_passing_score")]
    pub passing_score: f64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub is_prerequisite_quiz: bool,
    #[serde(default)]
    pub blocks_lesson_completion: bool,
}

fn default_passing_score() -> f64 { 70.0 }

/// Input for recording an attempt
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAttemptInput {
    #[serde(default)]
    pub id: Option<String>,
    pub score: f64,
    pub percentage_score: f64,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

/// Get quiz by ID
pub fn get_quiz(conn: &Connection, id: &str) -> Result<Option<QuizRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM quizzes WHERE id = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![id])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            QuizRow::from_row(row)
                .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Get all quizzes bound to a lesson
pub fn quizzes_for_lesson(conn: &Connection, lesson_id: &str) -> Result<Vec<QuizRow>, EngineError> {
    let mut stmt = conn
        .prepare("SELECT * FROM quizzes WHERE lesson_id = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let quizzes: Vec<QuizRow> = stmt
        .query_map(params![lesson_id], |row| QuizRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(quizzes)
}

/// Create a quiz
pub fn create_quiz(conn: &Connection, input: &CreateQuizInput) -> Result<QuizRow, EngineError> {
    conn.execute(
        "INSERT INTO quizzes (
            id, lesson_id, title, passing_score, max_attempts,
            is_prerequisite_quiz, blocks_lesson_completion
         ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            input.id,
            input.lesson_id,
            input.title,
            input.passing_score,
            input.max_attempts,
            input.is_prerequisite_quiz,
            input.blocks_lesson_completion,
        ],
    ).map_err(|e| EngineError::Internal(format!("Quiz insert failed: {}", e)))?;

    get_quiz(conn, &input.id)?
        .ok_or_else(|| EngineError::Internal("Quiz not found after insert".to_string()))
}

/// Number of attempts a learner has used on a quiz
pub fn attempt_count(conn: &Connection, user_id: &str, quiz_id: &str) -> Result<u32, EngineError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM quiz_attempts WHERE user_id = ? AND quiz_id = ?",
            params![user_id, quiz_id],
            |row| row.get(0),
        )
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    Ok(count as u32)
}

/// Best attempt for (learner, quiz): highest percentage score, ties broken
/// by the latest attempt number
pub fn best_attempt(conn: &Connection, user_id: &str, quiz_id: &str) -> Result<Option<QuizAttemptRow>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM quiz_attempts
             WHERE user_id = ? AND quiz_id = ?
             ORDER BY percentage_score DESC, attempt_number DESC
             LIMIT 1",
        )
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let mut rows = stmt
        .query(params![user_id, quiz_id])
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?;

    match rows.next().map_err(|e| EngineError::Internal(format!("Row fetch failed: {}", e)))? {
        Some(row) => Ok(Some(
            QuizAttemptRow::from_row(row)
                .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?,
        )),
        None => Ok(None),
    }
}

/// Best quiz percentage per lesson for a learner across one course
///
/// Feeds score-kind prerequisite edges without per-lesson point queries.
pub fn best_scores_for_course(
    conn: &Connection,
    user_id: &str,
    course_id: &str,
) -> Result<std::collections::HashMap<String, f64>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT q.lesson_id, MAX(qa.percentage_score)
             FROM quiz_attempts qa
             JOIN quizzes q ON q.id = qa.quiz_id
             JOIN lessons l ON l.id = q.lesson_id
             JOIN chapters c ON c.id = l.chapter_id
             WHERE qa.user_id = ? AND c.course_id = ?
             GROUP BY q.lesson_id",
        )
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    let pairs: Vec<(String, f64)> = stmt
        .query_map(params![user_id, course_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| EngineError::Internal(format!("Query failed: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::Internal(format!("Row parse failed: {}", e)))?;

    Ok(pairs.into_iter().collect())
}

/// Record a new attempt
///
/// The attempt number is derived from the history; the pass flag is
/// computed against the quiz's passing score. The attempt-limit guard
/// lives in the quiz gate, not here.
pub fn create_attempt(
    conn: &Connection,
    user_id: &str,
    quiz: &QuizRow,
    input: &CreateAttemptInput,
) -> Result<QuizAttemptRow, EngineError> {
    let attempt_number = attempt_count(conn, user_id, &quiz.id)? + 1;
    let id = input.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    let is_passed = input.percentage_score >= quiz.passing_score;

    conn.execute(
        "INSERT INTO quiz_attempts (
            id, user_id, quiz_id, attempt_number, score, percentage_score,
            is_passed, started_at, finished_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            user_id,
            quiz.id,
            attempt_number,
            input.score,
            input.percentage_score,
            is_passed,
            input.started_at,
            input.finished_at,
        ],
    ).map_err(|e| EngineError::Internal(format!("Attempt insert failed: {}", e)))?;

    let mut stmt = conn
        .prepare("SELECT * FROM quiz_attempts WHERE id = ?")
        .map_err(|e| EngineError::Internal(format!("Prepare failed: {}", e)))?;

    stmt.query_row(params![id], |row| QuizAttemptRow::from_row(row))
        .map_err(|e| EngineError::Internal(format!("Attempt not found after insert: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CourseDb;

    fn seed_quiz(conn: &Connection) -> QuizRow {
        conn.execute_batch(
            "INSERT INTO courses (id, title) VALUES ('c1', 'Course');
             INSERT INTO chapters (id, course_id, title, chapter_order) VALUES ('ch1', 'c1', 'Chapter', 1);
             INSERT INTO lessons (id, chapter_id, title, lesson_order) VALUES ('l1', 'ch1', 'Lesson', 1);",
        )
        .unwrap();
        create_quiz(conn, &CreateQuizInput {
            id: "q1".into(),
            lesson_id: Some("l1".into()),
            title: "Quiz".into(),
            passing_score: 70.0,
            max_attempts: Some(2),
            is_prerequisite_quiz: false,
            blocks_lesson_completion: false,
        })
        .unwrap()
    }

    #[test]
    fn attempt_numbers_increment() {
        let db = CourseDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let quiz = seed_quiz(conn);
            let a1 = create_attempt(conn, "u1", &quiz, &CreateAttemptInput {
                id: None, score: 5.0, percentage_score: 50.0, started_at: None, finished_at: None,
            })?;
            let a2 = create_attempt(conn, "u1", &quiz, &CreateAttemptInput {
                id: None, score: 8.0, percentage_score: 80.0, started_at: None, finished_at: None,
            })?;
            assert_eq!(a1.attempt_number, 1);
            assert_eq!(a2.attempt_number, 2);
            assert!(!a1.is_passed);
            assert!(a2.is_passed);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn best_attempt_prefers_score_then_recency() {
        let db = CourseDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let quiz = seed_quiz(conn);
            for pct in [60.0, 80.0] {
                create_attempt(conn, "u1", &quiz, &CreateAttemptInput {
                    id: None, score: pct / 10.0, percentage_score: pct, started_at: None, finished_at: None,
                })?;
            }
            let best = best_attempt(conn, "u1", "q1")?.unwrap();
            assert_eq!(best.percentage_score, 80.0);
            assert_eq!(best.attempt_number, 2);

            // Equal score: the later attempt wins
            create_attempt(conn, "u1", &quiz, &CreateAttemptInput {
                id: None, score: 8.0, percentage_score: 80.0, started_at: None, finished_at: None,
            })?;
            let best = best_attempt(conn, "u1", "q1")?.unwrap();
            assert_eq!(best.attempt_number, 3);
            Ok(())
        })
        .unwrap();
    }
}
