//! Catalog service - validated authoring writes
//!
//! Course authoring persists its edits through this service. Every edit
//! that touches an order field, an unlock pointer or a prerequisite edge
//! revalidates the whole course graph inside the same transaction;
//! `CycleDetected`/`InvalidOrdering` roll the edit back entirely, so a
//! graph violation never partially applies.

use std::sync::Arc;

use crate::db::courses::{
    self, prerequisite_types, ChapterRow, CourseRow, CreateChapterInput, CreateCourseInput,
    CreateLessonInput, CreatePrerequisiteInput, LessonRow,
};
use crate::db::quizzes::{self, CreateQuizInput, QuizRow};
use crate::db::CourseDb;
use crate::error::EngineError;
use crate::graph::CourseGraph;
use crate::services::events::{EngineEvent, EventBus};

/// Result of toggling a lock flag
#[derive(Debug, Clone)]
pub struct LockChange {
    /// True when content was re-locked and a sweep over enrolled
    /// learners is needed to resync their unlock flags
    pub sweep_required: bool,
}

/// Catalog service for authoring writes
pub struct CatalogService {
    db: Arc<CourseDb>,
    events: Arc<EventBus>,
}

impl CatalogService {
    pub fn new(db: Arc<CourseDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a course
    pub fn create_course(&self, input: CreateCourseInput) -> Result<CourseRow, EngineError> {
        self.validate_id(&input.id, "course id")?;
        self.validate_title(&input.title)?;

        self.db.with_conn(|conn| courses::create_course(conn, &input))
    }

    /// Create a chapter; the course graph is revalidated before commit
    pub fn create_chapter(&self, input: CreateChapterInput) -> Result<ChapterRow, EngineError> {
        self.validate_id(&input.id, "chapter id")?;
        self.validate_title(&input.title)?;

        let course_id = input.course_id.clone();
        let row = self.db.with_conn_mut(|conn| {
            courses::get_course(conn, &course_id)?
                .ok_or_else(|| EngineError::NotFound(format!("course {}", course_id)))?;

            let tx = conn.transaction()
                .map_err(|e| EngineError::Internal(format!("Transaction failed: {}", e)))?;

            let row = courses::create_chapter(&tx, &input)?;
            CourseGraph::load(&tx, &course_id)?.validate()?;

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("Commit failed: {}", e)))?;
            Ok(row)
        })?;

        self.emit_changed(&course_id);
        Ok(row)
    }

    /// Create a lesson; the course graph is revalidated before commit
    pub fn create_lesson(&self, input: CreateLessonInput) -> Result<LessonRow, EngineError> {
        self.validate_id(&input.id, "lesson id")?;
        self.validate_title(&input.title)?;
        self.validate_thresholds(
            input.min_completion_percentage,
            input.min_time_spent,
            input.min_quiz_score,
        )?;

        let chapter_id = input.chapter_id.clone();
        let (row, course_id) = self.db.with_conn_mut(|conn| {
            let chapter = courses::get_chapter(conn, &chapter_id)?
                .ok_or_else(|| EngineError::NotFound(format!("chapter {}", chapter_id)))?;

            let tx = conn.transaction()
                .map_err(|e| EngineError::Internal(format!("Transaction failed: {}", e)))?;

            let row = courses::create_lesson(&tx, &input)?;
            CourseGraph::load(&tx, &chapter.course_id)?.validate()?;

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("Commit failed: {}", e)))?;
            Ok((row, chapter.course_id))
        })?;

        self.emit_changed(&course_id);
        Ok(row)
    }

    /// Add an explicit prerequisite edge; rejected when it would close a
    /// cycle anywhere in the course
    pub fn add_prerequisite(&self, input: CreatePrerequisiteInput) -> Result<(), EngineError> {
        if !prerequisite_types::is_valid(&input.prerequisite_type) {
            return Err(EngineError::InvalidInput(format!(
                "prerequisite_type '{}' is not valid. Valid types: {:?}",
                input.prerequisite_type,
                prerequisite_types::ALL
            )));
        }
        if input.lesson_id == input.prerequisite_lesson_id {
            return Err(EngineError::CycleDetected(format!(
                "lesson {} cannot be its own prerequisite",
                input.lesson_id
            )));
        }
        if let Some(score) = input.required_score {
            if !(0.0..=100.0).contains(&score) {
                return Err(EngineError::InvalidInput(format!(
                    "required_score must be within 0-100, got {}",
                    score
                )));
            }
        }
        if let Some(time) = input.required_time {
            if time < 0 {
                return Err(EngineError::InvalidInput("required_time must be non-negative".into()));
            }
        }

        let lesson_id = input.lesson_id.clone();
        let course_id = self.db.with_conn_mut(|conn| {
            let course_id = courses::course_id_for_lesson(conn, &lesson_id)?
                .ok_or_else(|| EngineError::NotFound(format!("lesson {}", lesson_id)))?;

            let tx = conn.transaction()
                .map_err(|e| EngineError::Internal(format!("Transaction failed: {}", e)))?;

            courses::create_prerequisite(&tx, &input)?;
            CourseGraph::load(&tx, &course_id)?.validate()?;

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("Commit failed: {}", e)))?;
            Ok(course_id)
        })?;

        self.emit_changed(&course_id);
        Ok(())
    }

    /// Remove an explicit prerequisite edge
    pub fn remove_prerequisite(&self, lesson_id: &str, prerequisite_lesson_id: &str) -> Result<bool, EngineError> {
        self.db.with_conn(|conn| {
            courses::delete_prerequisite(conn, lesson_id, prerequisite_lesson_id)
        })
    }

    /// Create a quiz bound to a lesson
    pub fn create_quiz(&self, input: CreateQuizInput) -> Result<QuizRow, EngineError> {
        self.validate_id(&input.id, "quiz id")?;
        self.validate_title(&input.title)?;
        if !(0.0..=100.0).contains(&input.passing_score) {
            return Err(EngineError::InvalidInput(format!(
                "passing_score must be within 0-100, got {}",
                input.passing_score
            )));
        }
        if input.max_attempts == Some(0) {
            return Err(EngineError::InvalidInput("max_attempts must be at least 1".into()));
        }

        self.db.with_conn(|conn| {
            if let Some(lesson_id) = &input.lesson_id {
                courses::get_lesson(conn, lesson_id)?
                    .ok_or_else(|| EngineError::NotFound(format!("lesson {}", lesson_id)))?;
            }
            quizzes::create_quiz(conn, &input)
        })
    }

    // =========================================================================
    // Edits
    // =========================================================================

    /// Update a lesson's unlock pointer and completion thresholds
    pub fn update_lesson_gates(
        &self,
        lesson_id: &str,
        unlock_after_lesson_id: Option<&str>,
        min_completion_percentage: f64,
        min_time_spent: i64,
        min_quiz_score: Option<f64>,
        requires_quiz_pass: bool,
    ) -> Result<LessonRow, EngineError> {
        self.validate_thresholds(min_completion_percentage, min_time_spent, min_quiz_score)?;

        let (row, course_id) = self.db.with_conn_mut(|conn| {
            let course_id = courses::course_id_for_lesson(conn, lesson_id)?
                .ok_or_else(|| EngineError::NotFound(format!("lesson {}", lesson_id)))?;

            let tx = conn.transaction()
                .map_err(|e| EngineError::Internal(format!("Transaction failed: {}", e)))?;

            let row = courses::update_lesson_gates(
                &tx,
                lesson_id,
                unlock_after_lesson_id,
                min_completion_percentage,
                min_time_spent,
                min_quiz_score,
                requires_quiz_pass,
            )?;
            CourseGraph::load(&tx, &course_id)?.validate()?;

            tx.commit()
                .map_err(|e| EngineError::Internal(format!("Commit failed: {}", e)))?;
            Ok((row, course_id))
        })?;

        self.emit_changed(&course_id);
        Ok(row)
    }

    /// Toggle a lesson's lock flag
    ///
    /// Re-locking reports `sweep_required`; the caller starts the batched
    /// re-evaluation over enrolled learners (see the unlock evaluator's
    /// re-lock sweep). Already-completed learners are never affected.
    pub fn set_lesson_locked(&self, lesson_id: &str, locked: bool) -> Result<(LessonRow, LockChange), EngineError> {
        let (row, course_id) = self.db.with_conn(|conn| {
            let course_id = courses::course_id_for_lesson(conn, lesson_id)?
                .ok_or_else(|| EngineError::NotFound(format!("lesson {}", lesson_id)))?;
            let row = courses::set_lesson_locked(conn, lesson_id, locked)?;
            Ok((row, course_id))
        })?;

        self.emit_changed(&course_id);
        Ok((row, LockChange { sweep_required: locked }))
    }

    /// Toggle a chapter's lock flag
    pub fn set_chapter_locked(&self, chapter_id: &str, locked: bool) -> Result<(ChapterRow, LockChange), EngineError> {
        let row = self.db.with_conn(|conn| {
            courses::set_chapter_locked(conn, chapter_id, locked)
        })?;

        self.emit_changed(&row.course_id);
        Ok((row, LockChange { sweep_required: locked }))
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn validate_id(&self, id: &str, field: &str) -> Result<(), EngineError> {
        if id.is_empty() {
            return Err(EngineError::InvalidInput(format!("{} is required", field)));
        }
        if id.len() > 255 {
            return Err(EngineError::InvalidInput(format!("{} must be <= 255 characters", field)));
        }
        Ok(())
    }

    fn validate_title(&self, title: &str) -> Result<(), EngineError> {
        if title.is_empty() {
            return Err(EngineError::InvalidInput("title is required".into()));
        }
        if title.len() > 500 {
            return Err(EngineError::InvalidInput("title must be <= 500 characters".into()));
        }
        Ok(())
    }

    fn validate_thresholds(
        &self,
        min_completion_percentage: f64,
        min_time_spent: i64,
        min_quiz_score: Option<f64>,
    ) -> Result<(), EngineError> {
        if !(0.0..=100.0).contains(&min_completion_percentage) {
            return Err(EngineError::InvalidInput(format!(
                "min_completion_percentage must be within 0-100, got {}",
                min_completion_percentage
            )));
        }
        if min_time_spent < 0 {
            return Err(EngineError::InvalidInput("min_time_spent must be non-negative".into()));
        }
        if let Some(score) = min_quiz_score {
            if !(0.0..=100.0).contains(&score) {
                return Err(EngineError::InvalidInput(format!(
                    "min_quiz_score must be within 0-100, got {}",
                    score
                )));
            }
        }
        Ok(())
    }

    fn emit_changed(&self, course_id: &str) {
        self.events.emit(EngineEvent::CatalogChanged {
            course_id: course_id.to_string(),
        });
    }
}
