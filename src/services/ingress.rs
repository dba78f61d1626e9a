//! Event ingress - the narrow interface external actions feed the engine
//!
//! Lesson access heartbeats, quiz submissions and enrollment events enter
//! here; each records the raw fact in the ledger, then runs the recompute
//! cascade (completion, unlock, rollup) synchronously before returning.

use std::sync::Arc;

use tracing::info;

use crate::db::quizzes::CreateAttemptInput;
use crate::db::{courses, enrollments, progress, quizzes, CourseDb, EnrollmentRow, QuizAttemptRow, UserProgressRow};
use crate::db::enrollments::enrollment_statuses;
use crate::error::EngineError;
use crate::graph::CourseGraph;
use crate::services::completion::{self, CompletionAggregator, CourseProgress};
use crate::services::events::{EngineEvent, EventBus};
use crate::services::quiz_gate;
use crate::services::unlock::{self, AccessState, LearnerState, LessonAccess, UnlockEvaluator};

/// Event ingress service
pub struct EventIngress {
    db: Arc<CourseDb>,
    events: Arc<EventBus>,
    unlock: Arc<UnlockEvaluator>,
    completion: Arc<CompletionAggregator>,
}

impl EventIngress {
    pub fn new(
        db: Arc<CourseDb>,
        events: Arc<EventBus>,
        unlock: Arc<UnlockEvaluator>,
        completion: Arc<CompletionAggregator>,
    ) -> Self {
        Self { db, events, unlock, completion }
    }

    /// Accessibility of a lesson for a learner
    pub fn get_lesson_accessibility(&self, user_id: &str, lesson_id: &str) -> Result<LessonAccess, EngineError> {
        self.unlock.lesson_access(user_id, lesson_id)
    }

    /// Record a lesson access or content-player heartbeat
    ///
    /// Records the raw fact (time delta, content percentage, access
    /// count), then recomputes completion and downstream accessibility.
    /// Access to a locked lesson is rejected; preview visibility never
    /// reaches the ledger.
    pub fn record_lesson_access(
        &self,
        user_id: &str,
        lesson_id: &str,
        time_delta: i64,
        content_percentage: f64,
    ) -> Result<UserProgressRow, EngineError> {
        if time_delta < 0 {
            return Err(EngineError::InvalidInput("time_delta must be non-negative".into()));
        }
        if !(0.0..=100.0).contains(&content_percentage) {
            return Err(EngineError::InvalidInput(format!(
                "content_percentage must be within 0-100, got {}",
                content_percentage
            )));
        }

        let mut pending_events = Vec::new();

        let row = self.db.with_conn(|conn| {
            let course_id = courses::course_id_for_lesson(conn, lesson_id)?
                .ok_or_else(|| EngineError::NotFound(format!("lesson {}", lesson_id)))?;
            let graph = CourseGraph::load(conn, &course_id)?;
            let mut state = LearnerState::load(conn, user_id, &course_id)?;

            let lesson = graph
                .lesson(lesson_id)
                .ok_or_else(|| EngineError::NotFound(format!("lesson {}", lesson_id)))?
                .clone();

            let access = unlock::lesson_state(&graph, &lesson, &state);
            if access.state == AccessState::Locked {
                return Err(EngineError::RequirementsNotMet(
                    access.reason.unwrap_or_else(|| format!("lesson {} is locked", lesson_id)),
                ));
            }

            if access.state == AccessState::Unlocked && !state.is_unlocked(lesson_id) {
                let row = progress::mark_unlocked(conn, user_id, lesson_id)?;
                state.put_progress(row);
                pending_events.push(EngineEvent::LessonUnlocked {
                    user_id: user_id.to_string(),
                    lesson_id: lesson_id.to_string(),
                });
            }

            let row = progress::record_access(conn, user_id, lesson_id, time_delta, content_percentage)?;
            state.put_progress(row.clone());
            pending_events.push(EngineEvent::LessonAccessed {
                user_id: user_id.to_string(),
                lesson_id: lesson_id.to_string(),
                time_spent: row.time_spent,
                progress_percentage: row.progress_percentage,
            });

            if enrollments::get_enrollment(conn, user_id, &course_id)?.is_some() {
                enrollments::set_current_lesson(conn, user_id, &course_id, lesson_id)?;
            }

            let newly_completed =
                completion::try_complete_in(conn, &graph, &mut state, user_id, &lesson, &mut pending_events)?;
            if newly_completed {
                completion::propagate_completion_in(
                    conn,
                    &graph,
                    &mut state,
                    user_id,
                    lesson_id,
                    &mut pending_events,
                )?;
            }
            completion::update_course_progress_in(conn, &graph, &state, user_id, &mut pending_events)?;

            state
                .progress(lesson_id)
                .cloned()
                .ok_or_else(|| EngineError::Internal("Progress row missing after access".to_string()))
        })?;

        for event in pending_events {
            self.events.emit(event);
        }

        Ok(row)
    }

    /// Record a quiz attempt from the submission service
    ///
    /// Rejects with `AttemptLimitExceeded` once the attempt budget is
    /// spent; an accepted attempt triggers the recompute cascade on the
    /// bound lesson.
    pub fn record_quiz_attempt(
        &self,
        user_id: &str,
        quiz_id: &str,
        input: CreateAttemptInput,
    ) -> Result<QuizAttemptRow, EngineError> {
        if !(0.0..=100.0).contains(&input.percentage_score) {
            return Err(EngineError::InvalidInput(format!(
                "percentage_score must be within 0-100, got {}",
                input.percentage_score
            )));
        }

        let (attempt, bound_lesson) = self.db.with_conn(|conn| {
            let quiz = quizzes::get_quiz(conn, quiz_id)?
                .ok_or_else(|| EngineError::NotFound(format!("quiz {}", quiz_id)))?;

            let used = quizzes::attempt_count(conn, user_id, quiz_id)?;
            if !quiz_gate::can_attempt_with(&quiz, used) {
                return Err(EngineError::AttemptLimitExceeded {
                    quiz_id: quiz_id.to_string(),
                    max_attempts: quiz.max_attempts.unwrap_or(0),
                });
            }

            let attempt = quizzes::create_attempt(conn, user_id, &quiz, &input)?;
            Ok((attempt, quiz.lesson_id))
        })?;

        self.events.emit(EngineEvent::QuizAttemptRecorded {
            user_id: user_id.to_string(),
            quiz_id: quiz_id.to_string(),
            attempt_number: attempt.attempt_number,
            is_passed: attempt.is_passed,
        });

        if let Some(lesson_id) = bound_lesson {
            self.completion.evaluate_lesson(user_id, &lesson_id)?;
        }

        Ok(attempt)
    }

    /// Course rollup for a learner, recomputed from the ledger
    pub fn get_course_progress(&self, user_id: &str, course_id: &str) -> Result<CourseProgress, EngineError> {
        self.completion.course_progress(user_id, course_id)
    }

    /// Total seconds a learner has spent across a course
    pub fn get_total_time_spent(&self, user_id: &str, course_id: &str) -> Result<i64, EngineError> {
        self.db.with_conn(|conn| progress::total_time_spent(conn, user_id, course_id))
    }

    /// Handle enrollment creation from the enrollment service
    ///
    /// Seeds the enrollment row and materializes the initially unlocked
    /// lessons (first chapter, unlocked-by-authoring content).
    pub fn enrollment_created(&self, user_id: &str, course_id: &str) -> Result<EnrollmentRow, EngineError> {
        let enrollment = self.db.with_conn(|conn| {
            courses::get_course(conn, course_id)?
                .ok_or_else(|| EngineError::NotFound(format!("course {}", course_id)))?;
            enrollments::create_enrollment(conn, user_id, course_id)
        })?;

        info!(user = %user_id, course = %course_id, "Enrollment created");
        self.events.emit(EngineEvent::EnrollmentCreated {
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
        });

        self.unlock.sync_unlock_flags(user_id, course_id)?;

        Ok(enrollment)
    }

    /// Handle enrollment cancellation from the enrollment service
    pub fn enrollment_cancelled(&self, user_id: &str, course_id: &str) -> Result<EnrollmentRow, EngineError> {
        let enrollment = self.db.with_conn(|conn| {
            enrollments::set_status(conn, user_id, course_id, enrollment_statuses::CANCELLED)
        })?;

        self.events.emit(EngineEvent::EnrollmentCancelled {
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
        });

        Ok(enrollment)
    }
}
