//! Quiz gate - translates attempt history into a completion verdict
//!
//! The verdict itself is a pure function over prefetched quiz and attempt
//! state; only the fetch touches the database.

use std::sync::Arc;

use crate::db::{quizzes, CourseDb, LessonRow, QuizAttemptRow, QuizRow};
use crate::error::EngineError;

/// Quiz gate service
pub struct QuizGate {
    db: Arc<CourseDb>,
}

/// One quiz with the learner's best attempt, if any
#[derive(Debug, Clone)]
pub struct QuizStanding {
    pub quiz: QuizRow,
    pub best: Option<QuizAttemptRow>,
}

impl QuizGate {
    pub fn new(db: Arc<CourseDb>) -> Self {
        Self { db }
    }

    /// Best attempt for (learner, quiz): highest percentage score, ties
    /// broken by the latest attempt number
    pub fn best_attempt(&self, user_id: &str, quiz_id: &str) -> Result<Option<QuizAttemptRow>, EngineError> {
        self.db.with_conn(|conn| quizzes::best_attempt(conn, user_id, quiz_id))
    }

    /// Whether the learner may start another attempt
    pub fn can_attempt(&self, user_id: &str, quiz_id: &str) -> Result<bool, EngineError> {
        self.db.with_conn(|conn| {
            let quiz = quizzes::get_quiz(conn, quiz_id)?
                .ok_or_else(|| EngineError::NotFound(format!("quiz {}", quiz_id)))?;

            let used = quizzes::attempt_count(conn, user_id, quiz_id)?;
            Ok(can_attempt_with(&quiz, used))
        })
    }

    /// Fetch the learner's standing on every quiz bound to a lesson
    pub fn standings(&self, user_id: &str, lesson_id: &str) -> Result<Vec<QuizStanding>, EngineError> {
        self.db.with_conn(|conn| standings_in(conn, user_id, lesson_id))
    }

    /// Quiz requirement verdict for a lesson
    pub fn is_satisfied(&self, user_id: &str, lesson: &LessonRow) -> Result<bool, EngineError> {
        let standings = self.standings(user_id, &lesson.id)?;
        Ok(verdict(lesson, &standings))
    }
}

/// Fetch standings inside an existing connection scope
pub fn standings_in(
    conn: &rusqlite::Connection,
    user_id: &str,
    lesson_id: &str,
) -> Result<Vec<QuizStanding>, EngineError> {
    let bound = quizzes::quizzes_for_lesson(conn, lesson_id)?;
    let mut standings = Vec::with_capacity(bound.len());
    for quiz in bound {
        let best = quizzes::best_attempt(conn, user_id, &quiz.id)?;
        standings.push(QuizStanding { quiz, best });
    }
    Ok(standings)
}

/// Attempt-limit check; NULL max_attempts means unbounded
pub fn can_attempt_with(quiz: &QuizRow, attempts_used: u32) -> bool {
    match quiz.max_attempts {
        Some(max) => attempts_used < max,
        None => true,
    }
}

/// Pure quiz verdict for a lesson
///
/// Two gates compose here:
/// - every quiz flagged `blocks_lesson_completion` must be passed,
///   regardless of the lesson's `requires_quiz_pass` flag
/// - when the lesson `requires_quiz_pass`, at least one bound quiz needs
///   a passed best attempt scoring at or above `min_quiz_score`
///
/// A lesson requiring a quiz pass with no quiz bound yet stays
/// unsatisfied until authoring attaches one.
pub fn verdict(lesson: &LessonRow, standings: &[QuizStanding]) -> bool {
    for standing in standings {
        if standing.quiz.blocks_lesson_completion {
            let passed = standing.best.as_ref().map(|a| a.is_passed).unwrap_or(false);
            if !passed {
                return false;
            }
        }
    }

    if !lesson.requires_quiz_pass {
        return true;
    }

    let threshold = lesson.min_quiz_score.unwrap_or(0.0);
    standings.iter().any(|standing| {
        standing
            .best
            .as_ref()
            .map(|a| a.is_passed && a.percentage_score >= threshold)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(requires_quiz_pass: bool, min_quiz_score: Option<f64>) -> LessonRow {
        LessonRow {
            id: "l1".into(),
            chapter_id: "ch1".into(),
            title: "Lesson".into(),
            lesson_order: 1,
            is_locked: true,
            is_mandatory: true,
            unlock_after_lesson_id: None,
            min_completion_percentage: 100.0,
            min_time_spent: 0,
            min_quiz_score,
            requires_quiz_pass,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn quiz(blocks: bool) -> QuizRow {
        QuizRow {
            id: "q1".into(),
            lesson_id: Some("l1".into()),
            title: "Quiz".into(),
            passing_score: 70.0,
            max_attempts: Some(2),
            is_prerequisite_quiz: false,
            blocks_lesson_completion: blocks,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn attempt(percentage: f64, passed: bool) -> QuizAttemptRow {
        QuizAttemptRow {
            id: "a1".into(),
            user_id: "u1".into(),
            quiz_id: "q1".into(),
            attempt_number: 1,
            score: percentage / 10.0,
            percentage_score: percentage,
            is_passed: passed,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn trivially_satisfied_without_quiz_requirement() {
        assert!(verdict(&lesson(false, None), &[]));
    }

    #[test]
    fn required_pass_with_no_quiz_is_unsatisfied() {
        assert!(!verdict(&lesson(true, Some(70.0)), &[]));
    }

    #[test]
    fn pass_below_min_score_is_unsatisfied() {
        let standings = vec![QuizStanding {
            quiz: quiz(false),
            best: Some(attempt(75.0, true)),
        }];
        assert!(!verdict(&lesson(true, Some(80.0)), &standings));
        assert!(verdict(&lesson(true, Some(70.0)), &standings));
    }

    #[test]
    fn blocking_quiz_overrides_requires_flag() {
        let standings = vec![QuizStanding {
            quiz: quiz(true),
            best: Some(attempt(50.0, false)),
        }];
        // Lesson does not require a quiz pass, but the blocking quiz is unpassed
        assert!(!verdict(&lesson(false, None), &standings));
    }

    #[test]
    fn attempt_limit_boundaries() {
        let q = quiz(false);
        assert!(can_attempt_with(&q, 0));
        assert!(can_attempt_with(&q, 1));
        assert!(!can_attempt_with(&q, 2));

        let unbounded = QuizRow { max_attempts: None, ..q };
        assert!(can_attempt_with(&unbounded, 1000));
    }
}
