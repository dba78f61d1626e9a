//! Completion aggregator - multi-criterion lesson completion and rollup
//!
//! A lesson completes when all three requirement flags hold (time,
//! content percentage, quiz). Completions roll up into chapter completion
//! (every mandatory lesson done) and the course percentage cached on the
//! enrollment. Completing a lesson triggers a breadth-first recompute of
//! its dependents; the acyclicity invariant bounds the walk by the
//! longest prerequisite chain.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tracing::warn;

use crate::db::{courses, enrollments, progress, CourseDb, LessonRow, UserProgressRow};
use crate::db::enrollments::enrollment_statuses;
use crate::error::EngineError;
use crate::graph::CourseGraph;
use crate::services::events::{EngineEvent, EventBus};
use crate::services::quiz_gate;
use crate::services::unlock::{self, AccessState, LearnerState};

/// Course-level rollup exposed to callers
#[derive(Debug, Clone, Serialize)]
pub struct CourseProgress {
    pub percentage: f64,
    pub completed_lessons: u32,
    pub total_mandatory_lessons: u32,
}

/// The three completion predicates for a lesson, given its ledger row and
/// the quiz verdict
pub fn requirement_flags(lesson: &LessonRow, row: &UserProgressRow, quiz_ok: bool) -> (bool, bool, bool) {
    let meets_time = row.time_spent >= lesson.min_time_spent;
    let meets_percentage = row.progress_percentage >= lesson.min_completion_percentage;
    (meets_time, meets_percentage, quiz_ok)
}

/// Chapter completion: every mandatory lesson in the chapter completed.
/// Non-mandatory lessons are ignored here but still gated individually.
pub fn chapter_completed_in(graph: &CourseGraph, chapter_id: &str, state: &LearnerState) -> bool {
    graph
        .lessons_in_chapter(chapter_id)
        .iter()
        .filter(|l| l.is_mandatory)
        .all(|l| state.is_completed(&l.id))
}

/// Pure course rollup over the ledger; a course with zero mandatory
/// lessons reports 0%, not an error
pub fn course_progress_in(graph: &CourseGraph, state: &LearnerState) -> CourseProgress {
    let total = graph.mandatory_lessons().count() as u32;
    let completed = graph
        .mandatory_lessons()
        .filter(|l| state.is_completed(&l.id))
        .count() as u32;

    let percentage = if total == 0 {
        0.0
    } else {
        100.0 * f64::from(completed) / f64::from(total)
    };

    CourseProgress {
        percentage,
        completed_lessons: completed,
        total_mandatory_lessons: total,
    }
}

/// Recompute the requirement flags for one lesson and complete it when
/// they all hold. Completion only fires from the unlocked state; evidence
/// gathered while locked (an early quiz pass) waits for the unlock.
///
/// Returns true when the lesson newly completed.
pub fn try_complete_in(
    conn: &Connection,
    graph: &CourseGraph,
    state: &mut LearnerState,
    user_id: &str,
    lesson: &LessonRow,
    pending_events: &mut Vec<EngineEvent>,
) -> Result<bool, EngineError> {
    if state.is_completed(&lesson.id) {
        return Ok(false);
    }

    let row = progress::ensure_progress(conn, user_id, &lesson.id)?;
    state.put_progress(row.clone());

    let standings = quiz_gate::standings_in(conn, user_id, &lesson.id)?;
    let quiz_ok = quiz_gate::verdict(lesson, &standings);
    let (meets_time, meets_percentage, meets_quiz) = requirement_flags(lesson, &row, quiz_ok);

    let row = progress::set_requirement_flags(conn, user_id, &lesson.id, meets_time, meets_percentage, meets_quiz)?;
    state.put_progress(row.clone());

    if !row.meets_all_requirements() {
        return Ok(false);
    }

    if !row.is_unlocked {
        if unlock::lesson_state(graph, lesson, state).state != AccessState::Unlocked {
            return Ok(false);
        }
        let row = progress::mark_unlocked(conn, user_id, &lesson.id)?;
        state.put_progress(row);
        pending_events.push(EngineEvent::LessonUnlocked {
            user_id: user_id.to_string(),
            lesson_id: lesson.id.clone(),
        });
    }

    let row = progress::mark_completed(conn, user_id, &lesson.id)?;
    state.put_progress(row);
    pending_events.push(EngineEvent::LessonCompleted {
        user_id: user_id.to_string(),
        lesson_id: lesson.id.clone(),
        course_id: graph.course().id.clone(),
    });

    Ok(true)
}

/// Breadth-first recompute after a completion
///
/// Each completed lesson wakes (a) lessons depending on it through either
/// edge representation, (b) the next lesson in order under sequential
/// access, and (c) once its chapter completes, the lessons of chapters
/// waiting on that chapter. Newly completed dependents re-enter the
/// queue. Failures on one node are logged and skipped; every write is
/// idempotent so a retry finishes the walk.
pub fn propagate_completion_in(
    conn: &Connection,
    graph: &CourseGraph,
    state: &mut LearnerState,
    user_id: &str,
    from_lesson_id: &str,
    pending_events: &mut Vec<EngineEvent>,
) -> Result<(), EngineError> {
    let mut queue = VecDeque::from([from_lesson_id.to_string()]);
    let mut completed_chapters: HashSet<String> = HashSet::new();

    while let Some(lesson_id) = queue.pop_front() {
        let mut candidates: Vec<String> = graph.dependents_of_lesson(&lesson_id).to_vec();

        if let Some(lesson) = graph.lesson(&lesson_id) {
            if graph.course().enforce_sequential_access {
                if let Some(next) = graph.next_lesson(lesson) {
                    candidates.push(next.id.clone());
                }
            }

            if let Some(chapter) = graph.chapter(&lesson.chapter_id) {
                if chapter_completed_in(graph, &chapter.id, state)
                    && completed_chapters.insert(chapter.id.clone())
                {
                    pending_events.push(EngineEvent::ChapterCompleted {
                        user_id: user_id.to_string(),
                        chapter_id: chapter.id.clone(),
                        course_id: graph.course().id.clone(),
                    });

                    for dependent in graph.dependent_chapters_of(&chapter.id) {
                        candidates.extend(graph.lessons_in_chapter(&dependent.id).iter().map(|l| l.id.clone()));
                    }
                    if graph.course().enforce_sequential_access {
                        if let Some(next_chapter) = graph.next_chapter(chapter) {
                            candidates.extend(
                                graph.lessons_in_chapter(&next_chapter.id).iter().map(|l| l.id.clone()),
                            );
                        }
                    }
                }
            }
        }

        for candidate_id in candidates {
            let Some(candidate) = graph.lesson(&candidate_id) else {
                continue;
            };

            if !state.is_unlocked(&candidate.id)
                && !state.is_completed(&candidate.id)
                && unlock::lesson_state(graph, candidate, state).state == AccessState::Unlocked
            {
                match progress::mark_unlocked(conn, user_id, &candidate.id) {
                    Ok(row) => {
                        state.put_progress(row);
                        pending_events.push(EngineEvent::LessonUnlocked {
                            user_id: user_id.to_string(),
                            lesson_id: candidate.id.clone(),
                        });
                    }
                    Err(e) => {
                        warn!(lesson = %candidate.id, error = %e, "Unlock persist failed during cascade, skipping node");
                        continue;
                    }
                }
            }

            match try_complete_in(conn, graph, state, user_id, candidate, pending_events) {
                Ok(true) => queue.push_back(candidate.id.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!(lesson = %candidate.id, error = %e, "Completion recompute failed during cascade, skipping node");
                }
            }
        }
    }

    Ok(())
}

/// Refresh the enrollment's cached percentage from the ledger
pub fn update_course_progress_in(
    conn: &Connection,
    graph: &CourseGraph,
    state: &LearnerState,
    user_id: &str,
    pending_events: &mut Vec<EngineEvent>,
) -> Result<CourseProgress, EngineError> {
    let rollup = course_progress_in(graph, state);
    let course_id = &graph.course().id;

    if let Some(enrollment) = enrollments::get_enrollment(conn, user_id, course_id)? {
        if (enrollment.progress_percentage - rollup.percentage).abs() > f64::EPSILON {
            enrollments::update_cached_progress(conn, user_id, course_id, rollup.percentage)?;
            pending_events.push(EngineEvent::CourseProgressUpdated {
                user_id: user_id.to_string(),
                course_id: course_id.clone(),
                percentage: rollup.percentage,
            });
        }

        if rollup.percentage >= 100.0 && enrollment.status == enrollment_statuses::ACTIVE {
            enrollments::set_status(conn, user_id, course_id, enrollment_statuses::COMPLETED)?;
            pending_events.push(EngineEvent::CourseCompleted {
                user_id: user_id.to_string(),
                course_id: course_id.clone(),
            });
        }
    }

    Ok(rollup)
}

/// Completion aggregator service
pub struct CompletionAggregator {
    db: Arc<CourseDb>,
    events: Arc<EventBus>,
}

impl CompletionAggregator {
    pub fn new(db: Arc<CourseDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    /// Recompute one lesson's flags, complete it if eligible, and run the
    /// full recompute cascade
    pub fn evaluate_lesson(&self, user_id: &str, lesson_id: &str) -> Result<UserProgressRow, EngineError> {
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

            let newly_completed =
                try_complete_in(conn, &graph, &mut state, user_id, &lesson, &mut pending_events)?;
            if newly_completed {
                propagate_completion_in(conn, &graph, &mut state, user_id, lesson_id, &mut pending_events)?;
            }
            update_course_progress_in(conn, &graph, &state, user_id, &mut pending_events)?;

            state
                .progress(lesson_id)
                .cloned()
                .ok_or_else(|| EngineError::Internal("Progress row missing after evaluation".to_string()))
        })?;

        for event in pending_events {
            self.events.emit(event);
        }

        Ok(row)
    }

    /// Whether a chapter is complete for a learner
    pub fn chapter_completed(&self, user_id: &str, chapter_id: &str) -> Result<bool, EngineError> {
        self.db.with_conn(|conn| {
            let chapter = courses::get_chapter(conn, chapter_id)?
                .ok_or_else(|| EngineError::NotFound(format!("chapter {}", chapter_id)))?;
            let graph = CourseGraph::load(conn, &chapter.course_id)?;
            let state = LearnerState::load(conn, user_id, &chapter.course_id)?;
            Ok(chapter_completed_in(&graph, chapter_id, &state))
        })
    }

    /// Pure course rollup, recomputed from the ledger
    pub fn course_progress(&self, user_id: &str, course_id: &str) -> Result<CourseProgress, EngineError> {
        self.db.with_conn(|conn| {
            let graph = CourseGraph::load(conn, course_id)?;
            let state = LearnerState::load(conn, user_id, course_id)?;
            Ok(course_progress_in(&graph, &state))
        })
    }

    /// Recompute the rollup and refresh the enrollment cache
    pub fn refresh_course_progress(&self, user_id: &str, course_id: &str) -> Result<CourseProgress, EngineError> {
        let mut pending_events = Vec::new();

        let rollup = self.db.with_conn(|conn| {
            let graph = CourseGraph::load(conn, course_id)?;
            let state = LearnerState::load(conn, user_id, course_id)?;
            update_course_progress_in(conn, &graph, &state, user_id, &mut pending_events)
        })?;

        for event in pending_events {
            self.events.emit(event);
        }

        Ok(rollup)
    }
}
