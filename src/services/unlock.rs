//! Unlock evaluator - the core access decision procedure
//!
//! Per (learner, lesson) the state machine is `Locked -> Unlocked ->
//! Completed`, monotonic: once completed a lesson never reports anything
//! else, and `Unlocked -> Locked` happens only through an authoring
//! re-lock, which runs as a batched sweep over every enrolled learner
//! rather than a per-user trickle.
//!
//! Evaluation is a pure function over a [`CourseGraph`] snapshot and a
//! [`LearnerState`] fetched once per request; no I/O happens inside the
//! decision itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{courses, enrollments, progress, quizzes, CourseDb, LessonRow, UserProgressRow};
use crate::db::courses::ChapterRow;
use crate::error::EngineError;
use crate::graph::{CourseGraph, Predecessor, PrerequisiteKind};
use crate::services::completion;
use crate::services::events::{EngineEvent, EventBus};

/// Access state reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    Locked,
    Unlocked,
    Completed,
    /// Read-only preview on courses with `allow_lesson_preview`; never
    /// recorded in the ledger
    Preview,
}

/// Accessibility verdict with the first unsatisfied gate, if any
#[derive(Debug, Clone, Serialize)]
pub struct LessonAccess {
    pub state: AccessState,
    pub reason: Option<String>,
}

impl LessonAccess {
    fn completed() -> Self {
        Self { state: AccessState::Completed, reason: None }
    }

    fn unlocked() -> Self {
        Self { state: AccessState::Unlocked, reason: None }
    }

    fn locked(reason: String) -> Self {
        Self { state: AccessState::Locked, reason: Some(reason) }
    }
}

/// One learner's view of one course, fetched in two queries
pub struct LearnerState {
    progress: HashMap<String, UserProgressRow>,
    best_scores: HashMap<String, f64>,
}

impl LearnerState {
    /// Load the learner's progress rows and best quiz scores for a course
    pub fn load(conn: &Connection, user_id: &str, course_id: &str) -> Result<Self, EngineError> {
        let rows = progress::progress_for_course(conn, user_id, course_id)?;
        let best_scores = quizzes::best_scores_for_course(conn, user_id, course_id)?;

        Ok(Self {
            progress: rows.into_iter().map(|r| (r.lesson_id.clone(), r)).collect(),
            best_scores,
        })
    }

    pub fn progress(&self, lesson_id: &str) -> Option<&UserProgressRow> {
        self.progress.get(lesson_id)
    }

    pub fn is_completed(&self, lesson_id: &str) -> bool {
        self.progress.get(lesson_id).map(|r| r.is_completed).unwrap_or(false)
    }

    pub fn is_unlocked(&self, lesson_id: &str) -> bool {
        self.progress.get(lesson_id).map(|r| r.is_unlocked).unwrap_or(false)
    }

    pub fn time_spent(&self, lesson_id: &str) -> i64 {
        self.progress.get(lesson_id).map(|r| r.time_spent).unwrap_or(0)
    }

    pub fn best_score(&self, lesson_id: &str) -> Option<f64> {
        self.best_scores.get(lesson_id).copied()
    }

    /// Replace a row after a write so later decisions in the same request
    /// see it
    pub fn put_progress(&mut self, row: UserProgressRow) {
        self.progress.insert(row.lesson_id.clone(), row);
    }
}

/// Pure lesson access decision
///
/// The unlock rule is the conjunction of: parent chapter unlocked, the
/// lesson's own gates (skipped entirely when authoring left the lesson
/// unlocked), and the course-wide sequential-order gate.
pub fn lesson_state(graph: &CourseGraph, lesson: &LessonRow, state: &LearnerState) -> LessonAccess {
    // Completion is monotonic; nothing below can retract it
    if state.is_completed(&lesson.id) {
        return LessonAccess::completed();
    }

    let Some(chapter) = graph.chapter(&lesson.chapter_id) else {
        return LessonAccess::locked(format!("chapter {} is not part of the course", lesson.chapter_id));
    };
    if !chapter_unlocked(graph, chapter, state) {
        return LessonAccess::locked(format!("chapter {} is locked", chapter.id));
    }

    // Sequential order gate is independent of explicit prerequisite edges
    if graph.course().enforce_sequential_access {
        if let Some(prev) = graph.previous_lesson(lesson) {
            if !state.is_completed(&prev.id) {
                return LessonAccess::locked(format!(
                    "sequential access: complete lesson {} first",
                    prev.id
                ));
            }
        }
    }

    if !lesson.is_locked {
        return LessonAccess::unlocked();
    }

    for pred in graph.predecessors_of_lesson(&lesson.id) {
        if let Some(reason) = unsatisfied_reason(&pred, state) {
            return LessonAccess::locked(reason);
        }
    }

    LessonAccess::unlocked()
}

/// Pure chapter access decision (mirrors the lesson rule at chapter
/// granularity; an unlocked-by-authoring chapter skips every gate)
pub fn chapter_unlocked(graph: &CourseGraph, chapter: &ChapterRow, state: &LearnerState) -> bool {
    if !chapter.is_locked {
        return true;
    }

    if let Some(after) = graph.predecessors_of_chapter(&chapter.id) {
        if !completion::chapter_completed_in(graph, &after.id, state) {
            return false;
        }
    }

    if graph.course().enforce_sequential_access {
        if let Some(prev) = graph.previous_chapter(chapter) {
            if !completion::chapter_completed_in(graph, &prev.id, state) {
                return false;
            }
        }
    }

    true
}

fn unsatisfied_reason(pred: &Predecessor, state: &LearnerState) -> Option<String> {
    match pred.kind {
        PrerequisiteKind::Completion => {
            if state.is_completed(&pred.lesson_id) {
                None
            } else {
                Some(format!("requires completion of lesson {}", pred.lesson_id))
            }
        }
        PrerequisiteKind::Score => {
            let required = pred.required_score.unwrap_or(0.0);
            let satisfied = state
                .best_score(&pred.lesson_id)
                .map(|best| best >= required)
                .unwrap_or(false);
            if satisfied {
                None
            } else {
                Some(format!(
                    "requires a quiz score of at least {} on lesson {}",
                    required, pred.lesson_id
                ))
            }
        }
        PrerequisiteKind::Time => {
            let required = pred.required_time.unwrap_or(0);
            if state.time_spent(&pred.lesson_id) >= required {
                None
            } else {
                Some(format!(
                    "requires at least {}s spent on lesson {}",
                    required, pred.lesson_id
                ))
            }
        }
    }
}

/// Persist unlock flags for every lesson that now evaluates unlocked
///
/// Evaluation stays correct without this (the rule is re-run lazily on
/// access), but materializing the flag keeps `unlocked_at` stamps and
/// feeds the notification hooks. Returns the newly unlocked lesson IDs.
pub fn sync_unlock_flags_in(
    conn: &Connection,
    graph: &CourseGraph,
    state: &mut LearnerState,
    user_id: &str,
) -> Result<Vec<String>, EngineError> {
    let mut newly_unlocked = Vec::new();

    for lesson in graph.all_lessons() {
        if state.is_unlocked(&lesson.id) || state.is_completed(&lesson.id) {
            continue;
        }
        if lesson_state(graph, lesson, state).state == AccessState::Unlocked {
            let row = progress::mark_unlocked(conn, user_id, &lesson.id)?;
            state.put_progress(row);
            newly_unlocked.push(lesson.id.clone());
        }
    }

    Ok(newly_unlocked)
}

/// Unlock evaluator service
pub struct UnlockEvaluator {
    db: Arc<CourseDb>,
    events: Arc<EventBus>,
}

impl UnlockEvaluator {
    pub fn new(db: Arc<CourseDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    /// Accessibility of one lesson for one learner
    ///
    /// On courses allowing lesson preview, a locked lesson reports
    /// `Preview` instead of `Locked`; the ledger is never written.
    pub fn lesson_access(&self, user_id: &str, lesson_id: &str) -> Result<LessonAccess, EngineError> {
        self.db.with_conn(|conn| {
            let course_id = courses::course_id_for_lesson(conn, lesson_id)?
                .ok_or_else(|| EngineError::NotFound(format!("lesson {}", lesson_id)))?;
            let graph = CourseGraph::load(conn, &course_id)?;
            let state = LearnerState::load(conn, user_id, &course_id)?;

            let lesson = graph
                .lesson(lesson_id)
                .ok_or_else(|| EngineError::NotFound(format!("lesson {}", lesson_id)))?;

            let mut access = lesson_state(&graph, lesson, &state);
            if access.state == AccessState::Locked && graph.course().allow_lesson_preview {
                access.state = AccessState::Preview;
            }
            Ok(access)
        })
    }

    /// Re-evaluate and persist unlock flags for a learner across a course
    pub fn sync_unlock_flags(&self, user_id: &str, course_id: &str) -> Result<Vec<String>, EngineError> {
        let newly_unlocked = self.db.with_conn(|conn| {
            let graph = CourseGraph::load(conn, course_id)?;
            let mut state = LearnerState::load(conn, user_id, course_id)?;
            sync_unlock_flags_in(conn, &graph, &mut state, user_id)
        })?;

        for lesson_id in &newly_unlocked {
            self.events.emit(EngineEvent::LessonUnlocked {
                user_id: user_id.to_string(),
                lesson_id: lesson_id.clone(),
            });
        }

        Ok(newly_unlocked)
    }

    /// Start a re-lock sweep over every learner enrolled in a course
    pub fn relock_sweep(&self, course_id: &str, batch_size: usize) -> RelockSweep {
        RelockSweep::new(self.db.clone(), self.events.clone(), course_id, batch_size)
    }
}

/// Outcome of a (possibly partial) re-lock sweep
#[derive(Debug, Clone, Serialize)]
pub struct SweepOutcome {
    pub learners_evaluated: usize,
    /// False when the sweep was cancelled before reaching the end
    pub completed: bool,
    /// Resume cursor: the last user id fully processed
    pub cursor: Option<String>,
}

/// Batched re-evaluation of unlock flags after an authoring re-lock
///
/// Processes enrollments in user-id order, a batch at a time. Between
/// batches it checks a cancel token; a cancelled or failed sweep leaves
/// every already-processed learner's rows in place and can be resumed
/// from the returned cursor. Completion flags are never retracted.
pub struct RelockSweep {
    db: Arc<CourseDb>,
    events: Arc<EventBus>,
    course_id: String,
    batch_size: usize,
    cursor: Option<String>,
    cancel: Arc<AtomicBool>,
    learners_evaluated: usize,
}

impl RelockSweep {
    pub fn new(db: Arc<CourseDb>, events: Arc<EventBus>, course_id: &str, batch_size: usize) -> Self {
        Self {
            db,
            events,
            course_id: course_id.to_string(),
            batch_size: batch_size.max(1),
            cursor: None,
            cancel: Arc::new(AtomicBool::new(false)),
            learners_evaluated: 0,
        }
    }

    /// Resume a sweep from a cursor returned by an earlier run
    pub fn resume(
        db: Arc<CourseDb>,
        events: Arc<EventBus>,
        course_id: &str,
        batch_size: usize,
        cursor: Option<String>,
    ) -> Self {
        let mut sweep = Self::new(db, events, course_id, batch_size);
        sweep.cursor = cursor;
        sweep
    }

    /// Token the caller can flip to stop the sweep between batches
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run until the course's enrollments are exhausted or the sweep is
    /// cancelled
    pub fn run(&mut self) -> Result<SweepOutcome, EngineError> {
        let graph = self.db.with_conn(|conn| CourseGraph::load(conn, &self.course_id))?;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                info!(course = %self.course_id, evaluated = self.learners_evaluated, "Re-lock sweep cancelled");
                return Ok(self.outcome(false));
            }

            let batch = self.db.with_conn(|conn| {
                enrollments::enrollments_for_course_after(
                    conn,
                    &self.course_id,
                    self.cursor.as_deref(),
                    self.batch_size,
                )
            })?;

            if batch.is_empty() {
                let outcome = self.outcome(true);
                self.events.emit(EngineEvent::RelockSweepFinished {
                    course_id: self.course_id.clone(),
                    learners_evaluated: outcome.learners_evaluated,
                    completed: true,
                });
                return Ok(outcome);
            }

            for enrollment in &batch {
                // One learner's failure must not abort the rest; the
                // sweep is idempotent and re-runnable for stragglers
                if let Err(e) = self.db.with_conn(|conn| {
                    resync_learner(conn, &graph, &enrollment.user_id)
                }) {
                    warn!(
                        course = %self.course_id,
                        user = %enrollment.user_id,
                        error = %e,
                        "Re-lock sweep failed for learner, continuing"
                    );
                }
                self.learners_evaluated += 1;
            }

            self.cursor = batch.last().map(|e| e.user_id.clone());
            debug!(
                course = %self.course_id,
                cursor = ?self.cursor,
                evaluated = self.learners_evaluated,
                "Re-lock sweep batch done"
            );
        }
    }

    fn outcome(&self, completed: bool) -> SweepOutcome {
        SweepOutcome {
            learners_evaluated: self.learners_evaluated,
            completed,
            cursor: self.cursor.clone(),
        }
    }
}

/// Re-evaluate one learner's unlock flags against the current graph
fn resync_learner(conn: &Connection, graph: &CourseGraph, user_id: &str) -> Result<(), EngineError> {
    let mut state = LearnerState::load(conn, user_id, &graph.course().id)?;

    for lesson in graph.all_lessons() {
        if state.is_completed(&lesson.id) {
            continue;
        }

        let access = lesson_state(graph, lesson, &state);
        match access.state {
            AccessState::Locked if state.is_unlocked(&lesson.id) => {
                progress::relock(conn, user_id, &lesson.id)?;
                if let Some(row) = progress::get_progress(conn, user_id, &lesson.id)? {
                    state.put_progress(row);
                }
            }
            AccessState::Unlocked if !state.is_unlocked(&lesson.id) => {
                let row = progress::mark_unlocked(conn, user_id, &lesson.id)?;
                state.put_progress(row);
            }
            _ => {}
        }
    }

    Ok(())
}
