//! Integration tests for the unlock and progress engine
//!
//! Exercises the full path: catalog authoring with graph validation,
//! event ingress, the unlock evaluator, the completion cascade, and the
//! enrollment rollup cache.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use unlock_engine::db::courses::{
    CreateChapterInput, CreateCourseInput, CreateLessonInput, CreatePrerequisiteInput,
};
use unlock_engine::db::quizzes::{CreateAttemptInput, CreateQuizInput};
use unlock_engine::db::{enrollments, progress, CourseDb};
use unlock_engine::{AccessState, EngineError, EngineEvent, Services};

fn engine() -> (Arc<CourseDb>, Services) {
    let db = Arc::new(CourseDb::open_in_memory().unwrap());
    let services = Services::new(db.clone());
    (db, services)
}

fn course_input(id: &str) -> CreateCourseInput {
    CreateCourseInput {
        id: id.into(),
        title: format!("Course {}", id),
        enforce_sequential_access: false,
        allow_lesson_preview: false,
    }
}

fn chapter_input(id: &str, course_id: &str, order: i32) -> CreateChapterInput {
    CreateChapterInput {
        id: id.into(),
        course_id: course_id.into(),
        title: format!("Chapter {}", id),
        chapter_order: order,
        is_locked: false,
        unlock_after_chapter_id: None,
    }
}

fn lesson_input(id: &str, chapter_id: &str, order: i32) -> CreateLessonInput {
    CreateLessonInput {
        id: id.into(),
        chapter_id: chapter_id.into(),
        title: format!("Lesson {}", id),
        lesson_order: order,
        is_locked: true,
        is_mandatory: true,
        unlock_after_lesson_id: None,
        min_completion_percentage: 100.0,
        min_time_spent: 0,
        min_quiz_score: None,
        requires_quiz_pass: false,
    }
}

fn quiz_input(id: &str, lesson_id: &str) -> CreateQuizInput {
    CreateQuizInput {
        id: id.into(),
        lesson_id: Some(lesson_id.into()),
        title: format!("Quiz {}", id),
        passing_score: 70.0,
        max_attempts: None,
        is_prerequisite_quiz: false,
        blocks_lesson_completion: false,
    }
}

fn attempt(percentage: f64) -> CreateAttemptInput {
    CreateAttemptInput {
        id: None,
        score: percentage / 10.0,
        percentage_score: percentage,
        started_at: None,
        finished_at: None,
    }
}

/// Chapter A has a time-gated lesson and a second lesson unlocking after
/// it: partial time leaves the gate shut, crossing the threshold
/// completes the first lesson and flips the second from locked to
/// unlocked.
#[test]
fn time_gate_unlocks_dependent_lesson() {
    let (_db, s) = engine();

    s.catalog.create_course(course_input("c1")).unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            min_time_spent: 300,
            ..lesson_input("l1", "ch1", 1)
        })
        .unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            unlock_after_lesson_id: Some("l1".into()),
            ..lesson_input("l2", "ch1", 2)
        })
        .unwrap();

    s.ingress.enrollment_created("u1", "c1").unwrap();

    let row = s.ingress.record_lesson_access("u1", "l1", 150, 60.0).unwrap();
    assert!(!row.is_completed);
    assert!(!row.meets_time_requirement);

    let l2 = s.ingress.get_lesson_accessibility("u1", "l2").unwrap();
    assert_eq!(l2.state, AccessState::Locked);
    assert!(l2.reason.as_deref().unwrap().contains("l1"));

    let row = s.ingress.record_lesson_access("u1", "l1", 200, 100.0).unwrap();
    assert!(row.meets_time_requirement);
    assert!(row.meets_percentage_requirement);
    assert!(row.is_completed);
    assert_eq!(row.time_spent, 350);

    let l2 = s.ingress.get_lesson_accessibility("u1", "l2").unwrap();
    assert_eq!(l2.state, AccessState::Unlocked);
}

/// Quiz-gated lesson with two allowed attempts: a failing first attempt
/// leaves the gate shut, a passing second attempt satisfies it, and the
/// third attempt is rejected rather than clamped.
#[test]
fn quiz_gate_with_attempt_limit() {
    let (db, s) = engine();

    s.catalog.create_course(course_input("c1")).unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            min_completion_percentage: 0.0,
            requires_quiz_pass: true,
            min_quiz_score: Some(70.0),
            ..lesson_input("l1", "ch1", 1)
        })
        .unwrap();
    s.catalog
        .create_quiz(CreateQuizInput {
            max_attempts: Some(2),
            ..quiz_input("q1", "l1")
        })
        .unwrap();

    s.ingress.enrollment_created("u1", "c1").unwrap();

    let first = s.ingress.record_quiz_attempt("u1", "q1", attempt(50.0)).unwrap();
    assert_eq!(first.attempt_number, 1);
    assert!(!first.is_passed);

    let row = s.ingress.record_lesson_access("u1", "l1", 10, 100.0).unwrap();
    assert!(!row.meets_quiz_requirement);
    assert!(!row.is_completed);

    let second = s.ingress.record_quiz_attempt("u1", "q1", attempt(80.0)).unwrap();
    assert_eq!(second.attempt_number, 2);
    assert!(second.is_passed);

    let row = db
        .with_conn(|conn| progress::get_progress(conn, "u1", "l1"))
        .unwrap()
        .unwrap();
    assert!(row.meets_quiz_requirement);
    assert!(row.is_completed);

    let third = s.ingress.record_quiz_attempt("u1", "q1", attempt(90.0));
    assert!(matches!(third, Err(EngineError::AttemptLimitExceeded { .. })));
}

/// A course with zero mandatory lessons reports 0%, not an error.
#[test]
fn zero_mandatory_lessons_is_zero_percent() {
    let (_db, s) = engine();

    s.catalog.create_course(course_input("c1")).unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            is_mandatory: false,
            ..lesson_input("l1", "ch1", 1)
        })
        .unwrap();

    s.ingress.enrollment_created("u1", "c1").unwrap();

    let rollup = s.ingress.get_course_progress("u1", "c1").unwrap();
    assert_eq!(rollup.percentage, 0.0);
    assert_eq!(rollup.total_mandatory_lessons, 0);
    assert_eq!(rollup.completed_lessons, 0);
}

/// Authoring edits that would close a prerequisite cycle are rejected and
/// leave no partial state behind.
#[test]
fn cycles_and_bad_ordering_are_rejected() {
    let (db, s) = engine();

    s.catalog.create_course(course_input("c1")).unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog.create_lesson(lesson_input("l1", "ch1", 1)).unwrap();
    s.catalog.create_lesson(lesson_input("l2", "ch1", 2)).unwrap();

    s.catalog
        .add_prerequisite(CreatePrerequisiteInput {
            lesson_id: "l2".into(),
            prerequisite_lesson_id: "l1".into(),
            prerequisite_type: "completion".into(),
            required_score: None,
            required_time: None,
        })
        .unwrap();

    let err = s
        .catalog
        .add_prerequisite(CreatePrerequisiteInput {
            lesson_id: "l1".into(),
            prerequisite_lesson_id: "l2".into(),
            prerequisite_type: "completion".into(),
            required_score: None,
            required_time: None,
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::CycleDetected(_)));

    // The rejected edge was rolled back, not partially applied
    let edges = db
        .with_conn(|conn| unlock_engine::db::courses::prerequisites_for_lesson(conn, "l1"))
        .unwrap();
    assert!(edges.is_empty());

    // Unlock-after must reference a smaller order
    let err = s
        .catalog
        .create_lesson(CreateLessonInput {
            unlock_after_lesson_id: Some("l2".into()),
            ..lesson_input("l0", "ch1", 0)
        })
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidOrdering(_)));
}

/// Randomly generated forward-edge DAGs always validate; injecting a
/// single back-edge always trips the cycle detector.
#[test]
fn random_dags_validate_and_back_edges_fail() {
    let mut rng = StdRng::seed_from_u64(7);

    for round in 0..10 {
        let (_db, s) = engine();
        let course_id = format!("c{}", round);
        s.catalog.create_course(course_input(&course_id)).unwrap();
        s.catalog.create_chapter(chapter_input("ch1", &course_id, 1)).unwrap();

        let n = rng.gen_range(4..10);
        for i in 0..n {
            s.catalog
                .create_lesson(lesson_input(&format!("l{}", i), "ch1", i))
                .unwrap();
        }

        // Forward edges only (earlier order -> later order): acyclic.
        // The last lesson is reserved for the forced edge pair below.
        for j in 1..n - 1 {
            if rng.gen_bool(0.6) {
                let i = rng.gen_range(0..j);
                s.catalog
                    .add_prerequisite(CreatePrerequisiteInput {
                        lesson_id: format!("l{}", j),
                        prerequisite_lesson_id: format!("l{}", i),
                        prerequisite_type: "completion".into(),
                        required_score: None,
                        required_time: None,
                    })
                    .unwrap();
            }
        }

        // A back-edge from the first lesson to the last closes a cycle
        // whenever a forward path exists; force one to be sure
        s.catalog
            .add_prerequisite(CreatePrerequisiteInput {
                lesson_id: format!("l{}", n - 1),
                prerequisite_lesson_id: "l0".into(),
                prerequisite_type: "completion".into(),
                required_score: None,
                required_time: None,
            })
            .unwrap();
        let err = s
            .catalog
            .add_prerequisite(CreatePrerequisiteInput {
                lesson_id: "l0".into(),
                prerequisite_lesson_id: format!("l{}", n - 1),
                prerequisite_type: "completion".into(),
                required_score: None,
                required_time: None,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected(_)), "round {}", round);
    }
}

/// The cached enrollment percentage always equals the pure recomputation
/// over the ledger, and recomputing twice yields the same value.
#[test]
fn cached_progress_matches_recompute() {
    let (db, s) = engine();

    s.catalog.create_course(course_input("c1")).unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog.create_lesson(lesson_input("l1", "ch1", 1)).unwrap();
    s.catalog.create_lesson(lesson_input("l2", "ch1", 2)).unwrap();
    // Non-mandatory lessons stay out of the rollup
    s.catalog
        .create_lesson(CreateLessonInput {
            is_mandatory: false,
            ..lesson_input("l3", "ch1", 3)
        })
        .unwrap();

    s.ingress.enrollment_created("u1", "c1").unwrap();
    s.ingress.record_lesson_access("u1", "l1", 60, 100.0).unwrap();

    let rollup = s.ingress.get_course_progress("u1", "c1").unwrap();
    assert_eq!(rollup.completed_lessons, 1);
    assert_eq!(rollup.total_mandatory_lessons, 2);
    assert_eq!(rollup.percentage, 50.0);

    let cached = db
        .with_conn(|conn| enrollments::get_enrollment(conn, "u1", "c1"))
        .unwrap()
        .unwrap();
    assert_eq!(cached.progress_percentage, rollup.percentage);

    let again = s.completion.refresh_course_progress("u1", "c1").unwrap();
    assert_eq!(again.percentage, rollup.percentage);
}

/// Completing the last mandatory lesson moves the enrollment to
/// completed.
#[test]
fn full_completion_closes_the_enrollment() {
    let (db, s) = engine();

    s.catalog.create_course(course_input("c1")).unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog.create_lesson(lesson_input("l1", "ch1", 1)).unwrap();

    s.ingress.enrollment_created("u1", "c1").unwrap();
    s.ingress.record_lesson_access("u1", "l1", 60, 100.0).unwrap();

    let enrollment = db
        .with_conn(|conn| enrollments::get_enrollment(conn, "u1", "c1"))
        .unwrap()
        .unwrap();
    assert_eq!(enrollment.progress_percentage, 100.0);
    assert_eq!(enrollment.status, "completed");
}

/// Re-locking a lesson sweeps merely-unlocked learners back to locked but
/// never retracts a completion.
#[test]
fn relock_sweep_is_monotonic_for_completions() {
    let (db, s) = engine();

    s.catalog.create_course(course_input("c1")).unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            min_time_spent: 100,
            ..lesson_input("l1", "ch1", 1)
        })
        .unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            is_locked: false,
            unlock_after_lesson_id: Some("l1".into()),
            ..lesson_input("l2", "ch1", 2)
        })
        .unwrap();

    s.ingress.enrollment_created("ua", "c1").unwrap();
    s.ingress.enrollment_created("ub", "c1").unwrap();

    // Learner A completes l2 while it is open to everyone
    s.ingress.record_lesson_access("ua", "l2", 30, 100.0).unwrap();
    assert_eq!(
        s.ingress.get_lesson_accessibility("ua", "l2").unwrap().state,
        AccessState::Completed
    );
    // Learner B merely has it unlocked
    assert_eq!(
        s.ingress.get_lesson_accessibility("ub", "l2").unwrap().state,
        AccessState::Unlocked
    );

    // Authoring re-locks l2 behind its unlock-after pointer
    let (_, change) = s.catalog.set_lesson_locked("l2", true).unwrap();
    assert!(change.sweep_required);

    let mut sweep = s.unlock.relock_sweep("c1", 10);
    let outcome = sweep.run().unwrap();
    assert!(outcome.completed);
    assert_eq!(outcome.learners_evaluated, 2);

    // A keeps the completion; B is re-locked and the flag was cleared
    assert_eq!(
        s.ingress.get_lesson_accessibility("ua", "l2").unwrap().state,
        AccessState::Completed
    );
    assert_eq!(
        s.ingress.get_lesson_accessibility("ub", "l2").unwrap().state,
        AccessState::Locked
    );
    let row = db
        .with_conn(|conn| progress::get_progress(conn, "ub", "l2"))
        .unwrap()
        .unwrap();
    assert!(!row.is_unlocked);
}

/// A cancelled sweep stops between batches and resumes from its cursor
/// without redoing or losing work.
#[test]
fn relock_sweep_is_cancellable_and_resumable() {
    let (db, s) = engine();

    s.catalog.create_course(course_input("c1")).unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            is_locked: false,
            ..lesson_input("l1", "ch1", 1)
        })
        .unwrap();

    for user in ["u1", "u2", "u3", "u4", "u5"] {
        s.ingress.enrollment_created(user, "c1").unwrap();
    }

    s.catalog.set_lesson_locked("l1", true).unwrap();

    // Cancel before the first batch runs
    let mut sweep = s.unlock.relock_sweep("c1", 2);
    sweep.cancel_handle().store(true, std::sync::atomic::Ordering::Relaxed);
    let outcome = sweep.run().unwrap();
    assert!(!outcome.completed);
    assert_eq!(outcome.learners_evaluated, 0);

    // Resume picks up where the cancelled run stopped
    let mut resumed = unlock_engine::RelockSweep::resume(
        db.clone(),
        s.events.clone(),
        "c1",
        2,
        outcome.cursor.clone(),
    );
    let outcome = resumed.run().unwrap();
    assert!(outcome.completed);
    assert_eq!(outcome.learners_evaluated, 5);
}

/// Sequential access gates lessons by order even without explicit edges,
/// and chapter order gates across chapters.
#[test]
fn sequential_access_gates_by_order() {
    let (_db, s) = engine();

    s.catalog
        .create_course(CreateCourseInput {
            enforce_sequential_access: true,
            ..course_input("c1")
        })
        .unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog
        .create_chapter(CreateChapterInput {
            is_locked: true,
            ..chapter_input("ch2", "c1", 2)
        })
        .unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            is_locked: false,
            ..lesson_input("l1", "ch1", 1)
        })
        .unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            is_locked: false,
            ..lesson_input("l2", "ch1", 2)
        })
        .unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            is_locked: false,
            ..lesson_input("l3", "ch2", 1)
        })
        .unwrap();

    s.ingress.enrollment_created("u1", "c1").unwrap();

    // l2 waits on l1 by order alone; l3 waits on chapter 1 completing
    assert_eq!(
        s.ingress.get_lesson_accessibility("u1", "l2").unwrap().state,
        AccessState::Locked
    );
    assert_eq!(
        s.ingress.get_lesson_accessibility("u1", "l3").unwrap().state,
        AccessState::Locked
    );

    s.ingress.record_lesson_access("u1", "l1", 30, 100.0).unwrap();
    assert_eq!(
        s.ingress.get_lesson_accessibility("u1", "l2").unwrap().state,
        AccessState::Unlocked
    );

    s.ingress.record_lesson_access("u1", "l2", 30, 100.0).unwrap();
    assert_eq!(
        s.ingress.get_lesson_accessibility("u1", "l3").unwrap().state,
        AccessState::Unlocked
    );
}

/// Preview courses surface locked lessons as read-only previews without
/// ever writing the ledger, and access attempts stay rejected.
#[test]
fn preview_never_touches_the_ledger() {
    let (db, s) = engine();

    s.catalog
        .create_course(CreateCourseInput {
            allow_lesson_preview: true,
            ..course_input("c1")
        })
        .unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            min_time_spent: 100,
            ..lesson_input("l1", "ch1", 1)
        })
        .unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            unlock_after_lesson_id: Some("l1".into()),
            ..lesson_input("l2", "ch1", 2)
        })
        .unwrap();

    s.ingress.enrollment_created("u1", "c1").unwrap();

    let access = s.ingress.get_lesson_accessibility("u1", "l2").unwrap();
    assert_eq!(access.state, AccessState::Preview);
    assert!(access.reason.is_some());

    let err = s.ingress.record_lesson_access("u1", "l2", 10, 10.0).unwrap_err();
    assert!(matches!(err, EngineError::RequirementsNotMet(_)));

    let row = db
        .with_conn(|conn| progress::get_progress(conn, "u1", "l2"))
        .unwrap();
    assert!(row.map(|r| !r.is_unlocked).unwrap_or(true));
}

/// A cross-chapter score prerequisite opens once the best attempt on the
/// predecessor's quiz reaches the required score.
#[test]
fn cross_chapter_score_prerequisite() {
    let (_db, s) = engine();

    s.catalog.create_course(course_input("c1")).unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog.create_chapter(chapter_input("ch2", "c1", 2)).unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            min_completion_percentage: 0.0,
            ..lesson_input("l1", "ch1", 1)
        })
        .unwrap();
    s.catalog.create_lesson(lesson_input("l2", "ch2", 1)).unwrap();
    s.catalog.create_quiz(quiz_input("q1", "l1")).unwrap();
    s.catalog
        .add_prerequisite(CreatePrerequisiteInput {
            lesson_id: "l2".into(),
            prerequisite_lesson_id: "l1".into(),
            prerequisite_type: "score".into(),
            required_score: Some(80.0),
            required_time: None,
        })
        .unwrap();

    s.ingress.enrollment_created("u1", "c1").unwrap();

    s.ingress.record_quiz_attempt("u1", "q1", attempt(75.0)).unwrap();
    let access = s.ingress.get_lesson_accessibility("u1", "l2").unwrap();
    assert_eq!(access.state, AccessState::Locked);
    assert!(access.reason.as_deref().unwrap().contains("80"));

    s.ingress.record_quiz_attempt("u1", "q1", attempt(85.0)).unwrap();
    assert_eq!(
        s.ingress.get_lesson_accessibility("u1", "l2").unwrap().state,
        AccessState::Unlocked
    );
}

/// Completing the unlock-after chapter's mandatory lessons opens the
/// dependent chapter, and the cascade emits the chapter completion.
#[test]
fn chapter_unlock_after_cascades() {
    let (_db, s) = engine();

    s.catalog.create_course(course_input("c1")).unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog
        .create_chapter(CreateChapterInput {
            is_locked: true,
            unlock_after_chapter_id: Some("ch1".into()),
            ..chapter_input("ch2", "c1", 2)
        })
        .unwrap();
    s.catalog.create_lesson(lesson_input("l1", "ch1", 1)).unwrap();
    s.catalog.create_lesson(lesson_input("l2", "ch2", 1)).unwrap();

    s.ingress.enrollment_created("u1", "c1").unwrap();

    let mut receiver = s.events.subscribe();

    assert_eq!(
        s.ingress.get_lesson_accessibility("u1", "l2").unwrap().state,
        AccessState::Locked
    );

    s.ingress.record_lesson_access("u1", "l1", 30, 100.0).unwrap();
    assert_eq!(
        s.ingress.get_lesson_accessibility("u1", "l2").unwrap().state,
        AccessState::Unlocked
    );

    let mut saw_chapter_completed = false;
    let mut saw_lesson_unlocked = false;
    while let Ok(event) = receiver.try_recv() {
        match event {
            EngineEvent::ChapterCompleted { chapter_id, .. } if chapter_id == "ch1" => {
                saw_chapter_completed = true;
            }
            EngineEvent::LessonUnlocked { lesson_id, .. } if lesson_id == "l2" => {
                saw_lesson_unlocked = true;
            }
            _ => {}
        }
    }
    assert!(saw_chapter_completed);
    assert!(saw_lesson_unlocked);
}

/// Evidence gathered while a lesson is still locked (an early quiz pass)
/// completes the lesson the moment the unlock cascade reaches it.
#[test]
fn early_quiz_pass_completes_on_unlock() {
    let (db, s) = engine();

    s.catalog.create_course(course_input("c1")).unwrap();
    s.catalog.create_chapter(chapter_input("ch1", "c1", 1)).unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            min_time_spent: 50,
            min_completion_percentage: 0.0,
            ..lesson_input("l1", "ch1", 1)
        })
        .unwrap();
    s.catalog
        .create_lesson(CreateLessonInput {
            unlock_after_lesson_id: Some("l1".into()),
            min_completion_percentage: 0.0,
            requires_quiz_pass: true,
            min_quiz_score: Some(70.0),
            ..lesson_input("l2", "ch1", 2)
        })
        .unwrap();
    s.catalog.create_quiz(quiz_input("q2", "l2")).unwrap();

    s.ingress.enrollment_created("u1", "c1").unwrap();

    // Quiz passed while l2 is still locked: flags accrue, completion waits
    s.ingress.record_quiz_attempt("u1", "q2", attempt(95.0)).unwrap();
    let row = db
        .with_conn(|conn| progress::get_progress(conn, "u1", "l2"))
        .unwrap()
        .unwrap();
    assert!(row.meets_quiz_requirement);
    assert!(!row.is_completed);
    assert!(!row.is_unlocked);

    // Completing l1 unlocks l2, and the cascade finishes it immediately
    s.ingress.record_lesson_access("u1", "l1", 60, 100.0).unwrap();
    let row = db
        .with_conn(|conn| progress::get_progress(conn, "u1", "l2"))
        .unwrap()
        .unwrap();
    assert!(row.is_unlocked);
    assert!(row.is_completed);

    let rollup = s.ingress.get_course_progress("u1", "c1").unwrap();
    assert_eq!(rollup.percentage, 100.0);
}

/// Unknown lessons, quizzes and courses propagate `NotFound` instead of
/// default-creating state.
#[test]
fn missing_references_propagate_not_found() {
    let (_db, s) = engine();

    assert!(matches!(
        s.ingress.get_lesson_accessibility("u1", "ghost"),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        s.ingress.record_lesson_access("u1", "ghost", 10, 10.0),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        s.ingress.record_quiz_attempt("u1", "ghost", attempt(50.0)),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        s.ingress.get_course_progress("u1", "ghost"),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        s.ingress.enrollment_created("u1", "ghost"),
        Err(EngineError::NotFound(_))
    ));
}
