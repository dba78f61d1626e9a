//! Prerequisite graph model
//!
//! An in-memory snapshot of one course: chapters in order, lessons in
//! order per chapter, unlock-after pointers and explicit prerequisite
//! edges. Loaded once per request so evaluation and the recompute
//! cascade never point-query the database, and so the acyclicity
//! guarantee doubles as a termination bound for the cascade walk.
//!
//! The two overlapping graph representations in the data model (the
//! single `unlock_after_*` pointer and the `lesson_prerequisites` edge
//! set) are unified behind [`CourseGraph::predecessors_of_lesson`], each
//! edge tagged with its origin for diagnostics.

use std::collections::{HashMap, HashSet, VecDeque};

use rusqlite::Connection;
use serde::Serialize;
use tracing::warn;

use crate::db::courses::{self, ChapterRow, CourseRow, LessonRow, PrerequisiteRow};
use crate::error::EngineError;

/// Kind of an explicit prerequisite edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrerequisiteKind {
    Completion,
    Score,
    Time,
}

impl PrerequisiteKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            courses::prerequisite_types::COMPLETION => Some(Self::Completion),
            courses::prerequisite_types::SCORE => Some(Self::Score),
            courses::prerequisite_types::TIME => Some(Self::Time),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completion => courses::prerequisite_types::COMPLETION,
            Self::Score => courses::prerequisite_types::SCORE,
            Self::Time => courses::prerequisite_types::TIME,
        }
    }
}

/// Where a predecessor edge came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOrigin {
    /// The lesson's single `unlock_after_lesson_id` pointer
    UnlockAfter,
    /// A row in `lesson_prerequisites`
    Prerequisite,
}

/// One unified predecessor edge for a lesson
#[derive(Debug, Clone, Serialize)]
pub struct Predecessor {
    pub lesson_id: String,
    pub origin: EdgeOrigin,
    pub kind: PrerequisiteKind,
    pub required_score: Option<f64>,
    pub required_time: Option<i64>,
}

/// Snapshot of one course's structure
pub struct CourseGraph {
    course: CourseRow,
    chapters: Vec<ChapterRow>,
    chapters_by_id: HashMap<String, usize>,
    lessons_by_chapter: HashMap<String, Vec<LessonRow>>,
    lessons_by_id: HashMap<String, LessonRow>,
    prerequisites_by_lesson: HashMap<String, Vec<PrerequisiteRow>>,
    /// Reverse edges: lesson -> lessons that depend on it (either origin)
    dependents: HashMap<String, Vec<String>>,
}

impl CourseGraph {
    /// Load the snapshot for a course
    pub fn load(conn: &Connection, course_id: &str) -> Result<Self, EngineError> {
        let course = courses::get_course(conn, course_id)?
            .ok_or_else(|| EngineError::NotFound(format!("course {}", course_id)))?;

        let chapters = courses::chapters_for_course(conn, course_id)?;
        let lessons = courses::lessons_for_course(conn, course_id)?;
        let prerequisites = courses::prerequisites_for_course(conn, course_id)?;

        Ok(Self::from_parts(course, chapters, lessons, prerequisites))
    }

    /// Build the snapshot from already-fetched rows
    pub fn from_parts(
        course: CourseRow,
        chapters: Vec<ChapterRow>,
        lessons: Vec<LessonRow>,
        prerequisites: Vec<PrerequisiteRow>,
    ) -> Self {
        let chapters_by_id = chapters
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();

        let mut lessons_by_chapter: HashMap<String, Vec<LessonRow>> = HashMap::new();
        let mut lessons_by_id = HashMap::new();
        for lesson in lessons {
            lessons_by_id.insert(lesson.id.clone(), lesson.clone());
            lessons_by_chapter
                .entry(lesson.chapter_id.clone())
                .or_default()
                .push(lesson);
        }
        for chapter_lessons in lessons_by_chapter.values_mut() {
            chapter_lessons.sort_by_key(|l| l.lesson_order);
        }

        let mut prerequisites_by_lesson: HashMap<String, Vec<PrerequisiteRow>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for edge in prerequisites {
            dependents
                .entry(edge.prerequisite_lesson_id.clone())
                .or_default()
                .push(edge.lesson_id.clone());
            prerequisites_by_lesson
                .entry(edge.lesson_id.clone())
                .or_default()
                .push(edge);
        }
        for lesson in lessons_by_id.values() {
            if let Some(after) = &lesson.unlock_after_lesson_id {
                dependents
                    .entry(after.clone())
                    .or_default()
                    .push(lesson.id.clone());
            }
        }
        for targets in dependents.values_mut() {
            targets.sort();
            targets.dedup();
        }

        Self {
            course,
            chapters,
            chapters_by_id,
            lessons_by_chapter,
            lessons_by_id,
            prerequisites_by_lesson,
            dependents,
        }
    }

    pub fn course(&self) -> &CourseRow {
        &self.course
    }

    pub fn chapters(&self) -> &[ChapterRow] {
        &self.chapters
    }

    pub fn chapter(&self, chapter_id: &str) -> Option<&ChapterRow> {
        self.chapters_by_id.get(chapter_id).map(|i| &self.chapters[*i])
    }

    pub fn lesson(&self, lesson_id: &str) -> Option<&LessonRow> {
        self.lessons_by_id.get(lesson_id)
    }

    pub fn lessons_in_chapter(&self, chapter_id: &str) -> &[LessonRow] {
        self.lessons_by_chapter
            .get(chapter_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All lessons in chapter order, then lesson order
    pub fn all_lessons(&self) -> impl Iterator<Item = &LessonRow> {
        self.chapters
            .iter()
            .flat_map(move |c| self.lessons_in_chapter(&c.id).iter())
    }

    /// Mandatory lessons across the whole course
    pub fn mandatory_lessons(&self) -> impl Iterator<Item = &LessonRow> {
        self.all_lessons().filter(|l| l.is_mandatory)
    }

    /// The lesson immediately before this one by order, same chapter
    pub fn previous_lesson(&self, lesson: &LessonRow) -> Option<&LessonRow> {
        self.lessons_in_chapter(&lesson.chapter_id)
            .iter()
            .filter(|l| l.lesson_order < lesson.lesson_order)
            .max_by_key(|l| l.lesson_order)
    }

    /// The chapter immediately before this one by order
    pub fn previous_chapter(&self, chapter: &ChapterRow) -> Option<&ChapterRow> {
        self.chapters
            .iter()
            .filter(|c| c.chapter_order < chapter.chapter_order)
            .max_by_key(|c| c.chapter_order)
    }

    /// The chapter after this one by order
    pub fn next_chapter(&self, chapter: &ChapterRow) -> Option<&ChapterRow> {
        self.chapters
            .iter()
            .filter(|c| c.chapter_order > chapter.chapter_order)
            .min_by_key(|c| c.chapter_order)
    }

    /// The lesson after this one by order, same chapter
    pub fn next_lesson(&self, lesson: &LessonRow) -> Option<&LessonRow> {
        self.lessons_in_chapter(&lesson.chapter_id)
            .iter()
            .filter(|l| l.lesson_order > lesson.lesson_order)
            .min_by_key(|l| l.lesson_order)
    }

    /// Unified predecessor list for a lesson: the unlock-after pointer (at
    /// most one) plus every explicit prerequisite edge.
    ///
    /// Edges pointing at lessons that no longer exist in the course are
    /// dropped here (fail-open) with a warning.
    pub fn predecessors_of_lesson(&self, lesson_id: &str) -> Vec<Predecessor> {
        let mut result = Vec::new();

        let Some(lesson) = self.lesson(lesson_id) else {
            return result;
        };

        if let Some(after) = &lesson.unlock_after_lesson_id {
            if self.lesson(after).is_some() {
                result.push(Predecessor {
                    lesson_id: after.clone(),
                    origin: EdgeOrigin::UnlockAfter,
                    kind: PrerequisiteKind::Completion,
                    required_score: None,
                    required_time: None,
                });
            } else {
                warn!(lesson = %lesson_id, target = %after, "unlock-after target missing, treating as satisfied");
            }
        }

        for edge in self.prerequisites_by_lesson.get(lesson_id).into_iter().flatten() {
            if self.lesson(&edge.prerequisite_lesson_id).is_none() {
                warn!(
                    lesson = %lesson_id,
                    target = %edge.prerequisite_lesson_id,
                    "prerequisite target missing, treating as satisfied"
                );
                continue;
            }
            let kind = match PrerequisiteKind::parse(&edge.prerequisite_type) {
                Some(kind) => kind,
                None => {
                    warn!(
                        lesson = %lesson_id,
                        kind = %edge.prerequisite_type,
                        "unknown prerequisite kind, treating as completion"
                    );
                    PrerequisiteKind::Completion
                }
            };
            result.push(Predecessor {
                lesson_id: edge.prerequisite_lesson_id.clone(),
                origin: EdgeOrigin::Prerequisite,
                kind,
                required_score: edge.required_score,
                required_time: edge.required_time,
            });
        }

        result
    }

    /// The unlock-after chapter for a chapter, when it exists in the course
    pub fn predecessors_of_chapter(&self, chapter_id: &str) -> Option<&ChapterRow> {
        let chapter = self.chapter(chapter_id)?;
        let after = chapter.unlock_after_chapter_id.as_deref()?;
        match self.chapter(after) {
            Some(target) => Some(target),
            None => {
                warn!(chapter = %chapter_id, target = %after, "unlock-after chapter missing, treating as satisfied");
                None
            }
        }
    }

    /// Lessons that depend on this one through either edge representation
    pub fn dependents_of_lesson(&self, lesson_id: &str) -> &[String] {
        self.dependents
            .get(lesson_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Chapters whose unlock-after pointer references this chapter
    pub fn dependent_chapters_of(&self, chapter_id: &str) -> Vec<&ChapterRow> {
        self.chapters
            .iter()
            .filter(|c| c.unlock_after_chapter_id.as_deref() == Some(chapter_id))
            .collect()
    }

    /// Validate the graph: ordering rules plus global acyclicity
    ///
    /// Must run whenever authoring edits a prerequisite or order field;
    /// rejecting the edit is the only recovery.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.validate_chapter_ordering()?;
        self.validate_lesson_ordering()?;
        self.validate_acyclic()?;
        Ok(())
    }

    fn validate_chapter_ordering(&self) -> Result<(), EngineError> {
        let mut seen_orders = HashSet::new();
        for chapter in &self.chapters {
            if !seen_orders.insert(chapter.chapter_order) {
                return Err(EngineError::InvalidOrdering(format!(
                    "chapter {} reuses order {} within course {}",
                    chapter.id, chapter.chapter_order, self.course.id
                )));
            }

            if let Some(after) = &chapter.unlock_after_chapter_id {
                // Dangling targets are handled fail-open at evaluation time
                if let Some(target) = self.chapter(after) {
                    if target.chapter_order >= chapter.chapter_order {
                        return Err(EngineError::InvalidOrdering(format!(
                            "chapter {} (order {}) cannot unlock after chapter {} (order {})",
                            chapter.id, chapter.chapter_order, target.id, target.chapter_order
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_lesson_ordering(&self) -> Result<(), EngineError> {
        for chapter in &self.chapters {
            let mut seen_orders = HashSet::new();
            for lesson in self.lessons_in_chapter(&chapter.id) {
                if !seen_orders.insert(lesson.lesson_order) {
                    return Err(EngineError::InvalidOrdering(format!(
                        "lesson {} reuses order {} within chapter {}",
                        lesson.id, lesson.lesson_order, chapter.id
                    )));
                }

                if let Some(after) = &lesson.unlock_after_lesson_id {
                    if let Some(target) = self.lesson(after) {
                        if target.chapter_id != lesson.chapter_id {
                            return Err(EngineError::InvalidOrdering(format!(
                                "lesson {} unlocks after lesson {} in a different chapter",
                                lesson.id, target.id
                            )));
                        }
                        if target.lesson_order >= lesson.lesson_order {
                            return Err(EngineError::InvalidOrdering(format!(
                                "lesson {} (order {}) cannot unlock after lesson {} (order {})",
                                lesson.id, lesson.lesson_order, target.id, target.lesson_order
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm over the union of unlock-after pointers and
    /// explicit prerequisite edges
    fn validate_acyclic(&self) -> Result<(), EngineError> {
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

        for lesson in self.lessons_by_id.values() {
            indegree.entry(lesson.id.as_str()).or_insert(0);

            for pred in self.predecessors_of_lesson(&lesson.id) {
                if pred.lesson_id == lesson.id {
                    return Err(EngineError::CycleDetected(format!(
                        "lesson {} depends on itself",
                        lesson.id
                    )));
                }
                if let Some(target) = self.lessons_by_id.get(&pred.lesson_id) {
                    adjacency.entry(target.id.as_str()).or_default().push(lesson.id.as_str());
                    *indegree.entry(lesson.id.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;

        while let Some(node) = queue.pop_front() {
            visited += 1;
            for &next in adjacency.get(node).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        if visited < indegree.len() {
            let mut stuck: Vec<&str> = indegree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(id, _)| *id)
                .collect();
            stuck.sort();
            return Err(EngineError::CycleDetected(format!(
                "prerequisite cycle involving lessons: {}",
                stuck.join(", ")
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course() -> CourseRow {
        CourseRow {
            id: "c1".into(),
            title: "Course".into(),
            enforce_sequential_access: false,
            allow_lesson_preview: false,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn chapter(id: &str, order: i32, after: Option<&str>) -> ChapterRow {
        ChapterRow {
            id: id.into(),
            course_id: "c1".into(),
            title: id.into(),
            chapter_order: order,
            is_locked: true,
            unlock_after_chapter_id: after.map(Into::into),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn lesson(id: &str, chapter_id: &str, order: i32, after: Option<&str>) -> LessonRow {
        LessonRow {
            id: id.into(),
            chapter_id: chapter_id.into(),
            title: id.into(),
            lesson_order: order,
            is_locked: true,
            is_mandatory: true,
            unlock_after_lesson_id: after.map(Into::into),
            min_completion_percentage: 100.0,
            min_time_spent: 0,
            min_quiz_score: None,
            requires_quiz_pass: false,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn prereq(lesson_id: &str, target: &str, kind: &str) -> PrerequisiteRow {
        PrerequisiteRow {
            lesson_id: lesson_id.into(),
            prerequisite_lesson_id: target.into(),
            prerequisite_type: kind.into(),
            required_score: None,
            required_time: None,
        }
    }

    #[test]
    fn valid_chain_passes() {
        let graph = CourseGraph::from_parts(
            course(),
            vec![chapter("ch1", 1, None), chapter("ch2", 2, Some("ch1"))],
            vec![
                lesson("l1", "ch1", 1, None),
                lesson("l2", "ch1", 2, Some("l1")),
                lesson("l3", "ch2", 1, None),
            ],
            vec![prereq("l3", "l1", "completion")],
        );
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn unlock_after_must_decrease_order() {
        let graph = CourseGraph::from_parts(
            course(),
            vec![chapter("ch1", 1, None)],
            vec![
                lesson("l1", "ch1", 1, Some("l2")),
                lesson("l2", "ch1", 2, None),
            ],
            vec![],
        );
        assert!(matches!(graph.validate(), Err(EngineError::InvalidOrdering(_))));
    }

    #[test]
    fn cross_chapter_unlock_after_rejected() {
        let graph = CourseGraph::from_parts(
            course(),
            vec![chapter("ch1", 1, None), chapter("ch2", 2, None)],
            vec![
                lesson("l1", "ch1", 1, None),
                lesson("l2", "ch2", 2, Some("l1")),
            ],
            vec![],
        );
        assert!(matches!(graph.validate(), Err(EngineError::InvalidOrdering(_))));
    }

    #[test]
    fn prerequisite_cycle_detected() {
        let graph = CourseGraph::from_parts(
            course(),
            vec![chapter("ch1", 1, None), chapter("ch2", 2, None)],
            vec![
                lesson("l1", "ch1", 1, None),
                lesson("l2", "ch2", 1, None),
            ],
            vec![
                prereq("l1", "l2", "completion"),
                prereq("l2", "l1", "completion"),
            ],
        );
        assert!(matches!(graph.validate(), Err(EngineError::CycleDetected(_))));
    }

    #[test]
    fn self_dependency_detected() {
        let graph = CourseGraph::from_parts(
            course(),
            vec![chapter("ch1", 1, None)],
            vec![lesson("l1", "ch1", 1, None)],
            vec![prereq("l1", "l1", "completion")],
        );
        assert!(matches!(graph.validate(), Err(EngineError::CycleDetected(_))));
    }

    #[test]
    fn duplicate_order_rejected() {
        let graph = CourseGraph::from_parts(
            course(),
            vec![chapter("ch1", 1, None)],
            vec![
                lesson("l1", "ch1", 1, None),
                lesson("l2", "ch1", 1, None),
            ],
            vec![],
        );
        assert!(matches!(graph.validate(), Err(EngineError::InvalidOrdering(_))));
    }

    #[test]
    fn dangling_edge_is_dropped_not_fatal() {
        let graph = CourseGraph::from_parts(
            course(),
            vec![chapter("ch1", 1, None)],
            vec![lesson("l1", "ch1", 1, Some("archived")), lesson("l2", "ch1", 2, None)],
            vec![prereq("l2", "gone", "completion")],
        );
        assert!(graph.validate().is_ok());
        assert!(graph.predecessors_of_lesson("l1").is_empty());
        assert!(graph.predecessors_of_lesson("l2").is_empty());
    }

    #[test]
    fn predecessors_union_both_representations() {
        let graph = CourseGraph::from_parts(
            course(),
            vec![chapter("ch1", 1, None)],
            vec![
                lesson("l1", "ch1", 1, None),
                lesson("l2", "ch1", 2, None),
                lesson("l3", "ch1", 3, Some("l2")),
            ],
            vec![PrerequisiteRow {
                lesson_id: "l3".into(),
                prerequisite_lesson_id: "l1".into(),
                prerequisite_type: "score".into(),
                required_score: Some(80.0),
                required_time: None,
            }],
        );

        let preds = graph.predecessors_of_lesson("l3");
        assert_eq!(preds.len(), 2);
        assert!(preds.iter().any(|p| p.origin == EdgeOrigin::UnlockAfter && p.lesson_id == "l2"));
        assert!(preds.iter().any(|p| {
            p.origin == EdgeOrigin::Prerequisite
                && p.lesson_id == "l1"
                && p.kind == PrerequisiteKind::Score
                && p.required_score == Some(80.0)
        }));

        assert_eq!(graph.dependents_of_lesson("l1").to_vec(), vec!["l3".to_string()]);
        assert_eq!(graph.dependents_of_lesson("l2").to_vec(), vec!["l3".to_string()]);
    }
}
