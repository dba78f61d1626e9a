//! Course content unlock & progress engine
//!
//! Decides, for every (learner, lesson) pair, whether content is
//! accessible, whether it counts as completed, and how completions roll
//! up into chapter- and course-level progress. The surrounding platform
//! (authoring forms, enrollment purchase, rendering, chat) stays outside;
//! events cross the boundary through [`services::EventIngress`] and
//! results flow back through the same narrow surface plus the event bus.
//!
//! ## Architecture
//!
//! ```text
//! External events (lesson access, quiz submission, authoring edits)
//!     ↓
//! Event Ingress ── record raw fact ──► Progress Store (user_progress)
//!     ↓
//! Completion Aggregator ── recompute flags, completions, rollups
//!     ↓
//! Unlock Evaluator ── recompute downstream accessibility
//!     ↓
//! Callers (UI, notification/achievement hooks via the event bus)
//! ```
//!
//! ## Core rules
//!
//! - Per (learner, lesson) the state machine is `Locked -> Unlocked ->
//!   Completed` and monotonic; completion is never retracted
//! - Unlock-after pointers and explicit prerequisite edges are unified
//!   behind one predecessor abstraction and kept acyclic by authoring
//!   validation ([`graph::CourseGraph::validate`])
//! - The course percentage cached on an enrollment is always
//!   recomputable as a pure function of the ledger

pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod services;

// Re-exports
pub use config::Config;
pub use db::CourseDb;
pub use error::EngineError;
pub use graph::{CourseGraph, EdgeOrigin, Predecessor, PrerequisiteKind};
pub use services::{
    AccessState, CatalogService, CompletionAggregator, CourseProgress, EngineEvent, EventBus,
    EventIngress, LessonAccess, QuizGate, RelockSweep, Services, SweepOutcome, UnlockEvaluator,
};
