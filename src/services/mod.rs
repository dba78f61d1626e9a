//! Service layer for the unlock engine
//!
//! Services encapsulate the decision logic between event ingress and the
//! repositories. Each service wraps database operations with:
//! - Input validation
//! - Graph revalidation on authoring writes
//! - Event emission for notification/achievement hooks
//!
//! ## Architecture
//!
//! ```text
//! Event Ingress (narrow external surface)
//!     ↓
//! Unlock Evaluator / Completion Aggregator / Quiz Gate (pure decisions)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod catalog;
pub mod completion;
pub mod events;
pub mod ingress;
pub mod quiz_gate;
pub mod unlock;

// Re-exports
pub use catalog::{CatalogService, LockChange};
pub use completion::{CompletionAggregator, CourseProgress};
pub use events::{EngineEvent, EventBus, EventListener};
pub use ingress::EventIngress;
pub use quiz_gate::QuizGate;
pub use unlock::{AccessState, LessonAccess, RelockSweep, SweepOutcome, UnlockEvaluator};

use std::sync::Arc;

use crate::config::Config;
use crate::db::CourseDb;

/// Service container for dependency injection
///
/// Holds all services over one shared database and event bus.
pub struct Services {
    pub catalog: Arc<CatalogService>,
    pub quiz_gate: Arc<QuizGate>,
    pub unlock: Arc<UnlockEvaluator>,
    pub completion: Arc<CompletionAggregator>,
    pub ingress: Arc<EventIngress>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with a shared database
    pub fn new(db: Arc<CourseDb>) -> Self {
        Self::with_event_capacity(db, 1024)
    }

    /// Create all services, sizing the event bus from configuration
    pub fn with_config(db: Arc<CourseDb>, config: &Config) -> Self {
        Self::with_event_capacity(db, config.event_capacity)
    }

    fn with_event_capacity(db: Arc<CourseDb>, capacity: usize) -> Self {
        let events = Arc::new(EventBus::with_capacity(capacity));

        let unlock = Arc::new(UnlockEvaluator::new(db.clone(), events.clone()));
        let completion = Arc::new(CompletionAggregator::new(db.clone(), events.clone()));
        let ingress = Arc::new(EventIngress::new(
            db.clone(),
            events.clone(),
            unlock.clone(),
            completion.clone(),
        ));

        Self {
            catalog: Arc::new(CatalogService::new(db.clone(), events.clone())),
            quiz_gate: Arc::new(QuizGate::new(db.clone())),
            unlock,
            completion,
            ingress,
            events,
        }
    }
}
