//! Event system for engine operations
//!
//! Provides an event bus for notifying listeners about progress changes.
//! Useful for:
//! - Notification and achievement hooks
//! - Audit logging
//! - Cache invalidation in the presentation layer

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Events emitted by engine services
#[derive(Debug, Clone)]
pub enum EngineEvent {
    // Progress events
    LessonAccessed {
        user_id: String,
        lesson_id: String,
        time_spent: i64,
        progress_percentage: f64,
    },
    LessonUnlocked {
        user_id: String,
        lesson_id: String,
    },
    LessonCompleted {
        user_id: String,
        lesson_id: String,
        course_id: String,
    },
    ChapterCompleted {
        user_id: String,
        chapter_id: String,
        course_id: String,
    },
    CourseProgressUpdated {
        user_id: String,
        course_id: String,
        percentage: f64,
    },
    CourseCompleted {
        user_id: String,
        course_id: String,
    },

    // Quiz events
    QuizAttemptRecorded {
        user_id: String,
        quiz_id: String,
        attempt_number: u32,
        is_passed: bool,
    },

    // Enrollment events
    EnrollmentCreated {
        user_id: String,
        course_id: String,
    },
    EnrollmentCancelled {
        user_id: String,
        course_id: String,
    },

    // Authoring events
    CatalogChanged {
        course_id: String,
    },
    RelockSweepFinished {
        course_id: String,
        learners_evaluated: usize,
        completed: bool,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &EngineEvent);
}

/// Event bus for broadcasting engine events
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: EngineEvent) {
        trace!(event = ?event, "Emitting engine event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::LessonUnlocked { user_id, lesson_id } => {
                debug!(user = %user_id, lesson = %lesson_id, "Lesson unlocked");
            }
            EngineEvent::LessonCompleted { user_id, lesson_id, course_id } => {
                debug!(user = %user_id, lesson = %lesson_id, course = %course_id, "Lesson completed");
            }
            EngineEvent::ChapterCompleted { user_id, chapter_id, .. } => {
                debug!(user = %user_id, chapter = %chapter_id, "Chapter completed");
            }
            EngineEvent::CourseProgressUpdated { user_id, course_id, percentage } => {
                debug!(user = %user_id, course = %course_id, percentage = %percentage, "Course progress updated");
            }
            EngineEvent::QuizAttemptRecorded { user_id, quiz_id, attempt_number, is_passed } => {
                debug!(
                    user = %user_id,
                    quiz = %quiz_id,
                    attempt = %attempt_number,
                    passed = %is_passed,
                    "Quiz attempt recorded"
                );
            }
            _ => {
                trace!(event = ?event, "Engine event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}
