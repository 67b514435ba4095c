//! Event system for engine operations
//!
//! Provides an event bus for notifying listeners about progress and
//! discussion activity. Useful for:
//! - Audit logging
//! - Real-time notification push
//! - Cache invalidation in the course player

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::db::models::{EnrollmentStatus, NotificationKind, VoteTarget};

/// Events emitted by services after a write has been persisted
#[derive(Debug, Clone)]
pub enum EngineEvent {
    // Progress events
    LessonCompleted {
        learner_id: String,
        lesson_id: String,
    },
    EnrollmentCreated {
        learner_id: String,
        course_id: String,
    },
    ProgressRecomputed {
        learner_id: String,
        course_id: String,
        percentage: u8,
        status: EnrollmentStatus,
    },
    CourseCompleted {
        learner_id: String,
        course_id: String,
    },

    // Discussion events
    DiscussionCreated {
        id: String,
        course_id: String,
        author_id: String,
    },
    DiscussionUpdated {
        id: String,
    },
    DiscussionDeleted {
        id: String,
    },
    ReplyCreated {
        id: String,
        discussion_id: String,
        author_id: String,
    },
    ReplyDeleted {
        id: String,
    },
    UpvoteToggled {
        target_kind: VoteTarget,
        target_id: String,
        voter_id: String,
        upvoted: bool,
        count: u32,
    },

    // Notification events
    NotificationCreated {
        id: String,
        recipient_id: String,
        kind: NotificationKind,
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
        // No subscribers is fine
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
            EngineEvent::CourseCompleted { learner_id, course_id } => {
                info!(learner = %learner_id, course = %course_id, "Course completed");
            }
            EngineEvent::ProgressRecomputed {
                learner_id,
                course_id,
                percentage,
                ..
            } => {
                debug!(learner = %learner_id, course = %course_id, percentage, "Progress recomputed");
            }
            EngineEvent::DiscussionCreated { id, course_id, author_id } => {
                debug!(id = %id, course = %course_id, author = %author_id, "Discussion created");
            }
            EngineEvent::ReplyCreated { id, discussion_id, .. } => {
                debug!(id = %id, discussion = %discussion_id, "Reply created");
            }
            EngineEvent::NotificationCreated { recipient_id, kind, .. } => {
                debug!(recipient = %recipient_id, kind = ?kind, "Notification created");
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

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(EngineEvent::LessonCompleted {
            learner_id: "u1".into(),
            lesson_id: "l1".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            EngineEvent::LessonCompleted { learner_id, lesson_id } => {
                assert_eq!(learner_id, "u1");
                assert_eq!(lesson_id, "l1");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(EngineEvent::DiscussionDeleted { id: "d1".into() });
    }
}
