//! Service layer for lamad-engine
//!
//! Services encapsulate the engine's business logic over the record store.
//! Each service wraps store operations with:
//! - Input validation and role checks
//! - Cross-entity orchestration (progress → enrollment, reply → notification)
//! - Event emission for audit/notifications
//!
//! ## Architecture
//!
//! ```text
//! Callers (course player, discussion view)
//!     ↓
//! Service Layer (business logic)
//!     ↓
//! RecordStore (db/*.rs)
//!     ↓
//! SQLite | memory
//! ```
//!
//! Services hold no mutable state of their own; the store is the only
//! shared resource.

pub mod catalog_service;
pub mod discussion_service;
pub mod enrollment_service;
pub mod events;
pub mod notification_service;
pub mod progress_service;
pub mod thread;
pub mod vote_service;

// Re-exports
pub use catalog_service::{CatalogService, CourseOutline, ModuleOutline};
pub use discussion_service::{
    CreateDiscussionInput, CreateReplyInput, DiscussionService, ReplyOutcome, UpdateDiscussionInput,
};
pub use enrollment_service::{completion_percentage, EnrollmentService};
pub use events::{EngineEvent, EventBus, EventListener};
pub use notification_service::{MarkAllReadResult, NotificationService};
pub use progress_service::ProgressService;
pub use thread::{ThreadBuilder, ThreadNode};
pub use vote_service::{VoteOutcome, VoteService};

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::db::RecordStore;

/// Service container for dependency injection
///
/// Holds all services over one shared record store.
pub struct Services {
    pub catalog: Arc<CatalogService>,
    pub enrollments: Arc<EnrollmentService>,
    pub progress: Arc<ProgressService>,
    pub discussions: Arc<DiscussionService>,
    pub threads: Arc<ThreadBuilder>,
    pub votes: Arc<VoteService>,
    pub notifications: Arc<NotificationService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with shared store
    pub fn new(store: Arc<dyn RecordStore>, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let events = Arc::new(EventBus::with_capacity(config.event_capacity));

        let catalog = Arc::new(CatalogService::new(store.clone(), config.clone()));
        let enrollments = Arc::new(EnrollmentService::new(
            store.clone(),
            events.clone(),
            catalog.clone(),
        ));
        let progress = Arc::new(ProgressService::new(
            store.clone(),
            events.clone(),
            catalog.clone(),
            enrollments.clone(),
        ));
        let notifications = Arc::new(NotificationService::new(
            store.clone(),
            events.clone(),
            config.clone(),
        ));
        let discussions = Arc::new(DiscussionService::new(
            store.clone(),
            events.clone(),
            config.clone(),
            catalog.clone(),
            notifications.clone(),
        ));
        let threads = Arc::new(ThreadBuilder::new(store.clone(), config.clone()));
        let votes = Arc::new(VoteService::new(store, events.clone(), notifications.clone()));

        Self {
            catalog,
            enrollments,
            progress,
            discussions,
            threads,
            votes,
            notifications,
            events,
        }
    }
}
