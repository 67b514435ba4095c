//! Notification dispatcher
//!
//! Notifications are a side effect of discussion activity, delivered
//! at-least-once and best-effort. Callers must not roll back the triggering
//! write when dispatch fails.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::models::{current_timestamp, fields, Discussion, Notification, NotificationKind, Reply};
use crate::db::{self, RecordQuery, RecordStore};
use crate::error::EngineError;

use super::events::{EngineEvent, EventBus};

/// Outcome of marking a recipient's notifications read
#[derive(Debug, Clone, Default, Serialize)]
pub struct MarkAllReadResult {
    pub updated: u64,
    pub errors: Vec<String>,
}

/// Notification service
pub struct NotificationService {
    store: Arc<dyn RecordStore>,
    events: Arc<EventBus>,
    config: Arc<EngineConfig>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn RecordStore>, events: Arc<EventBus>, config: Arc<EngineConfig>) -> Self {
        Self { store, events, config }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Notify the discussion author about a new reply.
    ///
    /// Exactly one notification per reply; the parent reply's author is not
    /// notified separately.
    pub fn on_reply_created(
        &self,
        discussion: &Discussion,
        reply: &Reply,
        is_instructor: bool,
    ) -> Result<Notification, EngineError> {
        let kind = if is_instructor {
            NotificationKind::InstructorResponse
        } else {
            NotificationKind::NewReply
        };

        self.dispatch(&discussion.author_id, &discussion.id, Some(&reply.id), kind)
    }

    /// Notify a content author about an upvote, when enabled in config
    pub fn on_upvoted(
        &self,
        author_id: &str,
        discussion_id: &str,
        reply_id: Option<&str>,
    ) -> Result<Option<Notification>, EngineError> {
        if !self.config.notify_on_upvote {
            return Ok(None);
        }
        self.dispatch(author_id, discussion_id, reply_id, NotificationKind::Upvote)
            .map(Some)
    }

    fn dispatch(
        &self,
        recipient_id: &str,
        discussion_id: &str,
        reply_id: Option<&str>,
        kind: NotificationKind,
    ) -> Result<Notification, EngineError> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            recipient_id: recipient_id.to_string(),
            discussion_id: discussion_id.to_string(),
            reply_id: reply_id.map(str::to_string),
            kind,
            is_read: false,
            created_at: current_timestamp(),
        };
        let created = db::insert(self.store.as_ref(), &notification)?;

        debug!(recipient = %recipient_id, kind = ?kind, "Notification dispatched");
        self.events.emit(EngineEvent::NotificationCreated {
            id: created.id.clone(),
            recipient_id: created.recipient_id.clone(),
            kind,
        });

        Ok(created)
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, id: &str) -> Result<Notification, EngineError> {
        db::fetch(self.store.as_ref(), id)
    }

    /// Newest first
    pub fn list_for(
        &self,
        recipient_id: &str,
        unread_only: bool,
        limit: usize,
    ) -> Result<Vec<Notification>, EngineError> {
        let mut query = RecordQuery::new()
            .filter(fields::RECIPIENT_ID, recipient_id)
            .sort_desc(fields::CREATED_AT)
            .limit(limit);
        if unread_only {
            query = query.filter(fields::IS_READ, false);
        }
        db::find(self.store.as_ref(), &query)
    }

    pub fn unread_count(&self, recipient_id: &str) -> Result<usize, EngineError> {
        Ok(self.unread(recipient_id)?.len())
    }

    fn unread(&self, recipient_id: &str) -> Result<Vec<Notification>, EngineError> {
        db::find(
            self.store.as_ref(),
            &RecordQuery::new()
                .filter(fields::RECIPIENT_ID, recipient_id)
                .filter(fields::IS_READ, false),
        )
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Flip is_read to true. Idempotent.
    pub fn mark_read(&self, id: &str) -> Result<Notification, EngineError> {
        let notification = self.get(id)?;
        if notification.is_read {
            return Ok(notification);
        }
        db::patch(self.store.as_ref(), id, json!({ "is_read": true }))
    }

    /// Mark every currently-unread notification of a recipient read.
    ///
    /// Each row is updated independently; failures are collected and the
    /// rest still proceed. Safe to retry.
    pub fn mark_all_read(&self, recipient_id: &str) -> Result<MarkAllReadResult, EngineError> {
        let mut result = MarkAllReadResult::default();

        for notification in self.unread(recipient_id)? {
            match db::patch::<Notification, _>(
                self.store.as_ref(),
                &notification.id,
                json!({ "is_read": true }),
            ) {
                Ok(_) => result.updated += 1,
                // Deleted meanwhile: nothing left to mark
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(id = %notification.id, error = %e, "Failed to mark notification read");
                    result.errors.push(format!("{}: {}", notification.id, e));
                }
            }
        }

        Ok(result)
    }
}
