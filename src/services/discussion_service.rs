//! Discussion service - discussions, replies and their moderation flags
//!
//! Validation and permission checks run before any write. Reply creation
//! dispatches a notification afterwards; a failed dispatch is logged and the
//! reply still stands.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::models::{
    current_timestamp, fields, Discussion, Notification, Reply, Upvote, VoteTarget,
};
use crate::db::{self, RecordQuery, RecordStore};
use crate::error::EngineError;
use crate::identity::Caller;

use super::catalog_service::CatalogService;
use super::events::{EngineEvent, EventBus};
use super::notification_service::NotificationService;

// ============================================================================
// Input Types
// ============================================================================

/// Input for creating a discussion
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDiscussionInput {
    pub course_id: String,
    #[serde(default)]
    pub lesson_id: Option<String>,
    pub title: String,
    pub body: String,
}

/// Fields an author may edit; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDiscussionInput {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Input for creating a reply
#[derive(Debug, Clone, Deserialize)]
pub struct CreateReplyInput {
    pub discussion_id: String,
    #[serde(default)]
    pub parent_reply_id: Option<String>,
    pub body: String,
}

/// A persisted reply and the notification it produced, if delivery worked
#[derive(Debug, Clone, Serialize)]
pub struct ReplyOutcome {
    pub reply: Reply,
    pub notification: Option<Notification>,
}

/// Discussion service
pub struct DiscussionService {
    store: Arc<dyn RecordStore>,
    events: Arc<EventBus>,
    config: Arc<EngineConfig>,
    catalog: Arc<CatalogService>,
    notifications: Arc<NotificationService>,
}

impl DiscussionService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        events: Arc<EventBus>,
        config: Arc<EngineConfig>,
        catalog: Arc<CatalogService>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            store,
            events,
            config,
            catalog,
            notifications,
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get_discussion(&self, id: &str) -> Result<Discussion, EngineError> {
        db::fetch(self.store.as_ref(), id)
    }

    pub fn get_reply(&self, id: &str) -> Result<Reply, EngineError> {
        db::fetch(self.store.as_ref(), id)
    }

    /// Discussions of a course (optionally one lesson): pinned first, then newest
    pub fn list_discussions(
        &self,
        course_id: &str,
        lesson_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Discussion>, EngineError> {
        let mut query = RecordQuery::new()
            .filter(fields::COURSE_ID, course_id)
            .sort_desc(fields::CREATED_AT);
        if let Some(lesson_id) = lesson_id {
            query = query.filter(fields::LESSON_ID, lesson_id);
        }

        let mut discussions: Vec<Discussion> = db::find(self.store.as_ref(), &query)?;
        // Stable: newest-first order is kept within each group
        discussions.sort_by_key(|d| !d.is_pinned);
        discussions.truncate(limit);
        Ok(discussions)
    }

    // =========================================================================
    // Discussion Writes
    // =========================================================================

    pub fn create_discussion(
        &self,
        caller: &Caller,
        input: CreateDiscussionInput,
    ) -> Result<Discussion, EngineError> {
        self.validate_title(&input.title)?;
        self.validate_body(&input.body)?;

        self.catalog.get_course(&input.course_id)?;
        if let Some(ref lesson_id) = input.lesson_id {
            let owner = self.catalog.course_for_lesson(lesson_id)?;
            if owner != input.course_id {
                return Err(EngineError::InvalidInput(format!(
                    "lesson {} does not belong to course {}",
                    lesson_id, input.course_id
                )));
            }
        }

        let now = current_timestamp();
        let discussion = Discussion {
            id: Uuid::new_v4().to_string(),
            course_id: input.course_id,
            lesson_id: input.lesson_id,
            author_id: caller.user_id.clone(),
            title: input.title.trim().to_string(),
            body: input.body,
            is_pinned: false,
            is_resolved: false,
            upvote_count: 0,
            created_at: now.clone(),
            updated_at: now,
        };
        let created = db::insert(self.store.as_ref(), &discussion)?;

        debug!(id = %created.id, author = %caller.user_id, "Discussion created");
        self.events.emit(EngineEvent::DiscussionCreated {
            id: created.id.clone(),
            course_id: created.course_id.clone(),
            author_id: created.author_id.clone(),
        });

        Ok(created)
    }

    /// Edit title and/or body. Author or instructor.
    pub fn update_discussion(
        &self,
        caller: &Caller,
        id: &str,
        input: UpdateDiscussionInput,
    ) -> Result<Discussion, EngineError> {
        let discussion = self.get_discussion(id)?;
        Self::require_moderator(caller, &discussion.author_id, "edit this discussion")?;

        let mut changes = json!({ "updated_at": current_timestamp() });
        if let Some(ref title) = input.title {
            self.validate_title(title)?;
            changes["title"] = json!(title.trim());
        }
        if let Some(ref body) = input.body {
            self.validate_body(body)?;
            changes["body"] = json!(body);
        }

        let updated = db::patch(self.store.as_ref(), id, changes)?;
        self.events.emit(EngineEvent::DiscussionUpdated { id: id.to_string() });
        Ok(updated)
    }

    /// Delete a discussion. Author or instructor.
    ///
    /// Replies and upvotes are left in place unless
    /// `cascade_discussion_delete` is enabled.
    pub fn delete_discussion(&self, caller: &Caller, id: &str) -> Result<(), EngineError> {
        let discussion = self.get_discussion(id)?;
        Self::require_moderator(caller, &discussion.author_id, "delete this discussion")?;

        if self.config.cascade_discussion_delete {
            self.delete_dependents(id)?;
        }

        db::remove::<Discussion, _>(self.store.as_ref(), id)?;

        info!(id = %id, by = %caller.user_id, "Discussion deleted");
        self.events.emit(EngineEvent::DiscussionDeleted { id: id.to_string() });
        Ok(())
    }

    /// Flip the pinned flag. Instructor only.
    pub fn toggle_pinned(&self, caller: &Caller, id: &str) -> Result<Discussion, EngineError> {
        if !caller.is_instructor {
            return Err(EngineError::Forbidden("only instructors can pin discussions".into()));
        }
        let discussion = self.get_discussion(id)?;
        self.set_flag(id, "is_pinned", !discussion.is_pinned)
    }

    /// Flip between open and resolved. Author or instructor.
    pub fn toggle_resolved(&self, caller: &Caller, id: &str) -> Result<Discussion, EngineError> {
        let discussion = self.get_discussion(id)?;
        Self::require_moderator(caller, &discussion.author_id, "resolve this discussion")?;
        self.set_flag(id, "is_resolved", !discussion.is_resolved)
    }

    fn set_flag(&self, id: &str, flag: &str, value: bool) -> Result<Discussion, EngineError> {
        let mut changes = json!({ "updated_at": current_timestamp() });
        changes[flag] = json!(value);

        let updated = db::patch(self.store.as_ref(), id, changes)?;
        debug!(id = %id, flag, value, "Discussion flag changed");
        self.events.emit(EngineEvent::DiscussionUpdated { id: id.to_string() });
        Ok(updated)
    }

    /// Remove replies of a discussion and every upvote pointing at it or them
    fn delete_dependents(&self, discussion_id: &str) -> Result<(), EngineError> {
        let replies: Vec<Reply> = db::find(
            self.store.as_ref(),
            &RecordQuery::new().filter(fields::DISCUSSION_ID, discussion_id),
        )?;

        for reply in &replies {
            self.delete_votes(VoteTarget::Reply, &reply.id)?;
            ignore_missing(db::remove::<Reply, _>(self.store.as_ref(), &reply.id))?;
        }
        self.delete_votes(VoteTarget::Discussion, discussion_id)?;

        debug!(discussion = %discussion_id, replies = replies.len(), "Cascaded discussion delete");
        Ok(())
    }

    fn delete_votes(&self, target: VoteTarget, target_id: &str) -> Result<(), EngineError> {
        let votes: Vec<Upvote> = db::find(
            self.store.as_ref(),
            &RecordQuery::new()
                .filter(fields::TARGET_KIND, target.as_str())
                .filter(fields::TARGET_ID, target_id),
        )?;
        for vote in votes {
            ignore_missing(db::remove::<Upvote, _>(self.store.as_ref(), &vote.id))?;
        }
        Ok(())
    }

    // =========================================================================
    // Reply Writes
    // =========================================================================

    /// Create a reply and notify the discussion author.
    ///
    /// The instructor-response flag comes from the caller's role. The depth
    /// cap is not enforced here; see `ThreadNode::can_reply`.
    pub fn create_reply(
        &self,
        caller: &Caller,
        input: CreateReplyInput,
    ) -> Result<ReplyOutcome, EngineError> {
        self.validate_body(&input.body)?;

        let discussion = self.get_discussion(&input.discussion_id)?;
        if let Some(ref parent_id) = input.parent_reply_id {
            let parent = self.get_reply(parent_id)?;
            if parent.discussion_id != discussion.id {
                return Err(EngineError::InvalidInput(format!(
                    "parent reply {} belongs to another discussion",
                    parent_id
                )));
            }
        }

        let now = current_timestamp();
        let reply = Reply {
            id: Uuid::new_v4().to_string(),
            discussion_id: discussion.id.clone(),
            parent_reply_id: input.parent_reply_id,
            author_id: caller.user_id.clone(),
            body: input.body,
            upvote_count: 0,
            is_instructor_response: caller.is_instructor,
            created_at: now.clone(),
            updated_at: now,
        };
        let reply = db::insert(self.store.as_ref(), &reply)?;

        self.events.emit(EngineEvent::ReplyCreated {
            id: reply.id.clone(),
            discussion_id: reply.discussion_id.clone(),
            author_id: reply.author_id.clone(),
        });

        let notification = match self
            .notifications
            .on_reply_created(&discussion, &reply, caller.is_instructor)
        {
            Ok(notification) => Some(notification),
            Err(e) => {
                warn!(reply = %reply.id, error = %e, "Reply notification failed");
                None
            }
        };

        Ok(ReplyOutcome { reply, notification })
    }

    /// Edit a reply body. Author or instructor.
    pub fn update_reply(&self, caller: &Caller, id: &str, body: &str) -> Result<Reply, EngineError> {
        self.validate_body(body)?;
        let reply = self.get_reply(id)?;
        Self::require_moderator(caller, &reply.author_id, "edit this reply")?;

        db::patch(
            self.store.as_ref(),
            id,
            json!({ "body": body, "updated_at": current_timestamp() }),
        )
    }

    /// Delete a reply. Its children become orphans and drop out of the tree.
    pub fn delete_reply(&self, caller: &Caller, id: &str) -> Result<(), EngineError> {
        let reply = self.get_reply(id)?;
        Self::require_moderator(caller, &reply.author_id, "delete this reply")?;

        db::remove::<Reply, _>(self.store.as_ref(), id)?;
        self.events.emit(EngineEvent::ReplyDeleted { id: id.to_string() });
        Ok(())
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn require_moderator(caller: &Caller, author_id: &str, action: &str) -> Result<(), EngineError> {
        if caller.can_moderate(author_id) {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "{} may not {}",
                caller.user_id, action
            )))
        }
    }

    fn validate_title(&self, title: &str) -> Result<(), EngineError> {
        if title.trim().is_empty() {
            return Err(EngineError::InvalidInput("title is required".into()));
        }
        if title.chars().count() > self.config.max_title_len {
            return Err(EngineError::InvalidInput(format!(
                "title must be <= {} characters",
                self.config.max_title_len
            )));
        }
        Ok(())
    }

    fn validate_body(&self, body: &str) -> Result<(), EngineError> {
        if body.trim().is_empty() {
            return Err(EngineError::InvalidInput("body is required".into()));
        }
        if body.chars().count() > self.config.max_body_len {
            return Err(EngineError::InvalidInput(format!(
                "body must be <= {} characters",
                self.config.max_body_len
            )));
        }
        Ok(())
    }
}

fn ignore_missing(result: Result<(), EngineError>) -> Result<(), EngineError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
