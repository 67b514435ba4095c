//! Vote toggle shared by discussions and replies
//!
//! An Upvote row's existence is the vote; `upvote_count` on the target is a
//! denormalized cache kept in step on every toggle. The row write and the
//! counter write are two separate store operations. Under concurrent voters
//! the counter is last-write-wins and may drift; `reconcile_count` rewrites
//! it from the rows.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::models::{current_timestamp, fields, Discussion, Reply, Upvote, VoteTarget};
use crate::db::{self, RecordQuery, RecordStore};
use crate::error::EngineError;

use super::events::{EngineEvent, EventBus};
use super::notification_service::NotificationService;

/// Result of a toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    pub now_upvoted: bool,
    pub new_count: u32,
}

/// What the toggle needs to know about its target
struct TargetInfo {
    upvote_count: u32,
    author_id: String,
    discussion_id: String,
}

/// Vote service
pub struct VoteService {
    store: Arc<dyn RecordStore>,
    events: Arc<EventBus>,
    notifications: Arc<NotificationService>,
}

impl VoteService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        events: Arc<EventBus>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            store,
            events,
            notifications,
        }
    }

    fn load_target(&self, target: VoteTarget, target_id: &str) -> Result<TargetInfo, EngineError> {
        match target {
            VoteTarget::Discussion => {
                let d: Discussion = db::fetch(self.store.as_ref(), target_id)?;
                Ok(TargetInfo {
                    upvote_count: d.upvote_count,
                    author_id: d.author_id,
                    discussion_id: d.id,
                })
            }
            VoteTarget::Reply => {
                let r: Reply = db::fetch(self.store.as_ref(), target_id)?;
                Ok(TargetInfo {
                    upvote_count: r.upvote_count,
                    author_id: r.author_id,
                    discussion_id: r.discussion_id,
                })
            }
        }
    }

    fn write_count(&self, target: VoteTarget, target_id: &str, count: u32) -> Result<(), EngineError> {
        let changes = json!({ "upvote_count": count });
        match target {
            VoteTarget::Discussion => {
                db::patch::<Discussion, _>(self.store.as_ref(), target_id, changes)?;
            }
            VoteTarget::Reply => {
                db::patch::<Reply, _>(self.store.as_ref(), target_id, changes)?;
            }
        }
        Ok(())
    }

    fn votes_query(target: VoteTarget, target_id: &str) -> RecordQuery {
        RecordQuery::new()
            .filter(fields::TARGET_KIND, target.as_str())
            .filter(fields::TARGET_ID, target_id)
    }

    /// The voter's upvote on a target, if any
    pub fn find_vote(
        &self,
        voter_id: &str,
        target: VoteTarget,
        target_id: &str,
    ) -> Result<Option<Upvote>, EngineError> {
        db::find_first(
            self.store.as_ref(),
            Self::votes_query(target, target_id).filter(fields::VOTER_ID, voter_id),
        )
    }

    pub fn has_upvoted(
        &self,
        voter_id: &str,
        target: VoteTarget,
        target_id: &str,
    ) -> Result<bool, EngineError> {
        Ok(self.find_vote(voter_id, target, target_id)?.is_some())
    }

    /// Number of Upvote rows for a target
    pub fn count_votes(&self, target: VoteTarget, target_id: &str) -> Result<u32, EngineError> {
        let votes: Vec<Upvote> = db::find(self.store.as_ref(), &Self::votes_query(target, target_id))?;
        Ok(votes.len() as u32)
    }

    /// Add the voter's upvote if absent, remove it if present.
    ///
    /// `NotFound` if the target no longer exists; nothing is written then.
    pub fn toggle_upvote(
        &self,
        voter_id: &str,
        target: VoteTarget,
        target_id: &str,
    ) -> Result<VoteOutcome, EngineError> {
        let current = self.load_target(target, target_id)?;

        let outcome = match self.find_vote(voter_id, target, target_id)? {
            Some(vote) => {
                db::remove::<Upvote, _>(self.store.as_ref(), &vote.id)?;
                let new_count = current.upvote_count.saturating_sub(1);
                self.write_count(target, target_id, new_count)?;
                VoteOutcome {
                    now_upvoted: false,
                    new_count,
                }
            }
            None => {
                let vote = Upvote {
                    id: Uuid::new_v4().to_string(),
                    target_kind: target,
                    target_id: target_id.to_string(),
                    voter_id: voter_id.to_string(),
                    created_at: current_timestamp(),
                };
                db::insert(self.store.as_ref(), &vote)?;
                let new_count = current.upvote_count.saturating_add(1);
                self.write_count(target, target_id, new_count)?;
                VoteOutcome {
                    now_upvoted: true,
                    new_count,
                }
            }
        };

        debug!(
            voter = %voter_id,
            target = target.as_str(),
            target_id = %target_id,
            upvoted = outcome.now_upvoted,
            count = outcome.new_count,
            "Upvote toggled"
        );
        self.events.emit(EngineEvent::UpvoteToggled {
            target_kind: target,
            target_id: target_id.to_string(),
            voter_id: voter_id.to_string(),
            upvoted: outcome.now_upvoted,
            count: outcome.new_count,
        });

        if outcome.now_upvoted && current.author_id != voter_id {
            let reply_id = match target {
                VoteTarget::Reply => Some(target_id),
                VoteTarget::Discussion => None,
            };
            if let Err(e) = self
                .notifications
                .on_upvoted(&current.author_id, &current.discussion_id, reply_id)
            {
                warn!(target_id = %target_id, error = %e, "Upvote notification failed");
            }
        }

        Ok(outcome)
    }

    /// Rewrite the denormalized counter from the Upvote rows
    pub fn reconcile_count(&self, target: VoteTarget, target_id: &str) -> Result<u32, EngineError> {
        let current = self.load_target(target, target_id)?;
        let actual = self.count_votes(target, target_id)?;

        if actual != current.upvote_count {
            info!(
                target = target.as_str(),
                target_id = %target_id,
                cached = current.upvote_count,
                actual,
                "Repairing drifted upvote count"
            );
            self.write_count(target, target_id, actual)?;
        }

        Ok(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::db::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, VoteService) {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(EventBus::new());
        let notifications = Arc::new(NotificationService::new(
            store.clone(),
            events.clone(),
            Arc::new(EngineConfig::default()),
        ));
        let votes = VoteService::new(store.clone(), events, notifications);
        (store, votes)
    }

    fn seed_reply(store: &MemoryStore, id: &str, count: u32) {
        let reply = Reply {
            id: id.into(),
            discussion_id: "d1".into(),
            parent_reply_id: None,
            author_id: "alice".into(),
            body: "Answer".into(),
            upvote_count: count,
            is_instructor_response: false,
            created_at: current_timestamp(),
            updated_at: current_timestamp(),
        };
        db::insert(store, &reply).unwrap();
    }

    #[test]
    fn test_toggle_keeps_rows_and_count_in_step() {
        let (store, votes) = setup();
        seed_reply(&store, "r1", 0);

        let on = votes.toggle_upvote("carol", VoteTarget::Reply, "r1").unwrap();
        assert_eq!(on, VoteOutcome { now_upvoted: true, new_count: 1 });
        assert_eq!(store.count("upvote"), 1);

        let off = votes.toggle_upvote("carol", VoteTarget::Reply, "r1").unwrap();
        assert_eq!(off, VoteOutcome { now_upvoted: false, new_count: 0 });
        assert_eq!(store.count("upvote"), 0);
    }

    #[test]
    fn test_count_never_underflows() {
        let (store, votes) = setup();
        seed_reply(&store, "r1", 0);
        db::insert(
            store.as_ref(),
            &Upvote {
                id: "v1".into(),
                target_kind: VoteTarget::Reply,
                target_id: "r1".into(),
                voter_id: "carol".into(),
                created_at: current_timestamp(),
            },
        )
        .unwrap();

        // Row exists but the cached count says 0
        let off = votes.toggle_upvote("carol", VoteTarget::Reply, "r1").unwrap();
        assert_eq!(off.new_count, 0);
        assert!(!off.now_upvoted);
    }

    #[test]
    fn test_missing_target() {
        let (store, votes) = setup();
        let err = votes.toggle_upvote("carol", VoteTarget::Reply, "gone").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.count("upvote"), 0);
    }
}
