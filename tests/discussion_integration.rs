//! Integration tests for discussions, threads, votes and notifications

use std::sync::Arc;

use serde_json::{json, Value};

use lamad_engine::db::models::{Discussion, NotificationKind, VoteTarget};
use lamad_engine::db::{self, Fields, RecordQuery};
use lamad_engine::services::{
    CreateDiscussionInput, CreateReplyInput, EngineEvent, ThreadNode, UpdateDiscussionInput,
};
use lamad_engine::{Caller, EngineConfig, EngineError, MemoryStore, RecordStore, Services, SqliteStore};

struct Fixture {
    store: Arc<dyn RecordStore>,
    services: Services,
    course_id: String,
}

fn fixture_with(config: EngineConfig) -> Fixture {
    let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    fixture_on(store, config)
}

fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

fn fixture_on(store: Arc<dyn RecordStore>, config: EngineConfig) -> Fixture {
    let services = Services::new(store.clone(), config);
    let course = services.catalog.create_course("Worship 101", None).unwrap();
    Fixture {
        store,
        services,
        course_id: course.id,
    }
}

impl Fixture {
    fn discussion(&self, author: &Caller, title: &str) -> Discussion {
        self.services
            .discussions
            .create_discussion(
                author,
                CreateDiscussionInput {
                    course_id: self.course_id.clone(),
                    lesson_id: None,
                    title: title.into(),
                    body: "What does this passage mean?".into(),
                },
            )
            .unwrap()
    }

    fn reply(&self, author: &Caller, discussion_id: &str, parent: Option<&str>) -> String {
        self.services
            .discussions
            .create_reply(
                author,
                CreateReplyInput {
                    discussion_id: discussion_id.into(),
                    parent_reply_id: parent.map(str::to_string),
                    body: "Here is my take".into(),
                },
            )
            .unwrap()
            .reply
            .id
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[test]
fn test_instructor_reply_notifies_discussion_author() {
    let fx = fixture();
    let alice = Caller::learner("alice");
    let bob = Caller::instructor("bob");

    let d1 = fx.discussion(&alice, "D1");
    let r1 = fx.reply(&alice, &d1.id, None);

    let outcome = fx
        .services
        .discussions
        .create_reply(
            &bob,
            CreateReplyInput {
                discussion_id: d1.id.clone(),
                parent_reply_id: Some(r1.clone()),
                body: "Good question".into(),
            },
        )
        .unwrap();
    assert!(outcome.reply.is_instructor_response);

    let notification = outcome.notification.unwrap();
    assert_eq!(notification.recipient_id, "alice");
    assert_eq!(notification.kind, NotificationKind::InstructorResponse);
    assert_eq!(notification.reply_id.as_deref(), Some(outcome.reply.id.as_str()));
    assert!(!notification.is_read);

    // Exactly one per reply, and nothing for the parent reply's author separately
    let for_r2: Vec<Value> = fx
        .store
        .query(
            "notification",
            &RecordQuery::new().filter("reply_id", outcome.reply.id.as_str()),
        )
        .unwrap();
    assert_eq!(for_r2.len(), 1);
    assert!(fx.services.notifications.list_for("bob", false, 10).unwrap().is_empty());

    // Self-replies are not suppressed
    let all = fx.services.notifications.list_for("alice", false, 10).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(
        all.iter().filter(|n| n.kind == NotificationKind::NewReply).count(),
        1
    );
}

#[test]
fn test_mark_all_read() {
    let fx = fixture();
    let alice = Caller::learner("alice");
    let d = fx.discussion(&alice, "Question");
    for _ in 0..3 {
        fx.reply(&Caller::learner("bob"), &d.id, None);
    }

    assert_eq!(fx.services.notifications.unread_count("alice").unwrap(), 3);
    let result = fx.services.notifications.mark_all_read("alice").unwrap();
    assert_eq!(result.updated, 3);
    assert!(result.errors.is_empty());
    assert_eq!(fx.services.notifications.unread_count("alice").unwrap(), 0);
}

/// Store whose notification writes always fail
struct NotificationOutage {
    inner: MemoryStore,
}

impl RecordStore for NotificationOutage {
    fn create(&self, kind: &str, fields: Fields) -> Result<Value, EngineError> {
        if kind == "notification" {
            return Err(EngineError::StoreUnavailable("notification table offline".into()));
        }
        self.inner.create(kind, fields)
    }

    fn get(&self, kind: &str, id: &str) -> Result<Value, EngineError> {
        self.inner.get(kind, id)
    }

    fn update(&self, kind: &str, id: &str, fields: Fields) -> Result<Value, EngineError> {
        self.inner.update(kind, id, fields)
    }

    fn delete(&self, kind: &str, id: &str) -> Result<(), EngineError> {
        self.inner.delete(kind, id)
    }

    fn query(&self, kind: &str, query: &RecordQuery) -> Result<Vec<Value>, EngineError> {
        self.inner.query(kind, query)
    }
}

#[test]
fn test_reply_survives_notification_failure() {
    let store: Arc<dyn RecordStore> = Arc::new(NotificationOutage {
        inner: MemoryStore::new(),
    });
    let fx = fixture_on(store, EngineConfig::default());
    let d = fx.discussion(&Caller::learner("alice"), "Question");

    let outcome = fx
        .services
        .discussions
        .create_reply(
            &Caller::learner("bob"),
            CreateReplyInput {
                discussion_id: d.id.clone(),
                parent_reply_id: None,
                body: "Still here".into(),
            },
        )
        .unwrap();

    assert!(outcome.notification.is_none());
    assert_eq!(fx.services.threads.replies(&d.id).unwrap().len(), 1);
}

// ============================================================================
// Threads
// ============================================================================

fn flatten(nodes: &[ThreadNode], out: &mut Vec<(String, usize, bool)>) {
    for node in nodes {
        out.push((node.reply.id.clone(), node.depth, node.can_reply));
        flatten(&node.children, out);
    }
}

#[test]
fn test_tree_depth_and_reply_gating() {
    let fx = fixture();
    let alice = Caller::learner("alice");
    let d = fx.discussion(&alice, "Nested");

    let a = fx.reply(&alice, &d.id, None);
    let b = fx.reply(&alice, &d.id, Some(&a));
    let c = fx.reply(&alice, &d.id, Some(&b));
    let sibling = fx.reply(&alice, &d.id, None);

    let tree = fx.services.threads.build_tree(&d.id).unwrap();
    assert_eq!(tree.len(), 2);
    assert_eq!(tree[0].reply_count(), 3);

    let mut flat = Vec::new();
    flatten(&tree, &mut flat);
    assert_eq!(
        flat,
        vec![
            (a, 0, true),
            (b, 1, true),
            (c, 2, false),
            (sibling, 0, true),
        ]
    );
}

#[test]
fn test_deleted_parent_drops_subtree() {
    let fx = fixture();
    let alice = Caller::learner("alice");
    let d = fx.discussion(&alice, "Orphans");

    let a = fx.reply(&alice, &d.id, None);
    let b = fx.reply(&alice, &d.id, Some(&a));
    fx.reply(&alice, &d.id, Some(&b));

    fx.services.discussions.delete_reply(&alice, &a).unwrap();

    assert!(fx.services.threads.build_tree(&d.id).unwrap().is_empty());
    // Rows are kept, only the view drops them
    assert_eq!(fx.services.threads.replies(&d.id).unwrap().len(), 2);
}

#[test]
fn test_parent_from_other_discussion_rejected() {
    let fx = fixture();
    let alice = Caller::learner("alice");
    let first = fx.discussion(&alice, "First");
    let second = fx.discussion(&alice, "Second");
    let foreign = fx.reply(&alice, &first.id, None);

    let err = fx
        .services
        .discussions
        .create_reply(
            &alice,
            CreateReplyInput {
                discussion_id: second.id,
                parent_reply_id: Some(foreign),
                body: "Wrong place".into(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

// ============================================================================
// Votes
// ============================================================================

#[test]
fn test_toggle_upvote_symmetry() {
    let fx = fixture();
    let d1 = fx.discussion(&Caller::learner("alice"), "D1");
    db::patch::<Discussion, _>(fx.store.as_ref(), &d1.id, json!({ "upvote_count": 4 })).unwrap();

    let on = fx.services.votes.toggle_upvote("carol", VoteTarget::Discussion, &d1.id).unwrap();
    assert!(on.now_upvoted);
    assert_eq!(on.new_count, 5);
    assert!(fx.services.votes.has_upvoted("carol", VoteTarget::Discussion, &d1.id).unwrap());

    let off = fx.services.votes.toggle_upvote("carol", VoteTarget::Discussion, &d1.id).unwrap();
    assert!(!off.now_upvoted);
    assert_eq!(off.new_count, 4);
    assert!(!fx.services.votes.has_upvoted("carol", VoteTarget::Discussion, &d1.id).unwrap());

    assert_eq!(fx.services.discussions.get_discussion(&d1.id).unwrap().upvote_count, 4);
}

#[test]
fn test_reply_votes_are_independent() {
    let fx = fixture();
    let alice = Caller::learner("alice");
    let d = fx.discussion(&alice, "Votes");
    let r = fx.reply(&alice, &d.id, None);

    fx.services.votes.toggle_upvote("carol", VoteTarget::Reply, &r).unwrap();
    let second = fx.services.votes.toggle_upvote("dave", VoteTarget::Reply, &r).unwrap();
    assert_eq!(second.new_count, 2);

    assert_eq!(fx.services.discussions.get_reply(&r).unwrap().upvote_count, 2);
    assert_eq!(fx.services.discussions.get_discussion(&d.id).unwrap().upvote_count, 0);
}

#[test]
fn test_vote_on_deleted_target_writes_nothing() {
    let fx = fixture();
    let alice = Caller::learner("alice");
    let d = fx.discussion(&alice, "Gone soon");
    fx.services.discussions.delete_discussion(&alice, &d.id).unwrap();

    let err = fx
        .services
        .votes
        .toggle_upvote("carol", VoteTarget::Discussion, &d.id)
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(fx.store.query("upvote", &RecordQuery::new()).unwrap().is_empty());
}

#[test]
fn test_reconcile_repairs_drift() {
    let fx = fixture();
    let d = fx.discussion(&Caller::learner("alice"), "Drift");
    fx.services.votes.toggle_upvote("carol", VoteTarget::Discussion, &d.id).unwrap();
    fx.services.votes.toggle_upvote("dave", VoteTarget::Discussion, &d.id).unwrap();
    db::patch::<Discussion, _>(fx.store.as_ref(), &d.id, json!({ "upvote_count": 9 })).unwrap();

    let count = fx.services.votes.reconcile_count(VoteTarget::Discussion, &d.id).unwrap();
    assert_eq!(count, 2);
    assert_eq!(fx.services.discussions.get_discussion(&d.id).unwrap().upvote_count, 2);
}

#[test]
fn test_upvote_notification_when_enabled() {
    let fx = fixture_with(EngineConfig {
        notify_on_upvote: true,
        ..Default::default()
    });
    let alice = Caller::learner("alice");
    let d = fx.discussion(&alice, "Notify me");

    // Own votes never notify
    fx.services.votes.toggle_upvote("alice", VoteTarget::Discussion, &d.id).unwrap();
    assert_eq!(fx.services.notifications.unread_count("alice").unwrap(), 0);

    fx.services.votes.toggle_upvote("carol", VoteTarget::Discussion, &d.id).unwrap();
    let list = fx.services.notifications.list_for("alice", true, 10).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].kind, NotificationKind::Upvote);
}

// ============================================================================
// Discussions
// ============================================================================

#[test]
fn test_validation_rejects_before_write() {
    let fx = fixture();
    let alice = Caller::learner("alice");

    let empty_title = fx.services.discussions.create_discussion(
        &alice,
        CreateDiscussionInput {
            course_id: fx.course_id.clone(),
            lesson_id: None,
            title: "   ".into(),
            body: "Body".into(),
        },
    );
    assert!(matches!(empty_title, Err(EngineError::InvalidInput(_))));

    let long_title = fx.services.discussions.create_discussion(
        &alice,
        CreateDiscussionInput {
            course_id: fx.course_id.clone(),
            lesson_id: None,
            title: "x".repeat(301),
            body: "Body".into(),
        },
    );
    assert!(matches!(long_title, Err(EngineError::InvalidInput(_))));

    let unknown_course = fx.services.discussions.create_discussion(
        &alice,
        CreateDiscussionInput {
            course_id: "missing".into(),
            lesson_id: None,
            title: "Title".into(),
            body: "Body".into(),
        },
    );
    assert!(unknown_course.unwrap_err().is_not_found());

    assert!(fx.store.query("discussion", &RecordQuery::new()).unwrap().is_empty());
}

#[test]
fn test_lesson_must_belong_to_course() {
    let fx = fixture();
    let other = fx.services.catalog.create_course("Other", None).unwrap();
    let module = fx.services.catalog.add_module(&other.id, "M").unwrap();
    let lesson = fx.services.catalog.add_lesson(&module.id, "L").unwrap();

    let err = fx
        .services
        .discussions
        .create_discussion(
            &Caller::learner("alice"),
            CreateDiscussionInput {
                course_id: fx.course_id.clone(),
                lesson_id: Some(lesson.id),
                title: "Misfiled".into(),
                body: "Body".into(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[test]
fn test_moderation_permissions() {
    let fx = fixture();
    let alice = Caller::learner("alice");
    let mallory = Caller::learner("mallory");
    let mentor = Caller::instructor("mentor");
    let d = fx.discussion(&alice, "Permissions");

    let err = fx.services.discussions.toggle_pinned(&alice, &d.id).unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
    assert!(fx.services.discussions.toggle_pinned(&mentor, &d.id).unwrap().is_pinned);

    let err = fx
        .services
        .discussions
        .update_discussion(
            &mallory,
            &d.id,
            UpdateDiscussionInput {
                title: Some("Hijacked".into()),
                body: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    assert!(fx.services.discussions.toggle_resolved(&alice, &d.id).unwrap().is_resolved);
    assert!(!fx.services.discussions.toggle_resolved(&mentor, &d.id).unwrap().is_resolved);

    let err = fx.services.discussions.delete_discussion(&mallory, &d.id).unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
    assert_eq!(fx.services.discussions.get_discussion(&d.id).unwrap().title, "Permissions");
}

#[test]
fn test_list_pinned_first() {
    let fx = fixture();
    let alice = Caller::learner("alice");
    let older = fx.discussion(&alice, "Older");
    let newer = fx.discussion(&alice, "Newer");
    fx.services
        .discussions
        .toggle_pinned(&Caller::instructor("mentor"), &older.id)
        .unwrap();

    let list = fx.services.discussions.list_discussions(&fx.course_id, None, 10).unwrap();
    let ids: Vec<&str> = list.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec![older.id.as_str(), newer.id.as_str()]);

    let first = fx.services.discussions.list_discussions(&fx.course_id, None, 1).unwrap();
    assert_eq!(first.len(), 1);
}

#[test]
fn test_delete_keeps_dependents_by_default() {
    let fx = fixture();
    let alice = Caller::learner("alice");
    let d = fx.discussion(&alice, "Keep");
    fx.reply(&alice, &d.id, None);
    fx.services.votes.toggle_upvote("carol", VoteTarget::Discussion, &d.id).unwrap();

    fx.services.discussions.delete_discussion(&alice, &d.id).unwrap();

    assert_eq!(fx.store.query("reply", &RecordQuery::new()).unwrap().len(), 1);
    assert_eq!(fx.store.query("upvote", &RecordQuery::new()).unwrap().len(), 1);
}

#[test]
fn test_cascade_delete_when_enabled() {
    let fx = fixture_with(EngineConfig {
        cascade_discussion_delete: true,
        ..Default::default()
    });
    let alice = Caller::learner("alice");
    let d = fx.discussion(&alice, "Cascade");
    let r = fx.reply(&alice, &d.id, None);
    fx.reply(&alice, &d.id, Some(&r));
    fx.services.votes.toggle_upvote("carol", VoteTarget::Reply, &r).unwrap();
    fx.services.votes.toggle_upvote("carol", VoteTarget::Discussion, &d.id).unwrap();

    fx.services
        .discussions
        .delete_discussion(&Caller::instructor("mentor"), &d.id)
        .unwrap();

    assert!(fx.store.query("reply", &RecordQuery::new()).unwrap().is_empty());
    assert!(fx.store.query("upvote", &RecordQuery::new()).unwrap().is_empty());
}

#[tokio::test]
async fn test_discussion_events() {
    let fx = fixture();
    let mut rx = fx.services.events.subscribe();
    let alice = Caller::learner("alice");

    let d = fx.discussion(&alice, "Events");
    fx.reply(&Caller::learner("bob"), &d.id, None);

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }

    assert_eq!(seen.len(), 3);
    assert!(matches!(&seen[0], EngineEvent::DiscussionCreated { id, .. } if *id == d.id));
    assert!(matches!(seen[1], EngineEvent::ReplyCreated { .. }));
    assert!(matches!(
        &seen[2],
        EngineEvent::NotificationCreated { recipient_id, kind: NotificationKind::NewReply, .. }
            if recipient_id == "alice"
    ));
}
