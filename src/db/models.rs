//! Record models stored through the record store
//!
//! Every record is a flat JSON document keyed by `id`. Field names here are
//! the field names equality filters and sort orders refer to.
//!
//! TypeScript types are auto-generated via ts-rs. Run:
//!   cargo test export_bindings
//! Generated files go to: bindings/

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::Record;

// ============================================================================
// Timestamp Helpers
// ============================================================================

/// Current UTC timestamp as fixed-width ISO 8601 with microseconds.
///
/// Fixed width keeps lexicographic order equal to chronological order, which
/// the stores rely on when sorting by a timestamp field.
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Field names shared by several record kinds
pub mod fields {
    pub const ID: &str = "id";
    pub const COURSE_ID: &str = "course_id";
    pub const MODULE_ID: &str = "module_id";
    pub const LESSON_ID: &str = "lesson_id";
    pub const LEARNER_ID: &str = "learner_id";
    pub const DISCUSSION_ID: &str = "discussion_id";
    pub const PARENT_REPLY_ID: &str = "parent_reply_id";
    pub const VOTER_ID: &str = "voter_id";
    pub const TARGET_KIND: &str = "target_kind";
    pub const TARGET_ID: &str = "target_id";
    pub const RECIPIENT_ID: &str = "recipient_id";
    pub const IS_COMPLETED: &str = "is_completed";
    pub const IS_READ: &str = "is_read";
    pub const ORDER_INDEX: &str = "order_index";
    pub const CREATED_AT: &str = "created_at";
    pub const ENROLLED_AT: &str = "enrolled_at";
}

// ============================================================================
// Catalog
// ============================================================================

/// Course, the root of the module/lesson hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Course {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: String,
}

/// Ordered module within a course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CourseModule {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub order_index: u32,
    pub created_at: String,
}

/// Ordered lesson within a module. Immutable to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Lesson {
    pub id: String,
    pub module_id: String,
    pub title: String,
    pub order_index: u32,
    pub created_at: String,
}

// ============================================================================
// Progress
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EnrollmentStatus {
    Active,
    Completed,
}

/// A learner's relationship to a course with derived completion state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Enrollment {
    pub id: String,
    pub learner_id: String,
    pub course_id: String,
    pub enrolled_at: String,
    /// 0..=100
    pub completion_percentage: u8,
    pub status: EnrollmentStatus,
    pub last_accessed_at: String,
}

/// Per-learner, per-lesson completion marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LessonProgress {
    pub id: String,
    pub learner_id: String,
    pub lesson_id: String,
    pub is_completed: bool,
    #[serde(default)]
    pub completed_at: Option<String>,
    pub created_at: String,
}

// ============================================================================
// Discussions
// ============================================================================

/// Top-level question or post attached to a course or lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Discussion {
    pub id: String,
    pub course_id: String,
    #[serde(default)]
    pub lesson_id: Option<String>,
    pub author_id: String,
    pub title: String,
    pub body: String,
    pub is_pinned: bool,
    pub is_resolved: bool,
    pub upvote_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// Response to a discussion or to another reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Reply {
    pub id: String,
    pub discussion_id: String,
    /// Back-reference only; the tree is materialized at read time
    #[serde(default)]
    pub parent_reply_id: Option<String>,
    pub author_id: String,
    pub body: String,
    pub upvote_count: u32,
    pub is_instructor_response: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Which kind of record an upvote points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum VoteTarget {
    Discussion,
    Reply,
}

impl VoteTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteTarget::Discussion => "discussion",
            VoteTarget::Reply => "reply",
        }
    }
}

/// One voter's endorsement. Row existence is the vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Upvote {
    pub id: String,
    pub target_kind: VoteTarget,
    pub target_id: String,
    pub voter_id: String,
    pub created_at: String,
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum NotificationKind {
    NewReply,
    InstructorResponse,
    Upvote,
}

/// Signal to a user about activity on their content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub discussion_id: String,
    #[serde(default)]
    pub reply_id: Option<String>,
    pub kind: NotificationKind,
    pub is_read: bool,
    pub created_at: String,
}

// ============================================================================
// Record impls
// ============================================================================

macro_rules! impl_record {
    ($($ty:ty => $kind:literal),* $(,)?) => {
        $(
            impl Record for $ty {
                const KIND: &'static str = $kind;

                fn id(&self) -> &str {
                    &self.id
                }
            }
        )*
    };
}

impl_record! {
    Course => "course",
    CourseModule => "module",
    Lesson => "lesson",
    Enrollment => "enrollment",
    LessonProgress => "lesson_progress",
    Discussion => "discussion",
    Reply => "reply",
    Upvote => "upvote",
    Notification => "notification",
}
