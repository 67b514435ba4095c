//! Caller identity handed to every mutating operation
//!
//! Authentication happens upstream; the engine only sees who is calling and
//! whether they hold the instructor/admin role.

use serde::{Deserialize, Serialize};

/// Authenticated caller as supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller {
    /// Learner/author identity
    pub user_id: String,
    /// Instructor or admin role
    #[serde(default)]
    pub is_instructor: bool,
}

impl Caller {
    /// A learner without elevated role
    pub fn learner(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_instructor: false,
        }
    }

    /// A caller holding the instructor role
    pub fn instructor(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_instructor: true,
        }
    }

    /// Whether this caller authored the record owned by `author_id`
    pub fn is_author(&self, author_id: &str) -> bool {
        self.user_id == author_id
    }

    /// Author of the record, or an instructor
    pub fn can_moderate(&self, author_id: &str) -> bool {
        self.is_instructor || self.is_author(author_id)
    }
}

impl std::fmt::Display for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_instructor {
            write!(f, "Caller({}, instructor)", self.user_id)
        } else {
            write!(f, "Caller({})", self.user_id)
        }
    }
}
