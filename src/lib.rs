//! Lamad Engine - progress and discussion core for Lamad learning content
//!
//! Tracks a learner's progress through courses and manages threaded,
//! moderated discussions attached to that content.
//!
//! ## Architecture
//!
//! - **Record store**: generic create/get/update/delete/query over JSON
//!   records (SQLite or in-memory). The only shared resource.
//! - **Progress**: lesson completion is recorded monotonically and the
//!   enrollment's completion percentage is re-derived on every completion.
//! - **Discussions**: replies are stored flat with a parent back-reference
//!   and materialized into a depth-annotated tree on read.
//! - **Votes and notifications**: idempotent upvote toggles keep a
//!   denormalized counter in step; replies notify the discussion author.
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/lamad-engine/
//! ├── lamad.db        # SQLite record store
//! └── config.toml     # Configuration
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod services;

// Re-exports
pub use config::EngineConfig;
pub use db::{MemoryStore, RecordQuery, RecordStore, SqliteStore};
pub use error::EngineError;
pub use identity::Caller;
pub use services::{EngineEvent, EventBus, Services};
