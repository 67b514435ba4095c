//! Thread builder - materializes reply trees from flat reply rows
//!
//! Replies only carry a back-reference to their parent. The tree is built at
//! read time in an index-based arena: one pass to index rows by id, one pass
//! to record parent→children adjacency, then nodes are assembled bottom-up.
//!
//! Orphan policy: a reply whose parent is not in the result set (deleted) is
//! dropped together with its descendants. It is never promoted to a root.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::EngineConfig;
use crate::db::models::{fields, Reply};
use crate::db::{self, RecordQuery, RecordStore};
use crate::error::EngineError;

/// A reply with its nested children
#[derive(Debug, Clone, Serialize)]
pub struct ThreadNode {
    pub reply: Reply,
    /// 0 for top-level replies
    pub depth: usize,
    /// Whether the UI should offer a reply action on this node
    pub can_reply: bool,
    pub children: Vec<ThreadNode>,
}

impl ThreadNode {
    /// Number of replies in this subtree, including this one
    pub fn reply_count(&self) -> usize {
        1 + self.children.iter().map(ThreadNode::reply_count).sum::<usize>()
    }
}

/// Assemble replies (in creation order) into an ordered forest.
///
/// Roots and each children list keep the input order.
pub fn assemble(replies: Vec<Reply>, reply_depth_limit: usize) -> Vec<ThreadNode> {
    let index: HashMap<String, usize> = replies
        .iter()
        .enumerate()
        .map(|(i, reply)| (reply.id.clone(), i))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); replies.len()];
    let mut roots = Vec::new();

    for (i, reply) in replies.iter().enumerate() {
        match reply.parent_reply_id.as_deref() {
            None => roots.push(i),
            Some(parent_id) => match index.get(parent_id) {
                Some(&parent) if parent != i => children[parent].push(i),
                _ => {} // orphan
            },
        }
    }

    // Breadth-first from the roots gives depths and a parent-before-child order.
    // Nodes on a parent cycle are never reached.
    let mut depth = vec![0usize; replies.len()];
    let mut order = Vec::with_capacity(replies.len());
    let mut queue: VecDeque<usize> = roots.iter().copied().collect();
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &child in &children[i] {
            depth[child] = depth[i] + 1;
            queue.push_back(child);
        }
    }

    if order.len() < replies.len() {
        debug!(dropped = replies.len() - order.len(), "Dropped orphaned replies");
    }

    let mut slots: Vec<Option<Reply>> = replies.into_iter().map(Some).collect();
    let mut built: Vec<Option<ThreadNode>> = vec![None; slots.len()];

    for &i in order.iter().rev() {
        let node_children = children[i]
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();

        if let Some(reply) = slots[i].take() {
            built[i] = Some(ThreadNode {
                reply,
                depth: depth[i],
                can_reply: depth[i] < reply_depth_limit,
                children: node_children,
            });
        }
    }

    roots.into_iter().filter_map(|i| built[i].take()).collect()
}

/// Loads a discussion's replies and builds its tree. Read-only.
pub struct ThreadBuilder {
    store: Arc<dyn RecordStore>,
    config: Arc<EngineConfig>,
}

impl ThreadBuilder {
    pub fn new(store: Arc<dyn RecordStore>, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }

    /// All replies of a discussion in creation order
    pub fn replies(&self, discussion_id: &str) -> Result<Vec<Reply>, EngineError> {
        db::find(
            self.store.as_ref(),
            &RecordQuery::new()
                .filter(fields::DISCUSSION_ID, discussion_id)
                .sort_asc(fields::CREATED_AT),
        )
    }

    pub fn build_tree(&self, discussion_id: &str) -> Result<Vec<ThreadNode>, EngineError> {
        let replies = self.replies(discussion_id)?;
        Ok(assemble(replies, self.config.reply_depth_limit))
    }
}
