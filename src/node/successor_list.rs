use serde::Serialize;

use crate::node::node_ref::NodeRef;

/// Ordered fall-back successors, head first. Slot 0 mirrors the immediate
/// successor whenever that one is confirmed alive; the tail approximates the
/// successors further clockwise. Capped at m entries.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessorList {
    pub successors: Vec<NodeRef>,
    capacity: usize,
}

impl SuccessorList {
    pub fn new(successor: &NodeRef, capacity: usize) -> Self {
        SuccessorList {
            successors: vec![successor.clone()],
            capacity,
        }
    }

    pub fn set_head(&mut self, node: NodeRef) {
        if self.successors.is_empty() {
            self.successors.push(node);
        } else {
            self.successors[0] = node;
        }
    }

    /// Drops the head. Returns the new head, reinserting `own` if the list
    /// drained completely.
    pub fn drop_head(&mut self, own: &NodeRef) -> NodeRef {
        if !self.successors.is_empty() {
            self.successors.remove(0);
        }
        if self.successors.is_empty() {
            self.successors.push(own.clone());
        }
        self.successors[0].clone()
    }

    /// Inserts `node` right after slot `index` unless it is already there.
    pub fn insert_after(&mut self, index: usize, node: NodeRef) {
        let already_there = self
            .successors
            .get(index + 1)
            .map(|next| next.id == node.id)
            .unwrap_or(false);
        if !already_there && self.successors.len() < self.capacity {
            self.successors.insert(index + 1, node);
        }
    }

    pub fn truncate_to_capacity(&mut self) {
        self.successors.truncate(self.capacity);
    }
}
