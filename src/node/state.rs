use std::sync::{Arc, Mutex};

use crate::node::finger_entry::FingerEntry;
use crate::node::finger_table::FingerTable;
use crate::node::node_ref::NodeRef;
use crate::node::successor_list::SuccessorList;
use crate::utils::crypto::HashPos;

/// Shared routing state of one node: finger table, predecessor handle and
/// successor list behind their own locks, plus the immutable self identity.
///
/// All accessors lock for short, non-suspending sections only; callers
/// snapshot peer references, drop the guard, perform RPCs, then reapply.
#[derive(Clone)]
pub struct NodeState {
    own: NodeRef,
    bits: u8,
    finger_table: Arc<Mutex<FingerTable>>,
    predecessor: Arc<Mutex<NodeRef>>,
    successor_list: Arc<Mutex<SuccessorList>>,
}

impl NodeState {
    /// Cold state: all fingers and the successor list point at the node
    /// itself, the predecessor is unknown until the join protocol sets it.
    pub fn new(own: NodeRef, bits: u8) -> NodeState {
        let finger_table = FingerTable::new(&own, bits);
        let successor_list = SuccessorList::new(&own, bits as usize);
        NodeState {
            own,
            bits,
            finger_table: Arc::new(Mutex::new(finger_table)),
            predecessor: Arc::new(Mutex::new(NodeRef::null())),
            successor_list: Arc::new(Mutex::new(successor_list)),
        }
    }

    pub fn own(&self) -> &NodeRef {
        &self.own
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn successor(&self) -> NodeRef {
        self.finger_table.lock().unwrap().fingers[0].successor.clone()
    }

    /// Replaces the immediate successor, keeping the successor list head in
    /// sync with finger zero.
    pub fn set_successor(&self, node: NodeRef) {
        self.successor_list.lock().unwrap().set_head(node.clone());
        self.finger_table.lock().unwrap().set_finger(0, node);
    }

    pub fn predecessor(&self) -> NodeRef {
        self.predecessor.lock().unwrap().clone()
    }

    pub fn set_predecessor(&self, node: NodeRef) {
        *self.predecessor.lock().unwrap() = node;
    }

    pub fn finger(&self, index: usize) -> NodeRef {
        self.finger_table.lock().unwrap().fingers[index].successor.clone()
    }

    pub fn finger_start(&self, index: usize) -> HashPos {
        self.finger_table.lock().unwrap().start(index)
    }

    pub fn set_finger(&self, index: usize, node: NodeRef) {
        if index == 0 {
            self.set_successor(node);
        } else {
            self.finger_table.lock().unwrap().set_finger(index, node);
        }
    }

    pub fn fingers_snapshot(&self) -> Vec<FingerEntry> {
        self.finger_table.lock().unwrap().fingers.clone()
    }

    pub fn successors_snapshot(&self) -> Vec<NodeRef> {
        self.successor_list.lock().unwrap().successors.clone()
    }

    pub fn successor_at(&self, index: usize) -> Option<NodeRef> {
        self.successor_list.lock().unwrap().successors.get(index).cloned()
    }

    pub fn successor_count(&self) -> usize {
        self.successor_list.lock().unwrap().successors.len()
    }

    pub fn mirror_successor_into_list(&self) {
        let successor = self.successor();
        self.successor_list.lock().unwrap().set_head(successor);
    }

    /// Drops the dead list head and promotes the next fall-back into finger
    /// zero. Returns the promoted node (self when the list drained).
    pub fn promote_next_successor(&self) -> NodeRef {
        let promoted = self.successor_list.lock().unwrap().drop_head(&self.own);
        self.finger_table.lock().unwrap().set_finger(0, promoted.clone());
        promoted
    }

    pub fn insert_successor_after(&self, index: usize, node: NodeRef) {
        self.successor_list.lock().unwrap().insert_after(index, node);
    }

    pub fn drop_last_successor(&self) {
        self.successor_list.lock().unwrap().successors.pop();
    }

    pub fn truncate_successors(&self) {
        self.successor_list.lock().unwrap().truncate_to_capacity();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64) -> NodeRef {
        NodeRef::new(id, "127.0.0.1", 5600 + id as u16)
    }

    #[test]
    fn cold_state_is_a_lone_ring() {
        let state = NodeState::new(node(1), 3);
        assert_eq!(state.successor(), node(1));
        assert!(state.predecessor().is_null());
        assert_eq!(state.fingers_snapshot().len(), 3);
        assert_eq!(state.successors_snapshot(), vec![node(1)]);
    }

    #[test]
    fn set_successor_mirrors_the_list_head() {
        let state = NodeState::new(node(1), 3);
        state.set_successor(node(3));
        assert_eq!(state.finger(0), node(3));
        assert_eq!(state.successor_at(0), Some(node(3)));
    }

    #[test]
    fn finger_zero_updates_go_through_the_mirror() {
        let state = NodeState::new(node(1), 3);
        state.set_finger(0, node(5));
        assert_eq!(state.successor_at(0), Some(node(5)));
        state.set_finger(2, node(3));
        assert_eq!(state.finger(2), node(3));
        assert_eq!(state.successor_at(0), Some(node(5)));
    }

    #[test]
    fn promoting_from_a_drained_list_reinserts_self() {
        let state = NodeState::new(node(1), 3);
        state.set_successor(node(3));
        let promoted = state.promote_next_successor();
        assert_eq!(promoted, node(1));
        assert_eq!(state.successor(), node(1));
    }
}
