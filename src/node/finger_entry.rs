use std::fmt;
use std::fmt::Debug;

use serde::Serialize;

use crate::node::node_ref::NodeRef;
use crate::utils::crypto::HashPos;

/// An entry in the finger table: the arc start this finger is responsible
/// for, and the best-known node at or after it.
#[derive(Clone, Serialize)]
pub struct FingerEntry {
    pub start: HashPos,
    pub successor: NodeRef,
}

impl FingerEntry {
    pub fn new(start: HashPos, successor: &NodeRef) -> Self {
        FingerEntry {
            start,
            successor: successor.clone(),
        }
    }
}

impl Debug for FingerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("")
            .field("start", &self.start)
            .field("successor", &self.successor)
            .finish()
    }
}
