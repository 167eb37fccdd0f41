use serde::Serialize;

use crate::node::finger_entry::FingerEntry;
use crate::node::node_ref::NodeRef;
use crate::utils::crypto::{mask, HashPos};

/// Per-node routing table of m shortcuts at exponentially increasing
/// distances. Entry i covers the arc starting at `(own + 2^i) mod 2^m`; the
/// starts never change after construction, only the successors do.
#[derive(Debug, Clone, Serialize)]
pub struct FingerTable {
    pub fingers: Vec<FingerEntry>,
}

impl FingerTable {
    pub fn new(own: &NodeRef, bits: u8) -> FingerTable {
        let own_id = own.id.unwrap_or_default();
        let space = mask(bits);
        let fingers = (0..bits)
            .map(|i| {
                let start = own_id.wrapping_add(1u64 << i) & space;
                FingerEntry::new(start, own)
            })
            .collect();
        FingerTable { fingers }
    }

    pub fn set_finger(&mut self, index: usize, node: NodeRef) {
        self.fingers[index].successor = node;
    }

    pub fn start(&self, index: usize) -> HashPos {
        self.fingers[index].start
    }
}
