use crate::node::finger_entry::FingerEntry;
use crate::node::node_ref::NodeRef;
use crate::threads::chord::chord_proto::{FingerEntryMsg, NodeMsg};

impl Into<NodeMsg> for NodeRef {
    fn into(self) -> NodeMsg {
        NodeMsg {
            id: self.id,
            host: self.host,
            port: self.port as u32,
        }
    }
}

impl Into<NodeMsg> for &NodeRef {
    fn into(self) -> NodeMsg {
        self.clone().into()
    }
}

impl Into<NodeRef> for NodeMsg {
    fn into(self) -> NodeRef {
        NodeRef {
            id: self.id,
            host: self.host,
            port: self.port as u16,
        }
    }
}

impl Into<NodeRef> for &NodeMsg {
    fn into(self) -> NodeRef {
        self.clone().into()
    }
}

impl Into<FingerEntryMsg> for FingerEntry {
    fn into(self) -> FingerEntryMsg {
        FingerEntryMsg {
            start: self.start,
            node: Some(self.successor.into()),
        }
    }
}

impl Into<FingerEntryMsg> for &FingerEntry {
    fn into(self) -> FingerEntryMsg {
        self.clone().into()
    }
}

/// Unpacks an optional wire reference, mapping absence to the null node.
pub fn node_from_msg(msg: Option<NodeMsg>) -> NodeRef {
    msg.map(Into::into).unwrap_or_else(NodeRef::null)
}
