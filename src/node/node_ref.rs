use std::fmt;
use std::fmt::Debug;

use serde::Serialize;

use crate::utils::crypto::HashPos;

/// A peer reference: ring identifier plus network address. A reference with
/// an absent id is the "unknown or unreachable" sentinel; callers must check
/// `is_null` before routing through it.
#[derive(Clone, Default, Serialize, PartialEq, Eq)]
pub struct NodeRef {
    pub id: Option<HashPos>,
    pub host: String,
    pub port: u16,
}

impl NodeRef {
    pub fn new(id: HashPos, host: &str, port: u16) -> Self {
        NodeRef {
            id: Some(id),
            host: host.to_string(),
            port,
        }
    }

    pub fn null() -> Self {
        NodeRef::default()
    }

    pub fn is_null(&self) -> bool {
        self.id.is_none()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "({}, {}:{})", id, self.host, self.port),
            None => write!(f, "(nil)"),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}
