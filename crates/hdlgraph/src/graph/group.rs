use std::fmt;

use super::{ConstructionSite, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub(crate) u32);

impl GroupId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKind {
    Entity,
    /// Holds one memory, its ports and the registers fused into them.
    Memory,
}

#[derive(Debug, Clone)]
pub struct NodeGroup {
    pub(crate) kind: GroupKind,
    pub(crate) name: String,
    pub(crate) comment: Option<String>,
    pub(crate) parent: Option<GroupId>,
    pub(crate) children: Vec<GroupId>,
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) site: ConstructionSite,
}

impl NodeGroup {
    pub(crate) fn new(
        kind: GroupKind,
        name: impl Into<String>,
        parent: Option<GroupId>,
        site: ConstructionSite,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            comment: None,
            parent,
            children: Vec::new(),
            nodes: Vec::new(),
            site,
        }
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    pub fn children(&self) -> &[GroupId] {
        &self.children
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn site(&self) -> ConstructionSite {
        self.site
    }
}
