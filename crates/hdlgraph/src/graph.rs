//! The netlist graph: an arena of typed nodes connected port to port.

mod circuit;
mod explore;
mod group;
mod node;

use std::fmt;

pub use circuit::Circuit;
pub use explore::Exploration;
pub use group::{GroupId, GroupKind, NodeGroup};
pub use node::{
    ArithmeticOp, CompareOp, ConnectionType, ConstructionSite, Interpretation, LogicOp,
    MemoryInfo, MemoryKind, Node, NodeId, NodeKind, NodePort, OutputSlot, mem_port, mux,
    register,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockId(pub(crate) u32);

impl ClockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clock#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clock {
    pub(crate) name: String,
}

impl Clock {
    pub fn name(&self) -> &str {
        &self.name
    }
}
