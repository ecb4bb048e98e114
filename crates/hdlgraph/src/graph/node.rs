use std::fmt;
use std::panic::Location;

use smallvec::SmallVec;

use crate::bit_state::BitVectorState;

use super::{ClockId, GroupId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A reference to one input or output slot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePort {
    pub node: NodeId,
    pub port: usize,
}

impl NodePort {
    pub fn new(node: NodeId, port: usize) -> Self {
        Self { node, port }
    }
}

impl fmt::Display for NodePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interpretation {
    Bool,
    #[default]
    BitVec,
    OneHot,
    Raw,
    Float,
    Dependency,
}

/// The type carried by an output slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ConnectionType {
    pub interpretation: Interpretation,
    pub width: usize,
    pub fixed_point_denominator: u32,
    pub float_sign_bit: bool,
    pub float_mantissa_bits: u32,
    pub float_exponent_bias: i32,
}

impl ConnectionType {
    pub fn bool() -> Self {
        Self {
            interpretation: Interpretation::Bool,
            width: 1,
            fixed_point_denominator: 1,
            ..Default::default()
        }
    }

    pub fn bitvec(width: usize) -> Self {
        Self {
            interpretation: Interpretation::BitVec,
            width,
            fixed_point_denominator: 1,
            ..Default::default()
        }
    }

    pub fn raw(width: usize) -> Self {
        Self {
            interpretation: Interpretation::Raw,
            width,
            ..Default::default()
        }
    }

    pub fn dependency() -> Self {
        Self {
            interpretation: Interpretation::Dependency,
            width: 0,
            ..Default::default()
        }
    }

    pub fn is_dependency(&self) -> bool {
        self.interpretation == Interpretation::Dependency
    }
}

/// Where a node was created, captured with `#[track_caller]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstructionSite {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl ConstructionSite {
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for ConstructionSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Nand,
    Or,
    Nor,
    Xor,
    Eq,
    Not,
}

impl LogicOp {
    pub fn num_inputs(self) -> usize {
        if self == LogicOp::Not { 1 } else { 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Leq,
    Geq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Block memory: synchronous reads, at most two ports.
    Block,
    /// Distributed memory: asynchronous reads, one read and one write port.
    Distributed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryInfo {
    pub words: usize,
    pub word_width: usize,
    pub kind: MemoryKind,
    /// Contents loaded on power-on, `words * word_width` bits.
    pub initial: Option<BitVectorState>,
}

impl MemoryInfo {
    pub fn new(words: usize, word_width: usize, kind: MemoryKind) -> Self {
        Self {
            words,
            word_width,
            kind,
            initial: None,
        }
    }

    pub fn with_initial(mut self, initial: BitVectorState) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn size(&self) -> usize {
        self.words * self.word_width
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Signal,
    Pin,
    OutputPin,
    Constant(BitVectorState),
    Arithmetic(ArithmeticOp),
    Logic(LogicOp),
    Compare(CompareOp),
    Multiplexer { inputs: usize },
    Register,
    Memory(MemoryInfo),
    MemPort { word_width: usize },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Signal => "signal",
            NodeKind::Pin => "pin",
            NodeKind::OutputPin => "output pin",
            NodeKind::Constant(_) => "constant",
            NodeKind::Arithmetic(_) => "arithmetic",
            NodeKind::Logic(_) => "logic",
            NodeKind::Compare(_) => "compare",
            NodeKind::Multiplexer { .. } => "multiplexer",
            NodeKind::Register => "register",
            NodeKind::Memory(_) => "memory",
            NodeKind::MemPort { .. } => "memory port",
        }
    }
}

pub mod register {
    pub const DATA: usize = 0;
    pub const RESET_VALUE: usize = 1;
    pub const ENABLE: usize = 2;
}

pub mod mem_port {
    pub const MEMORY: usize = 0;
    pub const ADDRESS: usize = 1;
    pub const ENABLE: usize = 2;
    pub const WR_ENABLE: usize = 3;
    pub const WR_DATA: usize = 4;
    pub const ORDER_AFTER: usize = 5;

    pub const RD_DATA: usize = 0;
    pub const ORDER_BEFORE: usize = 1;
}

pub mod mux {
    pub const SELECTOR: usize = 0;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputSlot {
    pub ty: ConnectionType,
    pub driven: Vec<NodePort>,
}

impl OutputSlot {
    pub fn new(ty: ConnectionType) -> Self {
        Self {
            ty,
            driven: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) inputs: SmallVec<[Option<NodePort>; 4]>,
    pub(crate) outputs: SmallVec<[OutputSlot; 2]>,
    pub(crate) clocks: SmallVec<[Option<ClockId>; 1]>,
    pub(crate) group: GroupId,
    pub(crate) name: Option<String>,
    pub(crate) comment: Option<String>,
    pub(crate) site: ConstructionSite,
}

impl Node {
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn driver(&self, input: usize) -> Option<NodePort> {
        self.inputs[input]
    }

    pub fn output_type(&self, output: usize) -> &ConnectionType {
        &self.outputs[output].ty
    }

    pub fn directly_driven(&self, output: usize) -> &[NodePort] {
        &self.outputs[output].driven
    }

    pub fn clock(&self) -> Option<ClockId> {
        self.clocks.first().copied().flatten()
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn site(&self) -> ConstructionSite {
        self.site
    }

    pub fn is_signal(&self) -> bool {
        matches!(self.kind, NodeKind::Signal)
    }

    pub fn is_register(&self) -> bool {
        matches!(self.kind, NodeKind::Register)
    }

    pub fn is_mem_port(&self) -> bool {
        matches!(self.kind, NodeKind::MemPort { .. })
    }

    pub fn as_memory(&self) -> Option<&MemoryInfo> {
        match &self.kind {
            NodeKind::Memory(info) => Some(info),
            _ => None,
        }
    }

    /// A write port has its write data driven.
    pub fn is_write_port(&self) -> bool {
        self.is_mem_port() && self.inputs[mem_port::WR_DATA].is_some()
    }

    /// A read port has at least one consumer of its read data.
    pub fn is_read_port(&self) -> bool {
        self.is_mem_port() && !self.outputs[mem_port::RD_DATA].driven.is_empty()
    }

    /// Output depends only on the current inputs.
    pub fn is_combinational(&self) -> bool {
        match &self.kind {
            NodeKind::Signal
            | NodeKind::Constant(_)
            | NodeKind::Arithmetic(_)
            | NodeKind::Logic(_)
            | NodeKind::Compare(_)
            | NodeKind::Multiplexer { .. } => true,
            NodeKind::Pin
            | NodeKind::OutputPin
            | NodeKind::Register
            | NodeKind::Memory(_)
            | NodeKind::MemPort { .. } => false,
        }
    }

    pub fn has_side_effects(&self) -> bool {
        match &self.kind {
            NodeKind::OutputPin => true,
            NodeKind::MemPort { .. } => self.is_write_port(),
            _ => false,
        }
    }
}
