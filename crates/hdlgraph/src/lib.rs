mod bit_state;
mod error;
mod graph;
mod memory;
mod sim;

pub use bit_state::{
    BITS_PER_WORD, BitVectorState, Plane, Word, bit_mask_range, bitfield_extract, bitfield_insert,
};
pub use error::{DesignError, DesignErrorKind, GraphError, GraphResult, InternalError, Provenance};
pub(crate) use fxhash::FxHashMap as HashMap;
pub use graph::{
    ArithmeticOp, Circuit, Clock, ClockId, CompareOp, ConnectionType, ConstructionSite,
    Exploration, GroupId, GroupKind, Interpretation, LogicOp, MemoryInfo, MemoryKind, Node,
    NodeGroup, NodeId, NodeKind, NodePort, OutputSlot, mem_port, mux, register,
};
pub use memory::{
    MemoryGroup, MemoryPassOptions, MemoryPhase, ReadPort, WritePort,
    build_explicit_memory_circuitry, build_explicit_memory_circuitry_with, find_memory_groups,
};
pub use num_bigint::BigUint;
pub use sim::{LogOutput, Simulator, SimulatorBuilder, SimulatorCallbacks, SimulatorOptions, eval};
