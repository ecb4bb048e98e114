#![allow(dead_code)]

use hdlgraph::{
    BitVectorState, Circuit, ClockId, ConnectionType, DesignError, GraphError, GraphResult,
    MemoryInfo, MemoryKind, NodeId, NodePort, Plane, bit_mask_range, mem_port, register,
};

pub fn design_error<T>(result: GraphResult<T>) -> DesignError {
    match result {
        Err(GraphError::Design(err)) => err,
        Err(err) => panic!("expected a design error, got {err}"),
        Ok(_) => panic!("expected a design error"),
    }
}

pub fn out(node: NodeId) -> NodePort {
    NodePort::new(node, 0)
}

/// A clocked register fed from `data`.
pub fn register_of(c: &mut Circuit, clock: ClockId, data: NodePort) -> NodeId {
    let ty = c.output_type(data).clone();
    let reg = c.add_register(Some(clock), ty);
    c.connect_input(reg, register::DATA, data).unwrap();
    reg
}

/// A write port whose enable and write enable share `enable`.
pub fn write_port(
    c: &mut Circuit,
    memory: NodeId,
    clock: ClockId,
    address: NodeId,
    data: NodeId,
    enable: NodeId,
) -> NodeId {
    let port = c.add_mem_port(memory, Some(clock)).unwrap();
    c.connect_input(port, mem_port::ADDRESS, out(address)).unwrap();
    c.connect_input(port, mem_port::ENABLE, out(enable)).unwrap();
    c.connect_input(port, mem_port::WR_ENABLE, out(enable)).unwrap();
    c.connect_input(port, mem_port::WR_DATA, out(data)).unwrap();
    port
}

/// An asynchronous read port with the read data left unconsumed.
pub fn read_port(c: &mut Circuit, memory: NodeId, address: NodeId) -> NodeId {
    let port = c.add_mem_port(memory, None).unwrap();
    c.connect_input(port, mem_port::ADDRESS, out(address)).unwrap();
    port
}

pub fn rd_data(port: NodeId) -> NodePort {
    NodePort::new(port, mem_port::RD_DATA)
}

/// Memory whose word `i` holds `i * 0x10 + 1`.
pub fn counting_memory(words: usize, word_width: usize, kind: MemoryKind) -> MemoryInfo {
    let contents: Vec<u64> = (0..words as u64).map(|word| word * 0x10 + 1).collect();
    memory_with(&contents, word_width, kind)
}

/// Memory initialised from `contents`, one entry per word.
pub fn memory_with(contents: &[u64], word_width: usize, kind: MemoryKind) -> MemoryInfo {
    let words = contents.len();
    let mut initial = BitVectorState::new(words * word_width);
    for (word, &value) in contents.iter().enumerate() {
        let value = value & bit_mask_range(0, word_width);
        initial.insert(Plane::Value, word * word_width, word_width, value);
    }
    initial.set_range(Plane::Defined, 0, words * word_width, true);
    MemoryInfo::new(words, word_width, kind).with_initial(initial)
}

pub fn bool_pin(c: &mut Circuit) -> NodeId {
    c.add_pin(ConnectionType::bool())
}
