//! Memory groups: lowering memory port ordering into explicit logic.
//!
//! [`find_memory_groups`] forms one [`MemoryGroup`] around every memory node.
//! [`build_explicit_memory_circuitry`] then turns read-after-write and
//! write-after-write ordering into bypass and priority logic, retimes
//! asynchronous reads of block memories into synchronous ones and checks the
//! result against what the memory kind can implement.

mod group;
mod hazard;
mod retiming;

use log::debug;

pub use group::{MemoryGroup, MemoryPhase, ReadPort, WritePort};

use crate::error::{DesignError, DesignErrorKind, GraphResult};
use crate::graph::{Circuit, CompareOp, GroupId, LogicOp, NodeId, NodePort, mem_port, mux};

#[derive(Debug, Clone)]
pub struct MemoryPassOptions {
    /// Move registers behind asynchronous block memory reads in front of the read.
    pub retime_block_memories: bool,
    /// Check port counts and synchronous reads once lowering is done.
    pub verify: bool,
}

impl Default for MemoryPassOptions {
    fn default() -> Self {
        Self {
            retime_block_memories: true,
            verify: true,
        }
    }
}

/// Forms a memory group around every memory node that does not have one yet.
pub fn find_memory_groups(circuit: &mut Circuit) -> GraphResult<Vec<GroupId>> {
    let memories: Vec<NodeId> = circuit
        .nodes()
        .filter(|(_, n)| n.as_memory().is_some())
        .map(|(id, _)| id)
        .collect();

    let mut formed = Vec::new();
    for memory in memories {
        if circuit.memory_group_of(memory).is_some() {
            continue;
        }
        let parent = circuit.node(memory).group();
        let group = circuit.add_memory_group(parent);
        let mut memory_group = MemoryGroup::new(group, memory);
        memory_group.form_around(circuit)?;
        debug!(
            "formed {group} around {memory}: {} read, {} write ports",
            memory_group.read_ports().len(),
            memory_group.write_ports().len()
        );
        circuit.memory_groups.insert(group, memory_group);
        formed.push(group);
    }
    Ok(formed)
}

pub fn build_explicit_memory_circuitry(circuit: &mut Circuit) -> GraphResult<()> {
    build_explicit_memory_circuitry_with(circuit, &MemoryPassOptions::default())
}

pub fn build_explicit_memory_circuitry_with(
    circuit: &mut Circuit,
    options: &MemoryPassOptions,
) -> GraphResult<()> {
    let mut groups: Vec<GroupId> = circuit.memory_groups.keys().copied().collect();
    groups.sort();

    for group in groups {
        let Some(mut memory_group) = circuit.memory_groups.remove(&group) else {
            continue;
        };
        let result = memory_group.lower(circuit, options);
        circuit.memory_groups.insert(group, memory_group);
        result?;
    }
    Ok(())
}

impl MemoryGroup {
    fn lower(&mut self, circuit: &mut Circuit, options: &MemoryPassOptions) -> GraphResult<()> {
        self.convert_port_dependency_to_logic(circuit)?;
        if options.retime_block_memories {
            self.attempt_register_retiming(circuit)?;
        } else {
            self.skip_phase(MemoryPhase::Retimed)?;
        }
        if options.verify {
            self.verify(circuit)
        } else {
            self.skip_phase(MemoryPhase::Verified)
        }
    }
}

/// Runs `build` with new nodes landing in `group`.
fn build_in<T>(
    circuit: &mut Circuit,
    group: GroupId,
    build: impl FnOnce(&mut Circuit) -> GraphResult<T>,
) -> GraphResult<T> {
    let previous = circuit.set_insertion_group(group);
    let result = build(circuit);
    circuit.set_insertion_group(previous);
    result
}

/// ENABLE and WR_ENABLE of a write port must come from the same source.
fn check_write_enable(circuit: &Circuit, port: NodeId) -> GraphResult<()> {
    if circuit.non_signal_driver(port, mem_port::ENABLE)
        != circuit.non_signal_driver(port, mem_port::WR_ENABLE)
    {
        return Err(DesignError::new(
            DesignErrorKind::EnableMismatch,
            "enable and write enable of a write port must be driven by the same signal",
        )
        .with_site(circuit.provenance(port, "write port"))
        .into());
    }
    Ok(())
}

fn connect_driver(circuit: &mut Circuit, node: NodeId, input: usize, driver: Option<NodePort>) -> GraphResult<()> {
    match driver {
        Some(driver) => circuit.connect_input(node, input, driver),
        None => circuit.disconnect_input(node, input),
    }
}

fn and_gate(circuit: &mut Circuit, lhs: NodePort, rhs: NodePort) -> GraphResult<NodePort> {
    let and = circuit.add_logic(LogicOp::And);
    circuit.connect_input(and, 0, lhs)?;
    circuit.connect_input(and, 1, rhs)?;
    Ok(NodePort::new(and, 0))
}

/// Address match between a read and a write port, qualified by both enables.
fn build_conflict(circuit: &mut Circuit, read_port: NodeId, write_port: NodeId) -> GraphResult<NodePort> {
    let compare = circuit.add_compare(CompareOp::Eq);
    circuit.set_comment(compare, "Compare read and write address for conflicts");
    let read_address = circuit.driver(read_port, mem_port::ADDRESS);
    let write_address = circuit.driver(write_port, mem_port::ADDRESS);
    connect_driver(circuit, compare, 0, read_address)?;
    connect_driver(circuit, compare, 1, write_address)?;

    let mut conflict = NodePort::new(compare, 0);
    circuit.append_signal(&mut conflict, "conflict")?;
    for port in [read_port, write_port] {
        if let Some(enable) = circuit.driver(port, mem_port::ENABLE) {
            conflict = and_gate(circuit, conflict, enable)?;
            circuit.append_signal(&mut conflict, "conflict")?;
        }
    }
    Ok(conflict)
}

/// Puts a 2:1 mux behind `read_data` that forwards `write_data` on `conflict`.
fn insert_bypass_mux(
    circuit: &mut Circuit,
    read_data: NodePort,
    conflict: NodePort,
    write_data: NodePort,
) -> GraphResult<NodeId> {
    let consumers = circuit.directly_driven(read_data).to_vec();

    let mux = circuit.add_mux(2);
    circuit.set_comment(
        mux,
        "If read and write address match and both are enabled, forward write data to read output.",
    );
    circuit.connect_input(mux, mux::SELECTOR, conflict)?;
    circuit.connect_input(mux, 1, read_data)?;
    circuit.connect_input(mux, 2, write_data)?;

    let mut output = NodePort::new(mux, 0);
    circuit.append_signal(&mut output, "conflict_bypass_mux")?;
    for consumer in consumers {
        circuit.connect_input(consumer.node, consumer.port, output)?;
    }
    Ok(mux)
}
