use log::debug;

use super::group::{MemoryGroup, MemoryPhase, ReadPort};
use super::{and_gate, build_conflict, build_in, check_write_enable, connect_driver, insert_bypass_mux};
use crate::error::GraphResult;
use crate::graph::{Circuit, CompareOp, LogicOp, NodeId, NodePort, mem_port, register};
use crate::internal_bail;

impl MemoryGroup {
    /// Phase B: replaces port ordering with bypass and priority logic.
    pub(crate) fn convert_port_dependency_to_logic(&mut self, circuit: &mut Circuit) -> GraphResult<()> {
        if !self.begin(MemoryPhase::HazardsResolved)? {
            return Ok(());
        }

        for read_port in self.read_ports.clone() {
            // closest predecessor first, so the latest write ends up in the outermost mux
            let writes: Vec<NodeId> = circuit
                .ordering_chain(read_port.node)
                .into_iter()
                .filter(|n| self.write_ports.iter().any(|wp| wp.node == *n))
                .collect();
            for write_port in writes {
                let fixup = self.lazy_fixup_group(circuit)?;
                build_in(circuit, fixup, |c| forward_write_to_read(c, &read_port, write_port))?;
            }
        }

        let writes: Vec<NodeId> = self.write_ports.iter().map(|wp| wp.node).collect();
        for &first in &writes {
            for &second in &writes {
                if first != second && circuit.is_ordered_before(first, second) {
                    let fixup = self.lazy_fixup_group(circuit)?;
                    build_in(circuit, fixup, |c| yield_to_later_write(c, first, second))?;
                }
            }
        }

        let mut last_read = None;
        for rp in &self.read_ports {
            match last_read {
                Some(prev) => circuit.order_after(rp.node, prev)?,
                None => circuit.disconnect_input(rp.node, mem_port::ORDER_AFTER)?,
            }
            last_read = Some(rp.node);
        }
        for wp in &self.write_ports {
            match last_read {
                Some(prev) => circuit.order_after(wp.node, prev)?,
                None => circuit.disconnect_input(wp.node, mem_port::ORDER_AFTER)?,
            }
        }

        self.phase = MemoryPhase::HazardsResolved;
        Ok(())
    }
}

/// Read-after-write: forwards the write data when both ports hit the same address.
fn forward_write_to_read(circuit: &mut Circuit, read_port: &ReadPort, write_port: NodeId) -> GraphResult<()> {
    check_write_enable(circuit, write_port)?;
    let Some(mut write_data) = circuit.driver(write_port, mem_port::WR_DATA) else {
        internal_bail!("{write_port} writes no data");
    };

    let mut conflict = build_conflict(circuit, read_port.node, write_port)?;

    // the forwarded data has to arrive together with the registered read data
    if let Some(sync_reg) = read_port.sync_read_data_reg {
        delay_like(circuit, sync_reg, &mut write_data, "delayedWrData")?;
        delay_like(circuit, sync_reg, &mut conflict, "delayedConflict")?;
        if read_port.output_reg.is_some() {
            delay_like(circuit, sync_reg, &mut write_data, "delayed_2_WrData")?;
            delay_like(circuit, sync_reg, &mut conflict, "delayed_2_Conflict")?;
        }
    }

    let mux = insert_bypass_mux(circuit, read_port.data_output, conflict, write_data)?;
    debug!(
        "{mux} forwards writes of {write_port} to reads of {}",
        read_port.node
    );
    Ok(())
}

/// Delays `port` by one register wired like `reference`.
fn delay_like(circuit: &mut Circuit, reference: NodeId, port: &mut NodePort, name: &str) -> GraphResult<()> {
    let clock = circuit.node(reference).clock();
    let ty = circuit.output_type(*port).clone();
    let reg = circuit.add_register(clock, ty);
    circuit.set_comment(
        reg,
        "The memory read is delayed by a register, so the bypass path is delayed as well.",
    );
    for input in [register::ENABLE, register::RESET_VALUE] {
        let driver = circuit.driver(reference, input);
        connect_driver(circuit, reg, input, driver)?;
    }
    circuit.connect_input(reg, register::DATA, *port)?;
    *port = NodePort::new(reg, 0);
    circuit.append_signal(port, name)?;
    Ok(())
}

/// Write-after-write: disables `first` whenever `second` writes the same address.
fn yield_to_later_write(circuit: &mut Circuit, first: NodeId, second: NodeId) -> GraphResult<()> {
    check_write_enable(circuit, first)?;
    check_write_enable(circuit, second)?;

    let compare = circuit.add_compare(CompareOp::Neq);
    circuit.set_comment(compare, "The former write may go ahead if the addresses differ.");
    let first_address = circuit.driver(first, mem_port::ADDRESS);
    let second_address = circuit.driver(second, mem_port::ADDRESS);
    connect_driver(circuit, compare, 0, first_address)?;
    connect_driver(circuit, compare, 1, second_address)?;

    let mut enable = NodePort::new(compare, 0);
    circuit.append_signal(&mut enable, "newWrEn")?;

    if let Some(second_enable) = circuit.driver(second, mem_port::ENABLE) {
        let not = circuit.add_logic(LogicOp::Not);
        circuit.connect_input(not, 0, second_enable)?;
        let or = circuit.add_logic(LogicOp::Or);
        circuit.set_comment(or, "The former write may also go ahead if the latter is disabled.");
        circuit.connect_input(or, 0, enable)?;
        circuit.connect_input(or, 1, NodePort::new(not, 0))?;
        enable = NodePort::new(or, 0);
        circuit.append_signal(&mut enable, "newWrEn")?;
    }

    if let Some(first_enable) = circuit.driver(first, mem_port::ENABLE) {
        enable = and_gate(circuit, enable, first_enable)?;
        circuit.set_comment(enable.node, "The former write only happens if it was enabled.");
        circuit.append_signal(&mut enable, "newWrEn")?;
    }

    circuit.connect_input(first, mem_port::ENABLE, enable)?;
    circuit.connect_input(first, mem_port::WR_ENABLE, enable)?;
    debug!("{first} yields to {second} on address collisions");
    Ok(())
}
