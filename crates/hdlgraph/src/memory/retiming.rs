use std::collections::BTreeSet;

use log::debug;

use super::group::{MemoryGroup, MemoryPhase, ReadPort};
use super::{build_conflict, build_in, check_write_enable, connect_driver, insert_bypass_mux};
use crate::error::{DesignError, DesignErrorKind, GraphResult};
use crate::graph::{
    Circuit, ClockId, Exploration, GroupId, MemoryKind, NodeId, NodePort, mem_port, register,
};
use crate::{internal_assert, internal_bail};

/// What sits between an asynchronous read and the registers behind it.
#[derive(Debug, Default)]
struct RetimingPlan {
    write_port: Option<NodeId>,
    registers: Vec<NodeId>,
    /// Combinational nodes that end up one cycle later and need their other inputs delayed.
    delayed: BTreeSet<NodeId>,
}

impl MemoryGroup {
    /// Phase C: pulls registers behind asynchronous block memory reads in front of the logic.
    pub(crate) fn attempt_register_retiming(&mut self, circuit: &mut Circuit) -> GraphResult<()> {
        if !self.begin(MemoryPhase::Retimed)? {
            return Ok(());
        }
        let Some(info) = circuit.node(self.memory()).as_memory() else {
            internal_bail!("{} is not a memory", self.memory());
        };
        if info.kind == MemoryKind::Block {
            for i in 0..self.read_ports.len() {
                if self.read_ports[i].sync_read_data_reg.is_some() {
                    continue;
                }
                let mut read_port = self.read_ports[i].clone();
                internal_assert!(
                    read_port.output_reg.is_none(),
                    "{} has an output register but no data register",
                    read_port.node
                );
                self.retime_read_port(circuit, &mut read_port)?;
                self.read_ports[i] = read_port;
            }
        }
        self.phase = MemoryPhase::Retimed;
        Ok(())
    }

    fn retime_read_port(&mut self, circuit: &mut Circuit, read_port: &mut ReadPort) -> GraphResult<()> {
        let plan = self.plan_retiming(circuit, read_port)?;
        check_feedback(circuit, read_port, &plan)?;
        let clock = self.retiming_clock(circuit, read_port, &plan)?;
        let enable = retiming_enable(circuit, &plan)?;

        let sync_reg = insert_delay_output(circuit, &mut read_port.data_output, clock, enable)?;
        circuit.move_to_group(sync_reg, self.group());
        read_port.sync_read_data_reg = Some(sync_reg);

        for &reg in &plan.registers {
            circuit.bypass_output_to_input(reg, 0, register::DATA)?;
            debug!("retimed {reg} into {sync_reg}");
        }

        for &node in &plan.delayed {
            for input in 0..circuit.node(node).num_inputs() {
                let Some(driver) = circuit.driver(node, input) else {
                    continue;
                };
                if circuit.output_type(driver).is_dependency()
                    || plan.delayed.contains(&driver.node)
                    || driver.node == sync_reg
                {
                    continue;
                }
                let group = circuit.node(node).group();
                insert_delay_input(circuit, node, input, clock, enable, group)?;
            }
        }

        if let Some(write_port) = plan.write_port {
            let fixup = self.lazy_fixup_group(circuit)?;
            build_in(circuit, fixup, |c| {
                forward_retimed_write(c, read_port, write_port, clock, enable, fixup)
            })?;
        }
        debug!(
            "{} reads synchronously through {sync_reg} after retiming",
            read_port.node
        );
        Ok(())
    }

    fn plan_retiming(&self, circuit: &Circuit, read_port: &ReadPort) -> GraphResult<RetimingPlan> {
        let mut plan = RetimingPlan::default();
        let fail = |kind, message: &str, node: NodeId, role| -> crate::GraphError {
            DesignError::new(
                kind,
                format!("asynchronous read cannot become synchronous: {message}"),
            )
            .with_site(circuit.provenance(read_port.node, "read port"))
            .with_site(circuit.provenance(node, role))
            .into()
        };

        let mut walk = Exploration::new(circuit, read_port.data_output).skip_dependencies();
        while let Some(port) = walk.next(circuit) {
            let node = circuit.node(port.node);
            if node.is_mem_port() {
                let memory = circuit.driver(port.node, mem_port::MEMORY).map(|d| d.node);
                if node.is_write_port() {
                    if memory != Some(self.memory()) {
                        return Err(fail(
                            DesignErrorKind::AsyncReadFeedsMemory,
                            "it feeds a write port of another memory",
                            port.node,
                            "write port",
                        ));
                    }
                    if plan.write_port.is_some() {
                        return Err(fail(
                            DesignErrorKind::AsyncReadFeedsMemory,
                            "it feeds more than one write port of its own memory",
                            port.node,
                            "second write port",
                        ));
                    }
                    plan.write_port = Some(port.node);
                    walk.backtrack();
                } else if node.is_read_port() {
                    if !memory.is_some_and(|m| is_read_only(circuit, m)) {
                        return Err(fail(
                            DesignErrorKind::AsyncReadFeedsMemory,
                            "it addresses a memory that is written to",
                            port.node,
                            "second read port",
                        ));
                    }
                    // a ROM lookup is combinational and gets delayed like any other logic
                    plan.delayed.insert(port.node);
                } else {
                    walk.backtrack();
                }
            } else if node.is_register() {
                if circuit.non_signal_driver(port.node, register::RESET_VALUE).is_some() {
                    return Err(fail(
                        DesignErrorKind::ResetBlocksRetiming,
                        "a register behind it has a reset value",
                        port.node,
                        "register",
                    ));
                }
                plan.registers.push(port.node);
                walk.backtrack();
            } else if !node.is_combinational() || node.has_side_effects() {
                return Err(fail(
                    DesignErrorKind::NonCombinationalInRetiming,
                    "it feeds a node that is not combinational",
                    port.node,
                    "offending node",
                ));
            } else {
                plan.delayed.insert(port.node);
            }
        }
        Ok(plan)
    }

    /// The clock shared by the write port and registers found behind the read.
    fn retiming_clock(&self, circuit: &Circuit, read_port: &ReadPort, plan: &RetimingPlan) -> GraphResult<ClockId> {
        let mut clocked = plan.write_port.iter().chain(&plan.registers).copied();
        let reference = clocked.next();
        if let Some(reference) = reference {
            let clock = circuit.node(reference).clock();
            let differing: Vec<NodeId> = clocked.filter(|&n| circuit.node(n).clock() != clock).collect();
            if !differing.is_empty() {
                let mut err = DesignError::new(
                    DesignErrorKind::ClockMismatch,
                    "asynchronous read cannot become synchronous: the registers behind it use differing clocks",
                )
                .with_site(circuit.provenance(read_port.node, "read port"))
                .with_site(circuit.provenance(reference, "register"));
                for node in differing {
                    err = err.with_site(circuit.provenance(node, "register on another clock"));
                }
                return Err(err.into());
            }
        }

        let clock = match reference {
            Some(reference) => circuit.node(reference).clock(),
            None => self.write_ports.first().and_then(|wp| circuit.node(wp.node).clock()),
        };
        match clock {
            Some(clock) => Ok(clock),
            None => {
                let mut err = DesignError::new(
                    DesignErrorKind::NoRetimingClock,
                    "asynchronous read cannot become synchronous: no clock to register it with",
                )
                .with_site(circuit.provenance(read_port.node, "read port"))
                .with_site(circuit.provenance(self.memory(), "memory"));
                if let Some(reference) = reference {
                    err = err.with_site(circuit.provenance(reference, "register without clock"));
                }
                Err(err.into())
            }
        }
    }
}

/// Registers fed back into the logic they would be moved across end up in a combinational loop.
fn check_feedback(circuit: &Circuit, read_port: &ReadPort, plan: &RetimingPlan) -> GraphResult<()> {
    for &reg in &plan.registers {
        let mut walk = Exploration::new(circuit, NodePort::new(reg, 0)).skip_dependencies();
        while let Some(port) = walk.next(circuit) {
            if plan.delayed.contains(&port.node) || port.node == read_port.node {
                return Err(DesignError::new(
                    DesignErrorKind::FeedbackInRetiming,
                    "asynchronous read cannot become synchronous: a register behind it feeds back into the read path",
                )
                .with_site(circuit.provenance(read_port.node, "read port"))
                .with_site(circuit.provenance(reg, "register"))
                .with_site(circuit.provenance(port.node, "fed back into"))
                .into());
            }
            if !circuit.node(port.node).is_signal() {
                walk.backtrack();
            }
        }
    }
    Ok(())
}

/// The enable shared by every register found behind the read, `None` when always enabled.
fn retiming_enable(circuit: &Circuit, plan: &RetimingPlan) -> GraphResult<Option<NodePort>> {
    let Some((&first, rest)) = plan.registers.split_first() else {
        return Ok(None);
    };
    let enable = circuit.non_signal_driver(first, register::ENABLE);
    let differing: Vec<NodeId> = rest
        .iter()
        .copied()
        .filter(|&n| circuit.non_signal_driver(n, register::ENABLE) != enable)
        .collect();
    if differing.is_empty() {
        return Ok(enable);
    }
    let mut err = DesignError::new(
        DesignErrorKind::EnableMismatchRetiming,
        "asynchronous read cannot become synchronous: the registers behind it use differing enables",
    )
    .with_site(circuit.provenance(first, "register"));
    for node in differing {
        err = err.with_site(circuit.provenance(node, "register with another enable"));
    }
    Err(err.into())
}

fn is_read_only(circuit: &Circuit, memory: NodeId) -> bool {
    circuit
        .directly_driven(NodePort::new(memory, 0))
        .iter()
        .all(|p| !circuit.node(p.node).is_write_port())
}

fn delay_register(
    circuit: &mut Circuit,
    data: NodePort,
    clock: ClockId,
    enable: Option<NodePort>,
) -> GraphResult<NodeId> {
    let ty = circuit.output_type(data).clone();
    let reg = circuit.add_register(Some(clock), ty);
    connect_driver(circuit, reg, register::ENABLE, enable)?;
    circuit.connect_input(reg, register::DATA, data)?;
    Ok(reg)
}

/// Registers `port` and moves all of its consumers behind the register.
fn insert_delay_output(
    circuit: &mut Circuit,
    port: &mut NodePort,
    clock: ClockId,
    enable: Option<NodePort>,
) -> GraphResult<NodeId> {
    let consumers = circuit.directly_driven(*port).to_vec();
    let reg = delay_register(circuit, *port, clock, enable)?;
    *port = NodePort::new(reg, 0);
    for consumer in consumers {
        circuit.connect_input(consumer.node, consumer.port, *port)?;
    }
    Ok(reg)
}

/// Puts a register between `input` of `node` and its driver. Unconnected inputs stay as they are.
fn insert_delay_input(
    circuit: &mut Circuit,
    node: NodeId,
    input: usize,
    clock: ClockId,
    enable: Option<NodePort>,
    group: GroupId,
) -> GraphResult<Option<NodeId>> {
    let Some(driver) = circuit.driver(node, input) else {
        return Ok(None);
    };
    let reg = delay_register(circuit, driver, clock, enable)?;
    circuit.move_to_group(reg, group);
    circuit.set_comment(reg, "Auto generated register");
    circuit.connect_input(node, input, NodePort::new(reg, 0))?;
    Ok(Some(reg))
}

/// Delays the write port fed by the retimed read and forwards its registered data.
fn forward_retimed_write(
    circuit: &mut Circuit,
    read_port: &ReadPort,
    write_port: NodeId,
    clock: ClockId,
    enable: Option<NodePort>,
    group: GroupId,
) -> GraphResult<()> {
    check_write_enable(circuit, write_port)?;
    let Some(write_data) = circuit.driver(write_port, mem_port::WR_DATA) else {
        internal_bail!("{write_port} writes no data");
    };
    let delayed_data = delay_register(circuit, write_data, clock, enable)?;

    insert_delay_input(circuit, write_port, mem_port::ADDRESS, clock, enable, group)?;
    insert_delay_input(circuit, write_port, mem_port::ENABLE, clock, enable, group)?;
    let write_enable = circuit.driver(write_port, mem_port::ENABLE);
    connect_driver(circuit, write_port, mem_port::WR_ENABLE, write_enable)?;

    let conflict = build_conflict(circuit, read_port.node, write_port)?;
    insert_bypass_mux(
        circuit,
        read_port.data_output,
        conflict,
        NodePort::new(delayed_data, 0),
    )?;
    debug!("{write_port} delayed to follow the retimed read of {}", read_port.node);
    Ok(())
}
