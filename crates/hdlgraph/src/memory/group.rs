use log::{debug, trace};

use crate::error::{DesignError, DesignErrorKind, GraphResult};
use crate::graph::{Circuit, GroupId, MemoryKind, NodeId, NodePort, mem_port, register};
use crate::{internal_assert, internal_bail};

/// Lowering progress of a [`MemoryGroup`]. Phases complete strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemoryPhase {
    Created,
    Formed,
    HazardsResolved,
    Retimed,
    Verified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePort {
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPort {
    pub node: NodeId,
    /// Where the read value leaves the group: the port itself or the last fused register.
    pub data_output: NodePort,
    pub sync_read_data_reg: Option<NodeId>,
    pub output_reg: Option<NodeId>,
}

impl ReadPort {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            data_output: NodePort::new(node, mem_port::RD_DATA),
            sync_read_data_reg: None,
            output_reg: None,
        }
    }

    /// Number of register stages fused behind the port.
    pub fn register_stages(&self) -> usize {
        usize::from(self.sync_read_data_reg.is_some()) + usize::from(self.output_reg.is_some())
    }
}

/// One memory node plus the ports and registers that make up its access logic.
#[derive(Debug, Clone)]
pub struct MemoryGroup {
    group: GroupId,
    memory: NodeId,
    pub(super) write_ports: Vec<WritePort>,
    pub(super) read_ports: Vec<ReadPort>,
    fixup_group: Option<GroupId>,
    pub(super) phase: MemoryPhase,
}

impl MemoryGroup {
    pub(crate) fn new(group: GroupId, memory: NodeId) -> Self {
        Self {
            group,
            memory,
            write_ports: Vec::new(),
            read_ports: Vec::new(),
            fixup_group: None,
            phase: MemoryPhase::Created,
        }
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn memory(&self) -> NodeId {
        self.memory
    }

    pub fn write_ports(&self) -> &[WritePort] {
        &self.write_ports
    }

    pub fn read_ports(&self) -> &[ReadPort] {
        &self.read_ports
    }

    pub fn fixup_group(&self) -> Option<GroupId> {
        self.fixup_group
    }

    pub fn phase(&self) -> MemoryPhase {
        self.phase
    }

    /// Whether `phase` still has to run. Completed phases are skipped,
    /// skipping ahead is an internal error.
    pub(super) fn begin(&self, phase: MemoryPhase) -> GraphResult<bool> {
        if self.phase >= phase {
            return Ok(false);
        }
        internal_assert!(
            self.phase as u8 + 1 == phase as u8,
            "{phase:?} cannot run while {} is at {:?}",
            self.group,
            self.phase
        );
        Ok(true)
    }

    pub(super) fn skip_phase(&mut self, phase: MemoryPhase) -> GraphResult<()> {
        if self.begin(phase)? {
            self.phase = phase;
        }
        Ok(())
    }

    /// The helper group that receives synthesized logic, created on first use.
    ///
    /// It takes the memory group's place under its parent and adopts the memory group.
    pub(super) fn lazy_fixup_group(&mut self, circuit: &mut Circuit) -> GraphResult<GroupId> {
        if let Some(group) = self.fixup_group {
            return Ok(group);
        }
        let parent = circuit.group(self.group).parent().unwrap_or(circuit.root_group());
        let fixup = circuit.add_child_group(parent, "Memory_Helper");
        circuit.set_group_comment(
            fixup,
            "Auto generated to handle memory access hazards such as read during write and read modify write.",
        );
        circuit.move_group_into(self.group, fixup)?;
        self.fixup_group = Some(fixup);
        Ok(fixup)
    }

    /// Phase A: collects the ports of the memory and fuses read registers.
    pub(crate) fn form_around(&mut self, circuit: &mut Circuit) -> GraphResult<()> {
        if !self.begin(MemoryPhase::Formed)? {
            return Ok(());
        }
        circuit.move_to_group(self.memory, self.group);

        let mut ports: Vec<NodeId> = circuit
            .directly_driven(NodePort::new(self.memory, 0))
            .iter()
            .map(|p| p.node)
            .collect();
        ports.sort();
        ports.dedup();

        for port in ports {
            let node = circuit.node(port);
            internal_assert!(
                node.is_mem_port(),
                "{port} hangs off memory {} but is not a memory port",
                self.memory
            );
            let (is_read, is_write) = (node.is_read_port(), node.is_write_port());
            if is_read && is_write {
                return Err(DesignError::new(
                    DesignErrorKind::MixedReadWritePort,
                    "a memory port may either read or write, not both",
                )
                .with_site(circuit.provenance(port, "port"))
                .with_site(circuit.provenance(self.memory, "memory"))
                .into());
            }
            if is_write {
                circuit.move_to_group(port, self.group);
                self.write_ports.push(WritePort { node: port });
            } else if is_read {
                circuit.move_to_group(port, self.group);
                let mut read_port = ReadPort::new(port);
                self.fuse_read_registers(circuit, &mut read_port);
                self.read_ports.push(read_port);
            } else {
                trace!("{port} of {} is unused", self.memory);
            }
        }

        self.check_write_clocks(circuit)?;
        self.phase = MemoryPhase::Formed;
        Ok(())
    }

    fn fuse_read_registers(&self, circuit: &mut Circuit, read_port: &mut ReadPort) {
        let enable = circuit.non_signal_driver(read_port.node, mem_port::ENABLE);

        let Some((reg, path)) = registered_path(circuit, read_port.data_output) else {
            return;
        };
        // the register stands in for memory, so it has to follow the read enable and keep no reset
        if circuit.non_signal_driver(reg, register::ENABLE) != enable
            || circuit.non_signal_driver(reg, register::RESET_VALUE).is_some()
        {
            return;
        }
        for node in path.into_iter().chain([reg]) {
            circuit.move_to_group(node, self.group);
        }
        read_port.sync_read_data_reg = Some(reg);
        read_port.data_output = NodePort::new(reg, 0);
        debug!("fused {reg} as synchronous read register of {}", read_port.node);

        let Some((out, path)) = registered_path(circuit, read_port.data_output) else {
            return;
        };
        if circuit.node(out).clock() != circuit.node(reg).clock() {
            return;
        }
        for node in path.into_iter().chain([out]) {
            circuit.move_to_group(node, self.group);
        }
        read_port.output_reg = Some(out);
        read_port.data_output = NodePort::new(out, 0);
        debug!("fused {out} as output register of {}", read_port.node);
    }

    fn check_write_clocks(&self, circuit: &Circuit) -> GraphResult<()> {
        let Some((first, rest)) = self.write_ports.split_first() else {
            return Ok(());
        };
        let clock = circuit.node(first.node).clock();
        let offending: Vec<NodeId> = rest
            .iter()
            .map(|wp| wp.node)
            .filter(|&n| circuit.node(n).clock() != clock)
            .collect();
        if offending.is_empty() {
            return Ok(());
        }
        let mut err = DesignError::new(
            DesignErrorKind::WritePortClockMismatch,
            "all write ports of a memory must use the same clock",
        )
        .with_site(circuit.provenance(first.node, "write port"));
        for node in offending {
            err = err.with_site(circuit.provenance(node, "write port on another clock"));
        }
        Err(err.into())
    }

    /// Phase D: checks the lowered ports against what the memory kind supports.
    pub(crate) fn verify(&mut self, circuit: &Circuit) -> GraphResult<()> {
        if !self.begin(MemoryPhase::Verified)? {
            return Ok(());
        }
        let Some(info) = circuit.node(self.memory).as_memory() else {
            internal_bail!("{} is not a memory", self.memory);
        };
        let (reads, writes) = (self.read_ports.len(), self.write_ports.len());

        match info.kind {
            MemoryKind::Block => {
                let unregistered: Vec<NodeId> = self
                    .read_ports
                    .iter()
                    .filter(|rp| rp.sync_read_data_reg.is_none())
                    .map(|rp| rp.node)
                    .collect();
                if !unregistered.is_empty() {
                    let mut err = DesignError::new(
                        DesignErrorKind::MissingSyncRegister,
                        format!(
                            "memory cannot become block memory because {} read port(s) lack a data register",
                            unregistered.len()
                        ),
                    )
                    .with_site(circuit.provenance(self.memory, "memory"));
                    for node in unregistered {
                        err = err.with_site(circuit.provenance(node, "read port"));
                    }
                    return Err(err.into());
                }
                if reads + writes > 2 {
                    return Err(self.too_many_ports(
                        circuit,
                        format!("block memory supports 2 ports, found {}", reads + writes),
                    ));
                }
            }
            MemoryKind::Distributed => {
                if reads > 1 {
                    return Err(self.too_many_ports(
                        circuit,
                        format!("distributed memory supports 1 read port, found {reads}"),
                    ));
                }
                if writes > 1 {
                    return Err(self.too_many_ports(
                        circuit,
                        format!("distributed memory supports 1 write port, found {writes}"),
                    ));
                }
            }
        }
        self.phase = MemoryPhase::Verified;
        Ok(())
    }

    fn too_many_ports(&self, circuit: &Circuit, message: String) -> crate::GraphError {
        let mut err = DesignError::new(DesignErrorKind::TooManyPorts, message)
            .with_site(circuit.provenance(self.memory, "memory"));
        for rp in &self.read_ports {
            err = err.with_site(circuit.provenance(rp.node, "read port"));
        }
        for wp in &self.write_ports {
            err = err.with_site(circuit.provenance(wp.node, "write port"));
        }
        err.into()
    }
}

/// Follows an unbranched chain of signals from `output` to the data input of a register.
fn registered_path(circuit: &Circuit, output: NodePort) -> Option<(NodeId, Vec<NodeId>)> {
    let mut path = Vec::new();
    let mut port = output;
    for _ in 0..circuit.num_nodes() {
        let [next] = circuit.directly_driven(port) else {
            return None;
        };
        let node = circuit.node(next.node);
        if node.is_register() {
            return (next.port == register::DATA).then_some((next.node, path));
        }
        if !node.is_signal() {
            return None;
        }
        path.push(next.node);
        port = NodePort::new(next.node, 0);
    }
    None
}
