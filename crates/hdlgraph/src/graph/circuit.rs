use log::trace;
use smallvec::smallvec;

use super::{
    Clock, ClockId, ConnectionType, ConstructionSite, GroupId, GroupKind, Interpretation,
    MemoryInfo, Node, NodeGroup, NodeId, NodeKind, NodePort, OutputSlot, mem_port, mux,
    register,
};
use crate::bit_state::BitVectorState;
use crate::error::{DesignError, DesignErrorKind, GraphResult, Provenance};
use crate::graph::{ArithmeticOp, CompareOp, LogicOp};
use crate::memory::MemoryGroup;
use crate::{HashMap, internal_assert, internal_bail};

/// Hops before the first checkpoint refresh when resolving through signal
/// chains. The interval doubles with every refresh.
const LOOP_CHECK_INTERVAL: usize = 200;

/// Owns every node, group, clock and memory group of a design.
///
/// All cross references are [`NodeId`]/[`GroupId`]/[`ClockId`] handles into
/// this arena. Cheap accessors index directly and panic on a foreign handle;
/// structural edits return [`GraphResult`].
#[derive(Debug, Clone)]
pub struct Circuit {
    nodes: Vec<Node>,
    groups: Vec<NodeGroup>,
    clocks: Vec<Clock>,
    insertion_group: GroupId,
    pub(crate) memory_groups: HashMap<GroupId, MemoryGroup>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl Circuit {
    #[track_caller]
    pub fn new() -> Self {
        let root = NodeGroup::new(GroupKind::Entity, "root", None, ConstructionSite::caller());
        Self {
            nodes: Vec::new(),
            groups: vec![root],
            clocks: Vec::new(),
            insertion_group: GroupId(0),
            memory_groups: HashMap::default(),
        }
    }

    // --- node creation ---

    #[track_caller]
    fn create_node(
        &mut self,
        kind: NodeKind,
        inputs: usize,
        outputs: &[ConnectionType],
        clock: Option<Option<ClockId>>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let group = self.insertion_group;
        self.nodes.push(Node {
            kind,
            inputs: smallvec![None; inputs],
            outputs: outputs.iter().cloned().map(OutputSlot::new).collect(),
            clocks: clock.into_iter().collect(),
            group,
            name: None,
            comment: None,
            site: ConstructionSite::caller(),
        });
        self.groups[group.index()].nodes.push(id);
        id
    }

    #[track_caller]
    pub fn add_signal(&mut self) -> NodeId {
        self.create_node(NodeKind::Signal, 1, &[ConnectionType::default()], None)
    }

    #[track_caller]
    pub fn add_pin(&mut self, ty: ConnectionType) -> NodeId {
        self.create_node(NodeKind::Pin, 0, &[ty], None)
    }

    #[track_caller]
    pub fn add_output_pin(&mut self) -> NodeId {
        self.create_node(NodeKind::OutputPin, 1, &[], None)
    }

    #[track_caller]
    pub fn add_constant(&mut self, value: BitVectorState, interpretation: Interpretation) -> NodeId {
        let ty = ConnectionType {
            interpretation,
            width: value.len(),
            fixed_point_denominator: 1,
            ..Default::default()
        };
        self.create_node(NodeKind::Constant(value), 0, &[ty], None)
    }

    /// A fully defined bit vector constant.
    #[track_caller]
    pub fn add_constant_u64(&mut self, value: u64, width: usize) -> NodeId {
        self.add_constant(BitVectorState::from_u64(value, width), Interpretation::BitVec)
    }

    #[track_caller]
    pub fn add_arithmetic(&mut self, op: ArithmeticOp) -> NodeId {
        self.create_node(NodeKind::Arithmetic(op), 2, &[ConnectionType::default()], None)
    }

    #[track_caller]
    pub fn add_logic(&mut self, op: LogicOp) -> NodeId {
        self.create_node(NodeKind::Logic(op), op.num_inputs(), &[ConnectionType::default()], None)
    }

    #[track_caller]
    pub fn add_compare(&mut self, op: CompareOp) -> NodeId {
        self.create_node(NodeKind::Compare(op), 2, &[ConnectionType::bool()], None)
    }

    /// A multiplexer with a selector and `inputs` data inputs starting at input 1.
    #[track_caller]
    pub fn add_mux(&mut self, inputs: usize) -> NodeId {
        self.create_node(
            NodeKind::Multiplexer { inputs },
            inputs + 1,
            &[ConnectionType::default()],
            None,
        )
    }

    #[track_caller]
    pub fn add_register(&mut self, clock: Option<ClockId>, ty: ConnectionType) -> NodeId {
        self.create_node(NodeKind::Register, 3, &[ty], Some(clock))
    }

    #[track_caller]
    pub fn add_memory(&mut self, info: MemoryInfo) -> NodeId {
        self.create_node(NodeKind::Memory(info), 0, &[ConnectionType::dependency()], None)
    }

    /// Creates a port attached to `memory`. Roles follow from which slots get connected.
    #[track_caller]
    pub fn add_mem_port(&mut self, memory: NodeId, clock: Option<ClockId>) -> GraphResult<NodeId> {
        let Some(info) = self.node(memory).as_memory() else {
            internal_bail!("{memory} is not a memory");
        };
        let word_width = info.word_width;
        let port = self.create_node(
            NodeKind::MemPort { word_width },
            6,
            &[ConnectionType::bitvec(word_width), ConnectionType::dependency()],
            Some(clock),
        );
        self.connect_input(port, mem_port::MEMORY, NodePort::new(memory, 0))?;
        Ok(port)
    }

    /// A copy of `node` with the same kind, types, clock, name and group but no connections.
    #[track_caller]
    pub fn clone_unconnected(&mut self, node: NodeId) -> NodeId {
        let original = self.node(node);
        let copy = Node {
            kind: original.kind.clone(),
            inputs: smallvec![None; original.inputs.len()],
            outputs: original
                .outputs
                .iter()
                .map(|o| OutputSlot::new(o.ty.clone()))
                .collect(),
            clocks: original.clocks.clone(),
            group: original.group,
            name: original.name.clone(),
            comment: original.comment.clone(),
            site: ConstructionSite::caller(),
        };
        let id = NodeId(self.nodes.len() as u32);
        self.groups[copy.group.index()].nodes.push(id);
        self.nodes.push(copy);
        id
    }

    // --- lookup ---

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    pub fn set_name(&mut self, node: NodeId, name: impl Into<String>) {
        self.nodes[node.index()].name = Some(name.into());
    }

    pub fn set_comment(&mut self, node: NodeId, comment: impl Into<String>) {
        self.nodes[node.index()].comment = Some(comment.into());
    }

    pub fn driver(&self, node: NodeId, input: usize) -> Option<NodePort> {
        self.node(node).driver(input)
    }

    pub fn output_type(&self, port: NodePort) -> &ConnectionType {
        self.node(port.node).output_type(port.port)
    }

    /// Consumers of an output. Snapshot this before rewiring any of them.
    pub fn directly_driven(&self, port: NodePort) -> &[NodePort] {
        self.node(port.node).directly_driven(port.port)
    }

    pub fn set_clock(&mut self, node: NodeId, clock: Option<ClockId>) -> GraphResult<()> {
        let slots = &mut self.nodes[node.index()].clocks;
        internal_assert!(!slots.is_empty(), "{node} has no clock slot");
        slots[0] = clock;
        Ok(())
    }

    pub fn provenance(&self, node: NodeId, role: &'static str) -> Provenance {
        let n = self.node(node);
        Provenance {
            role,
            node,
            kind: n.kind.name(),
            name: n.name.clone(),
            site: n.site,
        }
    }

    // --- connections ---

    /// Drives `input` of `node` from `driver`, replacing any previous driver.
    pub fn connect_input(&mut self, node: NodeId, input: usize, driver: NodePort) -> GraphResult<()> {
        internal_assert!(
            input < self.node(node).num_inputs(),
            "{node} has no input {input}"
        );
        internal_assert!(
            driver.node.index() < self.nodes.len()
                && driver.port < self.node(driver.node).num_outputs(),
            "{driver} is not an output"
        );
        if self.driver(node, input) == Some(driver) {
            return Ok(());
        }
        self.disconnect_input(node, input)?;

        self.nodes[node.index()].inputs[input] = Some(driver);
        self.nodes[driver.node.index()].outputs[driver.port]
            .driven
            .push(NodePort::new(node, input));
        self.update_output_type(node, input)
    }

    pub fn disconnect_input(&mut self, node: NodeId, input: usize) -> GraphResult<()> {
        internal_assert!(
            input < self.node(node).num_inputs(),
            "{node} has no input {input}"
        );
        let Some(driver) = self.driver(node, input) else {
            return Ok(());
        };
        let consumer = NodePort::new(node, input);
        let driven = &mut self.nodes[driver.node.index()].outputs[driver.port].driven;
        let Some(pos) = driven.iter().position(|p| *p == consumer) else {
            internal_bail!("{driver} does not list {consumer} as a consumer");
        };
        driven.swap_remove(pos);
        self.nodes[node.index()].inputs[input] = None;
        Ok(())
    }

    /// The first driver of `input` that is not a pass-through signal.
    ///
    /// Returns `None` for an unconnected input and for signal loops.
    pub fn non_signal_driver(&self, node: NodeId, input: usize) -> Option<NodePort> {
        let mut driver = self.driver(node, input)?;
        let mut checkpoint = driver.node;
        let mut hops = 0;
        let mut interval = LOOP_CHECK_INTERVAL;
        while self.node(driver.node).is_signal() {
            driver = self.driver(driver.node, 0)?;
            if driver.node == checkpoint {
                return None;
            }
            hops += 1;
            if hops == interval {
                checkpoint = driver.node;
                hops = 0;
                interval *= 2;
            }
        }
        Some(driver)
    }

    /// Moves every consumer of `output` onto the driver of `input`.
    pub fn bypass_output_to_input(&mut self, node: NodeId, output: usize, input: usize) -> GraphResult<()> {
        let source = self.driver(node, input);
        let bypassed = NodePort::new(node, output);
        internal_assert!(
            source != Some(bypassed),
            "{bypassed} cannot bypass to itself"
        );
        // the consumer list shrinks with every rewire
        while let Some(&consumer) = self.directly_driven(bypassed).first() {
            match source {
                Some(source) => self.connect_input(consumer.node, consumer.port, source)?,
                None => self.disconnect_input(consumer.node, consumer.port)?,
            }
        }
        Ok(())
    }

    /// Inserts a named signal after `port`, moves the consumers behind it and
    /// points `port` at the signal.
    #[track_caller]
    pub fn append_signal(&mut self, port: &mut NodePort, name: impl Into<String>) -> GraphResult<NodeId> {
        let consumers = self.directly_driven(*port).to_vec();
        let signal = self.add_signal();
        self.set_name(signal, name);
        self.connect_input(signal, 0, *port)?;
        let output = NodePort::new(signal, 0);
        for consumer in consumers {
            self.connect_input(consumer.node, consumer.port, output)?;
        }
        *port = output;
        Ok(signal)
    }

    pub fn resize_inputs(&mut self, node: NodeId, count: usize) -> GraphResult<()> {
        for input in count..self.node(node).num_inputs() {
            self.disconnect_input(node, input)?;
        }
        self.nodes[node.index()].inputs.resize(count, None);
        Ok(())
    }

    pub fn resize_outputs(&mut self, node: NodeId, count: usize) -> GraphResult<()> {
        for output in count..self.node(node).num_outputs() {
            let consumers = self.directly_driven(NodePort::new(node, output)).to_vec();
            for consumer in consumers {
                self.disconnect_input(consumer.node, consumer.port)?;
            }
        }
        self.nodes[node.index()].outputs.resize(count, OutputSlot::default());
        Ok(())
    }

    /// Changes an output type. Fails once the output has consumers.
    pub fn set_output_connection_type(&mut self, port: NodePort, ty: ConnectionType) -> GraphResult<()> {
        let slot = &mut self.nodes[port.node.index()].outputs[port.port];
        if slot.ty == ty {
            return Ok(());
        }
        internal_assert!(
            slot.driven.is_empty(),
            "type of {port} cannot change after it is in use"
        );
        slot.ty = ty;
        Ok(())
    }

    fn update_output_type(&mut self, node: NodeId, input: usize) -> GraphResult<()> {
        let data_type = |c: &Self| c.driver(node, input).map(|d| c.output_type(d).clone());
        let derived = match &self.node(node).kind {
            NodeKind::Signal => data_type(self),
            NodeKind::Register if input == register::DATA => data_type(self),
            NodeKind::Multiplexer { .. } if input != mux::SELECTOR => data_type(self),
            NodeKind::Arithmetic(_) | NodeKind::Logic(_) => self.combined_operand_type(node)?,
            _ => None,
        };
        match derived {
            Some(ty) => self.set_output_connection_type(NodePort::new(node, 0), ty),
            None => Ok(()),
        }
    }

    fn combined_operand_type(&self, node: NodeId) -> GraphResult<Option<ConnectionType>> {
        let mut combined: Option<(ConnectionType, NodePort)> = None;
        for input in 0..self.node(node).num_inputs() {
            let Some(driver) = self.driver(node, input) else {
                continue;
            };
            let ty = self.output_type(driver);
            if let Some((current, first)) = combined.as_mut() {
                if current.interpretation != ty.interpretation {
                    let message = format!(
                        "operands of {node} mix {:?} and {:?} interpretations",
                        current.interpretation, ty.interpretation
                    );
                    return Err(DesignError::new(DesignErrorKind::InterpretationMismatch, message)
                        .with_site(self.provenance(node, "operation"))
                        .with_site(self.provenance(first.node, "first operand"))
                        .with_site(self.provenance(driver.node, "second operand"))
                        .into());
                }
                current.width = current.width.max(ty.width);
            } else {
                combined = Some((ty.clone(), driver));
            }
        }
        Ok(combined.map(|(ty, _)| ty))
    }

    // --- ordering ---

    /// Orders memory port `node` after `predecessor`, replacing any previous predecessor.
    pub fn order_after(&mut self, node: NodeId, predecessor: NodeId) -> GraphResult<()> {
        internal_assert!(
            self.node(node).is_mem_port() && self.node(predecessor).is_mem_port(),
            "only memory ports can be ordered"
        );
        self.connect_input(
            node,
            mem_port::ORDER_AFTER,
            NodePort::new(predecessor, mem_port::ORDER_BEFORE),
        )
    }

    /// True if `node` is a transitive predecessor of `other` in the port ordering.
    pub fn is_ordered_before(&self, node: NodeId, other: NodeId) -> bool {
        if !self.node(node).is_mem_port() || !self.node(other).is_mem_port() {
            return false;
        }
        let mut current = other;
        for _ in 0..self.nodes.len() {
            let Some(pred) = self.driver(current, mem_port::ORDER_AFTER) else {
                return false;
            };
            if !self.node(pred.node).is_mem_port() {
                return false;
            }
            if pred.node == node {
                return true;
            }
            current = pred.node;
        }
        false
    }

    pub fn is_ordered_after(&self, node: NodeId, other: NodeId) -> bool {
        self.is_ordered_before(other, node)
    }

    /// Predecessors of `node` in the port ordering, closest first.
    pub(crate) fn ordering_chain(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = node;
        while let Some(pred) = self.driver(current, mem_port::ORDER_AFTER) {
            if !self.node(pred.node).is_mem_port() || chain.contains(&pred.node) || pred.node == node {
                break;
            }
            chain.push(pred.node);
            current = pred.node;
        }
        chain
    }

    // --- groups ---

    pub fn root_group(&self) -> GroupId {
        GroupId(0)
    }

    pub fn group(&self, id: GroupId) -> &NodeGroup {
        &self.groups[id.index()]
    }

    #[track_caller]
    pub fn add_child_group(&mut self, parent: GroupId, name: impl Into<String>) -> GroupId {
        self.push_group(GroupKind::Entity, name.into(), parent, ConstructionSite::caller())
    }

    /// A group dedicated to one memory and its ports.
    #[track_caller]
    pub fn add_memory_group(&mut self, parent: GroupId) -> GroupId {
        let id = self.push_group(GroupKind::Memory, "memory".into(), parent, ConstructionSite::caller());
        self.set_group_comment(id, "Auto generated");
        id
    }

    fn push_group(&mut self, kind: GroupKind, name: String, parent: GroupId, site: ConstructionSite) -> GroupId {
        let id = GroupId(self.groups.len() as u32);
        self.groups.push(NodeGroup::new(kind, name, Some(parent), site));
        self.groups[parent.index()].children.push(id);
        id
    }

    pub fn set_group_name(&mut self, group: GroupId, name: impl Into<String>) {
        self.groups[group.index()].name = name.into();
    }

    pub fn set_group_comment(&mut self, group: GroupId, comment: impl Into<String>) {
        self.groups[group.index()].comment = Some(comment.into());
    }

    pub fn move_to_group(&mut self, node: NodeId, group: GroupId) {
        let old = self.node(node).group;
        if old == group {
            return;
        }
        self.groups[old.index()].nodes.retain(|n| *n != node);
        self.groups[group.index()].nodes.push(node);
        self.nodes[node.index()].group = group;
        trace!("moved {node} from {old} to {group}");
    }

    /// Re-parents `group` under `new_parent`.
    pub fn move_group_into(&mut self, group: GroupId, new_parent: GroupId) -> GraphResult<()> {
        internal_assert!(group != self.root_group(), "the root group has no parent");
        let mut ancestor = Some(new_parent);
        while let Some(a) = ancestor {
            internal_assert!(a != group, "{group} cannot move into its own subtree");
            ancestor = self.group(a).parent;
        }
        if let Some(old) = self.group(group).parent {
            self.groups[old.index()].children.retain(|g| *g != group);
        }
        self.groups[new_parent.index()].children.push(group);
        self.groups[group.index()].parent = Some(new_parent);
        Ok(())
    }

    /// Sets the group new nodes are created in and returns the previous one.
    pub fn set_insertion_group(&mut self, group: GroupId) -> GroupId {
        std::mem::replace(&mut self.insertion_group, group)
    }

    pub fn insertion_group(&self) -> GroupId {
        self.insertion_group
    }

    // --- clocks ---

    pub fn create_clock(&mut self, name: impl Into<String>) -> ClockId {
        let id = ClockId(self.clocks.len() as u32);
        self.clocks.push(Clock { name: name.into() });
        id
    }

    pub fn clock(&self, id: ClockId) -> &Clock {
        &self.clocks[id.index()]
    }

    pub fn clocks(&self) -> impl Iterator<Item = (ClockId, &Clock)> {
        self.clocks
            .iter()
            .enumerate()
            .map(|(i, c)| (ClockId(i as u32), c))
    }

    // --- memory groups ---

    pub fn memory_group(&self, group: GroupId) -> Option<&MemoryGroup> {
        self.memory_groups.get(&group)
    }

    /// The memory group formed around the memory node `memory`.
    pub fn memory_group_of(&self, memory: NodeId) -> Option<&MemoryGroup> {
        self.memory_groups.values().find(|g| g.memory() == memory)
    }

    pub fn memory_groups(&self) -> impl Iterator<Item = &MemoryGroup> {
        self.memory_groups.values()
    }
}
