use std::collections::VecDeque;

use itertools::Itertools;
use log::{debug, trace};
use num_bigint::BigUint;
use num_traits::Zero;
use smallvec::SmallVec;

use super::SimulatorCallbacks;
use super::eval::{self, Slot};
use crate::bit_state::{BITS_PER_WORD, BitVectorState, Plane, bit_mask_range};
use crate::error::{DesignError, DesignErrorKind, GraphResult};
use crate::graph::{Circuit, ClockId, Node, NodeId, NodeKind, NodePort, mem_port, mux, register};
use crate::{HashMap, internal_assert, internal_bail};

#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    /// Load register reset values on power-on.
    pub reset_registers_on_power_on: bool,
    /// Report writes with an undefined enable or address through `on_warning`.
    pub warn_on_undefined_write: bool,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            reset_registers_on_power_on: true,
            warn_on_undefined_write: true,
        }
    }
}

/// A fluent builder for a [`Simulator`]. Obtain one with [`Simulator::builder`].
pub struct SimulatorBuilder<'c> {
    circuit: &'c Circuit,
    options: SimulatorOptions,
    callbacks: Option<Box<dyn SimulatorCallbacks + 'c>>,
}

impl<'c> SimulatorBuilder<'c> {
    pub fn new(circuit: &'c Circuit) -> Self {
        Self {
            circuit,
            options: SimulatorOptions::default(),
            callbacks: None,
        }
    }

    pub fn options(mut self, options: SimulatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn reset_registers_on_power_on(mut self, enable: bool) -> Self {
        self.options.reset_registers_on_power_on = enable;
        self
    }

    pub fn warn_on_undefined_write(mut self, enable: bool) -> Self {
        self.options.warn_on_undefined_write = enable;
        self
    }

    pub fn callbacks(mut self, callbacks: impl SimulatorCallbacks + 'c) -> Self {
        self.callbacks = Some(Box::new(callbacks));
        self
    }

    /// Lays out the state, orders the combinational nodes and powers on.
    pub fn build(self) -> GraphResult<Simulator<'c>> {
        let circuit = self.circuit;
        let mut layout = LayoutAllocator::default();

        let outputs: Vec<SmallVec<[Option<Slot>; 2]>> = circuit
            .nodes()
            .map(|(_, node)| {
                (0..node.num_outputs())
                    .map(|o| {
                        let ty = node.output_type(o);
                        (!ty.is_dependency()).then(|| layout.allocate(ty.width))
                    })
                    .collect()
            })
            .collect();

        let inputs: Vec<SmallVec<[Option<Slot>; 4]>> = circuit
            .nodes()
            .map(|(_, node)| {
                (0..node.num_inputs())
                    .map(|i| node.driver(i).and_then(|d| outputs[d.node.index()][d.port]))
                    .collect()
            })
            .collect();

        let memories: HashMap<NodeId, MemoryLayout> = circuit
            .nodes()
            .filter_map(|(id, node)| {
                let info = node.as_memory()?;
                Some((id, layout.allocate_memory(info.words, info.word_width)))
            })
            .collect();

        let clocked: Vec<NodeId> = circuit
            .nodes()
            .filter(|(_, node)| node.is_register() || node.is_write_port())
            .map(|(id, _)| id)
            .collect();

        let schedule = combinational_order(circuit)?;
        debug!(
            "simulating {} nodes, {} scheduled, {} state bits",
            circuit.num_nodes(),
            schedule.len(),
            layout.size
        );

        let mut simulator = Simulator {
            circuit,
            options: self.options,
            callbacks: self.callbacks,
            state: BitVectorState::new(layout.size),
            outputs,
            inputs,
            memories,
            schedule,
            clocked,
            tick: 0,
            dirty: true,
        };
        simulator.power_on()?;
        Ok(simulator)
    }
}

#[derive(Debug, Default)]
struct LayoutAllocator {
    size: usize,
}

impl LayoutAllocator {
    /// Values up to one word never straddle a word boundary, wider values start on one.
    fn allocate(&mut self, width: usize) -> Slot {
        if width > BITS_PER_WORD || self.size % BITS_PER_WORD + width > BITS_PER_WORD {
            self.size = self.size.next_multiple_of(BITS_PER_WORD);
        }
        let slot = Slot::new(self.size, width);
        self.size += width;
        slot
    }

    fn allocate_memory(&mut self, words: usize, word_width: usize) -> MemoryLayout {
        let base = self.size.next_multiple_of(BITS_PER_WORD);
        let stride = if word_width <= BITS_PER_WORD {
            word_width.next_power_of_two()
        } else {
            word_width.next_multiple_of(BITS_PER_WORD)
        };
        self.size = base + stride * words;
        MemoryLayout {
            base,
            stride,
            words,
            word_width,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MemoryLayout {
    base: usize,
    stride: usize,
    words: usize,
    word_width: usize,
}

impl MemoryLayout {
    fn word(&self, index: usize) -> Slot {
        Slot::new(self.base + index * self.stride, self.word_width)
    }

    fn span(&self) -> Slot {
        Slot::new(self.base, self.stride * self.words)
    }
}

fn is_scheduled(node: &Node) -> bool {
    match node.kind() {
        NodeKind::Signal
        | NodeKind::Arithmetic(_)
        | NodeKind::Logic(_)
        | NodeKind::Compare(_)
        | NodeKind::Multiplexer { .. }
        | NodeKind::MemPort { .. } => true,
        NodeKind::Pin
        | NodeKind::OutputPin
        | NodeKind::Constant(_)
        | NodeKind::Register
        | NodeKind::Memory(_) => false,
    }
}

/// Kahn ordering of the nodes evaluated every cycle. Registers, pins and
/// constants are sources, dependency edges carry no data.
fn combinational_order(circuit: &Circuit) -> GraphResult<Vec<NodeId>> {
    let mut pending = vec![0usize; circuit.num_nodes()];
    let mut ready = VecDeque::new();
    let mut scheduled = 0;

    for (id, node) in circuit.nodes() {
        if !is_scheduled(node) {
            continue;
        }
        scheduled += 1;
        for input in 0..node.num_inputs() {
            let Some(driver) = node.driver(input) else {
                continue;
            };
            if !circuit.output_type(driver).is_dependency() && is_scheduled(circuit.node(driver.node)) {
                pending[id.index()] += 1;
            }
        }
        if pending[id.index()] == 0 {
            ready.push_back(id);
        }
    }

    let mut order = Vec::with_capacity(scheduled);
    while let Some(id) = ready.pop_front() {
        order.push(id);
        let node = circuit.node(id);
        for output in 0..node.num_outputs() {
            if node.output_type(output).is_dependency() {
                continue;
            }
            for consumer in node.directly_driven(output) {
                if !is_scheduled(circuit.node(consumer.node)) {
                    continue;
                }
                let count = &mut pending[consumer.node.index()];
                *count -= 1;
                if *count == 0 {
                    ready.push_back(consumer.node);
                }
            }
        }
    }

    if order.len() == scheduled {
        return Ok(order);
    }
    let looped: Vec<NodeId> = circuit
        .nodes()
        .filter(|(id, node)| is_scheduled(node) && pending[id.index()] > 0)
        .map(|(id, _)| id)
        .collect();
    let mut err = DesignError::new(
        DesignErrorKind::CombinationalLoop,
        format!(
            "combinational loop through {}",
            looped.iter().map(|id| id.to_string()).join(", ")
        ),
    );
    for id in looped {
        err = err.with_site(circuit.provenance(id, "node in loop"));
    }
    Err(err.into())
}

enum Latch {
    Load(BitVectorState),
    Hold,
    Poison,
}

enum WriteAction {
    Store(usize, BitVectorState),
    PoisonWord(usize),
    PoisonAll,
}

/// Cycle-based simulation of a finished circuit.
///
/// Combinational values are re-evaluated lazily: pin changes only mark the
/// state dirty and the next read or clock edge brings it up to date.
pub struct Simulator<'c> {
    circuit: &'c Circuit,
    options: SimulatorOptions,
    callbacks: Option<Box<dyn SimulatorCallbacks + 'c>>,
    state: BitVectorState,
    outputs: Vec<SmallVec<[Option<Slot>; 2]>>,
    inputs: Vec<SmallVec<[Option<Slot>; 4]>>,
    memories: HashMap<NodeId, MemoryLayout>,
    schedule: Vec<NodeId>,
    clocked: Vec<NodeId>,
    tick: u64,
    dirty: bool,
}

impl<'c> Simulator<'c> {
    pub fn builder(circuit: &'c Circuit) -> SimulatorBuilder<'c> {
        SimulatorBuilder::new(circuit)
    }

    pub fn new(circuit: &'c Circuit) -> GraphResult<Self> {
        SimulatorBuilder::new(circuit).build()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Clears all state, loads constants and memory contents and applies register resets.
    pub fn power_on(&mut self) -> GraphResult<()> {
        let circuit = self.circuit;
        self.state = BitVectorState::new(self.state.len());
        self.tick = 0;

        for (id, node) in circuit.nodes() {
            match node.kind() {
                NodeKind::Constant(value) => {
                    if let Some(out) = self.outputs[id.index()][0] {
                        internal_assert!(value.len() == out.width, "{id} changed width");
                        self.state.insert_state(value, out.offset);
                    }
                }
                NodeKind::Memory(info) => {
                    let (Some(initial), Some(layout)) = (&info.initial, self.memories.get(&id)) else {
                        continue;
                    };
                    internal_assert!(
                        initial.len() >= info.size(),
                        "initial contents of {id} hold {} of {} bits",
                        initial.len(),
                        info.size()
                    );
                    for word in 0..layout.words {
                        let slot = layout.word(word);
                        self.state
                            .copy_range(slot.offset, initial, word * layout.word_width, slot.width);
                    }
                }
                _ => {}
            }
        }
        self.evaluate()?;

        if self.options.reset_registers_on_power_on {
            let resets: Vec<(Slot, BitVectorState)> = self
                .clocked
                .iter()
                .filter(|&&id| circuit.node(id).is_register())
                .filter_map(|&id| {
                    let out = self.outputs[id.index()][0]?;
                    let reset = self.inputs[id.index()][register::RESET_VALUE]?;
                    Some((out, self.sample(Some(reset), out.width)))
                })
                .collect();
            for (out, value) in resets {
                self.state.insert_state(&value, out.offset);
            }
            self.evaluate()?;
        }
        self.debug_message("power on");
        Ok(())
    }

    fn evaluate(&mut self) -> GraphResult<()> {
        for i in 0..self.schedule.len() {
            self.evaluate_node(self.schedule[i])?;
        }
        self.dirty = false;
        Ok(())
    }

    fn refresh(&mut self) -> GraphResult<()> {
        if self.dirty {
            self.evaluate()?;
        }
        Ok(())
    }

    fn evaluate_node(&mut self, id: NodeId) -> GraphResult<()> {
        let circuit = self.circuit;
        let node = circuit.node(id);
        let Some(out) = self.outputs[id.index()].first().copied().flatten() else {
            return Ok(());
        };
        if node.is_mem_port() {
            return self.evaluate_read(id, out);
        }
        let inputs = &self.inputs[id.index()];
        let input = |i: usize| inputs.get(i).copied().flatten();
        let state = &mut self.state;

        match node.kind() {
            NodeKind::Signal => eval::forward(state, out, input(0)),
            NodeKind::Arithmetic(op) => {
                let interpretation = node.output_type(0).interpretation;
                eval::arithmetic(*op, interpretation, state, out, input(0), input(1))?
            }
            NodeKind::Logic(op) => eval::logic(*op, state, out, input(0), input(1))?,
            NodeKind::Compare(op) => eval::compare(*op, state, out, input(0), input(1))?,
            NodeKind::Multiplexer { .. } => {
                let choices = inputs.get(mux::SELECTOR + 1..).unwrap_or_default();
                eval::multiplexer(state, out, input(mux::SELECTOR), choices)?
            }
            _ => {}
        }
        Ok(())
    }

    /// Asynchronous read of the current memory contents.
    fn evaluate_read(&mut self, id: NodeId, out: Slot) -> GraphResult<()> {
        let inputs = &self.inputs[id.index()];
        let layout = self
            .circuit
            .driver(id, mem_port::MEMORY)
            .and_then(|m| self.memories.get(&m.node).copied());
        let input = |i: usize| inputs.get(i).copied().flatten();
        let enabled = self.flag(input(mem_port::ENABLE))?;
        let address = self.scalar(input(mem_port::ADDRESS))?;

        match (layout, enabled, address) {
            (Some(layout), Some(true), Some(address)) if (address as usize) < layout.words => {
                let word = layout.word(address as usize);
                eval::forward(&mut self.state, out, Some(word));
            }
            _ => eval::undefine(&mut self.state, out),
        }
        Ok(())
    }

    /// An unconnected flag counts as set, an undefined one as unknown.
    fn flag(&self, slot: Option<Slot>) -> GraphResult<Option<bool>> {
        match slot {
            None => Ok(Some(true)),
            Some(slot) => Ok(self.scalar(Some(slot))?.map(|v| v != 0)),
        }
    }

    fn scalar(&self, slot: Option<Slot>) -> GraphResult<Option<u64>> {
        let Some(slot) = slot else {
            return Ok(None);
        };
        internal_assert!(slot.width <= BITS_PER_WORD, "{} bit control value", slot.width);
        if slot.width == 0 {
            return Ok(Some(0));
        }
        let defined = self.state.extract_non_straddling(Plane::Defined, slot.offset, slot.width);
        if defined != bit_mask_range(0, slot.width) {
            return Ok(None);
        }
        Ok(Some(self.state.extract_non_straddling(Plane::Value, slot.offset, slot.width)))
    }

    /// `width` bits read from `slot`, zero extended. Undefined if there is no slot.
    fn sample(&self, slot: Option<Slot>, width: usize) -> BitVectorState {
        let mut value = BitVectorState::new(width);
        if let Some(slot) = slot {
            let copied = width.min(slot.width);
            value.copy_range(0, &self.state, slot.offset, copied);
            value.set_range(Plane::Defined, copied, width - copied, true);
        }
        value
    }

    /// Latches every register and applies every write port on `clock`, then re-evaluates.
    ///
    /// Reads and register inputs see the values from before the edge.
    pub fn advance_clock(&mut self, clock: ClockId) -> GraphResult<()> {
        self.refresh()?;
        let circuit = self.circuit;

        let mut latches = Vec::new();
        let mut writes = Vec::new();
        let mut warnings = Vec::new();
        for &id in &self.clocked {
            let node = circuit.node(id);
            if node.clock() != Some(clock) {
                continue;
            }
            let inputs = &self.inputs[id.index()];
            if node.is_register() {
                let Some(out) = self.outputs[id.index()][0] else {
                    continue;
                };
                let latch = match self.flag(inputs[register::ENABLE])? {
                    Some(true) => Latch::Load(self.sample(inputs[register::DATA], out.width)),
                    Some(false) => Latch::Hold,
                    None => Latch::Poison,
                };
                latches.push((out, latch));
            } else if let Some(write) = self.sample_write(id, &mut warnings)? {
                writes.push(write);
            }
        }

        for (out, latch) in latches {
            match latch {
                Latch::Load(value) => self.state.insert_state(&value, out.offset),
                Latch::Hold => {}
                Latch::Poison => eval::undefine(&mut self.state, out),
            }
        }
        for (layout, action) in writes {
            match action {
                WriteAction::Store(index, value) => {
                    self.state.insert_state(&value, layout.word(index).offset)
                }
                WriteAction::PoisonWord(index) => eval::undefine(&mut self.state, layout.word(index)),
                WriteAction::PoisonAll => eval::undefine(&mut self.state, layout.span()),
            }
        }
        if self.options.warn_on_undefined_write {
            for warning in warnings {
                self.warn(&warning);
            }
        }

        self.tick += 1;
        trace!("tick {} on {clock}", self.tick);
        if let Some(callbacks) = self.callbacks.as_mut() {
            callbacks.on_new_tick(self.tick);
            callbacks.on_clock(circuit.clock(clock), true);
        }
        self.evaluate()
    }

    fn sample_write(
        &self,
        id: NodeId,
        warnings: &mut Vec<String>,
    ) -> GraphResult<Option<(MemoryLayout, WriteAction)>> {
        let Some(memory) = self.circuit.driver(id, mem_port::MEMORY) else {
            return Ok(None);
        };
        let Some(&layout) = self.memories.get(&memory.node) else {
            internal_bail!("{id} writes to {} which is not a memory", memory.node);
        };
        let inputs = &self.inputs[id.index()];
        let enabled = match (
            self.flag(inputs[mem_port::ENABLE])?,
            self.flag(inputs[mem_port::WR_ENABLE])?,
        ) {
            (Some(false), _) | (_, Some(false)) => return Ok(None),
            (Some(true), Some(true)) => true,
            _ => false,
        };
        let address = self.scalar(inputs[mem_port::ADDRESS])?;

        let action = match address {
            Some(address) if address as usize >= layout.words => {
                warnings.push(format!(
                    "{id} writes to address {address} beyond {} words",
                    layout.words
                ));
                return Ok(None);
            }
            Some(address) if enabled => WriteAction::Store(
                address as usize,
                self.sample(inputs[mem_port::WR_DATA], layout.word_width),
            ),
            Some(address) => {
                warnings.push(format!("{id} may write address {address}: enable is undefined"));
                WriteAction::PoisonWord(address as usize)
            }
            None => {
                warnings.push(format!(
                    "{id} writes to an undefined address, memory {} is lost",
                    memory.node
                ));
                WriteAction::PoisonAll
            }
        };
        Ok(Some((layout, action)))
    }

    fn warn(&mut self, message: &str) {
        debug!("{message}");
        if let Some(callbacks) = self.callbacks.as_mut() {
            callbacks.on_warning(message);
        }
    }

    fn debug_message(&mut self, message: &str) {
        if let Some(callbacks) = self.callbacks.as_mut() {
            callbacks.on_debug_message(message);
        }
    }

    fn pin_slot(&self, pin: NodeId) -> GraphResult<Slot> {
        internal_assert!(
            matches!(self.circuit.node(pin).kind(), NodeKind::Pin),
            "{pin} is not an input pin"
        );
        let Some(slot) = self.outputs[pin.index()][0] else {
            internal_bail!("{pin} carries no value");
        };
        Ok(slot)
    }

    pub fn set_pin(&mut self, pin: NodeId, value: u64) -> GraphResult<()> {
        let slot = self.pin_slot(pin)?;
        internal_assert!(slot.width <= BITS_PER_WORD, "{pin} needs set_pin_wide");
        self.state.insert_non_straddling(
            Plane::Value,
            slot.offset,
            slot.width,
            value & bit_mask_range(0, slot.width),
        );
        self.state.set_range(Plane::Defined, slot.offset, slot.width, true);
        self.dirty = true;
        Ok(())
    }

    pub fn set_pin_wide(&mut self, pin: NodeId, value: &BigUint) -> GraphResult<()> {
        let slot = self.pin_slot(pin)?;
        let digits = value.to_u64_digits();
        for (i, start) in (0..slot.width).step_by(BITS_PER_WORD).enumerate() {
            let size = BITS_PER_WORD.min(slot.width - start);
            let word = digits.get(i).copied().unwrap_or(0);
            self.state.insert(Plane::Value, slot.offset + start, size, word);
        }
        self.state.set_range(Plane::Defined, slot.offset, slot.width, true);
        self.dirty = true;
        Ok(())
    }

    pub fn set_pin_undefined(&mut self, pin: NodeId) -> GraphResult<()> {
        let slot = self.pin_slot(pin)?;
        eval::undefine(&mut self.state, slot);
        self.dirty = true;
        Ok(())
    }

    fn output_slot(&self, port: NodePort) -> GraphResult<Slot> {
        let Some(slot) = self.outputs[port.node.index()].get(port.port).copied().flatten() else {
            internal_bail!("{port} carries no value");
        };
        Ok(slot)
    }

    /// The current value of an output, both planes.
    pub fn value(&mut self, port: NodePort) -> GraphResult<BitVectorState> {
        self.refresh()?;
        let slot = self.output_slot(port)?;
        Ok(self.state.extract_state(slot.offset, slot.width))
    }

    /// The current value of an output, `None` unless every bit is defined.
    pub fn value_u64(&mut self, port: NodePort) -> GraphResult<Option<u64>> {
        self.refresh()?;
        let slot = self.output_slot(port)?;
        self.scalar(Some(slot))
    }

    pub fn value_wide(&mut self, port: NodePort) -> GraphResult<Option<BigUint>> {
        let value = self.value(port)?;
        if !value.is_fully_defined() {
            return Ok(None);
        }
        let mut result = BigUint::zero();
        for (i, &word) in value.data(Plane::Value).iter().enumerate() {
            result |= BigUint::from(word) << (i * BITS_PER_WORD);
        }
        Ok(Some(result))
    }

    pub fn memory_word(&self, memory: NodeId, index: usize) -> GraphResult<BitVectorState> {
        let Some(layout) = self.memories.get(&memory) else {
            internal_bail!("{memory} is not a memory");
        };
        internal_assert!(
            index < layout.words,
            "{memory} has {} words, not {index}",
            layout.words
        );
        let slot = layout.word(index);
        Ok(self.state.extract_state(slot.offset, slot.width))
    }
}
