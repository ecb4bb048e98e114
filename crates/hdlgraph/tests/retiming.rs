mod common;

use common::*;
use hdlgraph::{
    ArithmeticOp, Circuit, ClockId, CompareOp, ConnectionType, DesignErrorKind, LogicOp,
    MemoryKind, MemoryPassOptions, MemoryPhase, NodeId, NodeKind, Simulator,
    build_explicit_memory_circuitry, build_explicit_memory_circuitry_with, find_memory_groups,
    mem_port, mux, register,
};

struct Lookup {
    circuit: Circuit,
    memory: NodeId,
    clock: ClockId,
    address: NodeId,
    read: NodeId,
    pin: NodeId,
}

/// An asynchronous block memory read feeding NOT and then a register.
fn inverted_lookup() -> Lookup {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let memory = c.add_memory(counting_memory(8, 8, MemoryKind::Block));
    let address = c.add_pin(ConnectionType::bitvec(3));
    let read = read_port(&mut c, memory, address);
    let not = c.add_logic(LogicOp::Not);
    c.connect_input(not, 0, rd_data(read)).unwrap();
    let reg = register_of(&mut c, clock, out(not));
    let pin = c.add_output_pin();
    c.connect_input(pin, 0, out(reg)).unwrap();
    Lookup {
        circuit: c,
        memory,
        clock,
        address,
        read,
        pin,
    }
}

fn trace(lookup: &Lookup, addresses: &[u64]) -> Vec<Option<u64>> {
    let port = lookup.circuit.driver(lookup.pin, 0).unwrap();
    let mut sim = Simulator::new(&lookup.circuit).unwrap();
    let mut seen = vec![sim.value_u64(port).unwrap()];
    for &address in addresses {
        sim.set_pin(lookup.address, address).unwrap();
        sim.advance_clock(lookup.clock).unwrap();
        seen.push(sim.value_u64(port).unwrap());
    }
    seen
}

#[test]
fn test_register_moves_in_front_of_logic() {
    let mut lookup = inverted_lookup();
    find_memory_groups(&mut lookup.circuit).unwrap();
    build_explicit_memory_circuitry(&mut lookup.circuit).unwrap();

    let c = &lookup.circuit;
    let group = c.memory_group_of(lookup.memory).unwrap();
    assert_eq!(group.phase(), MemoryPhase::Verified);
    let read_port = &group.read_ports()[0];
    let sync = read_port.sync_read_data_reg.unwrap();
    assert_eq!(c.driver(sync, register::DATA), Some(rd_data(lookup.read)));
    assert_eq!(c.node(sync).clock(), Some(lookup.clock));
    assert_eq!(c.node(sync).group(), group.group());

    let not = c.driver(lookup.pin, 0).unwrap().node;
    assert!(matches!(c.node(not).kind(), NodeKind::Logic(LogicOp::Not)));
    assert_eq!(c.driver(not, 0), Some(out(sync)));
}

#[test]
fn test_retimed_lookup_is_cycle_equivalent() {
    let addresses = [0, 3, 3, 7, 1, 0, 5];
    let original = trace(&inverted_lookup(), &addresses);

    let mut lookup = inverted_lookup();
    find_memory_groups(&mut lookup.circuit).unwrap();
    build_explicit_memory_circuitry(&mut lookup.circuit).unwrap();
    let retimed = trace(&lookup, &addresses);

    assert_eq!(original, retimed);
    assert_eq!(retimed[1], Some(!0x01 & 0xFF));
    assert_eq!(retimed[2], Some(!0x31 & 0xFF));
}

#[test]
fn test_registers_on_differing_clocks() {
    let mut c = Circuit::new();
    let fast = c.create_clock("fast");
    let slow = c.create_clock("slow");
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let read = read_port(&mut c, memory, address);
    let first = register_of(&mut c, fast, rd_data(read));
    let second = register_of(&mut c, slow, rd_data(read));

    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::ClockMismatch);
    assert!(err.implicates(read));
    assert!(err.implicates(first));
    assert!(err.implicates(second));
}

#[test]
fn test_reset_value_blocks_retiming() {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let read = read_port(&mut c, memory, address);
    let not = c.add_logic(LogicOp::Not);
    c.connect_input(not, 0, rd_data(read)).unwrap();
    let reg = register_of(&mut c, clock, out(not));
    let zero = c.add_constant_u64(0, 8);
    c.connect_input(reg, register::RESET_VALUE, out(zero)).unwrap();

    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::ResetBlocksRetiming);
    assert!(err.implicates(reg));
}

#[test]
fn test_output_pin_blocks_retiming() {
    let mut c = Circuit::new();
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let read = read_port(&mut c, memory, address);
    let pin = c.add_output_pin();
    c.connect_input(pin, 0, rd_data(read)).unwrap();

    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::NonCombinationalInRetiming);
    assert!(err.implicates(pin));
}

#[test]
fn test_read_feeding_another_memory() {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let source = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let target = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let en = bool_pin(&mut c);
    let read = read_port(&mut c, source, address);
    let write = c.add_mem_port(target, Some(clock)).unwrap();
    c.connect_input(write, mem_port::ADDRESS, out(address)).unwrap();
    c.connect_input(write, mem_port::ENABLE, out(en)).unwrap();
    c.connect_input(write, mem_port::WR_ENABLE, out(en)).unwrap();
    c.connect_input(write, mem_port::WR_DATA, rd_data(read)).unwrap();

    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::AsyncReadFeedsMemory);
    assert!(err.implicates(write));
}

#[test]
fn test_read_without_clock_source() {
    let mut c = Circuit::new();
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let read = read_port(&mut c, memory, address);
    let not = c.add_logic(LogicOp::Not);
    c.connect_input(not, 0, rd_data(read)).unwrap();

    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::NoRetimingClock);
    assert!(err.implicates(memory));
}

#[test]
fn test_retiming_can_be_disabled() {
    let mut lookup = inverted_lookup();
    find_memory_groups(&mut lookup.circuit).unwrap();
    let options = MemoryPassOptions {
        retime_block_memories: false,
        verify: false,
    };
    build_explicit_memory_circuitry_with(&mut lookup.circuit, &options).unwrap();

    let group = lookup.circuit.memory_group_of(lookup.memory).unwrap();
    assert_eq!(group.phase(), MemoryPhase::Verified);
    assert!(group.read_ports()[0].sync_read_data_reg.is_none());
}

#[test]
fn test_accumulator_feedback_blocks_retiming() {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let read = read_port(&mut c, memory, address);
    let add = c.add_arithmetic(ArithmeticOp::Add);
    c.connect_input(add, 0, rd_data(read)).unwrap();
    let acc = register_of(&mut c, clock, out(add));
    c.connect_input(add, 1, out(acc)).unwrap();
    assert!(Simulator::new(&c).is_ok());

    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::FeedbackInRetiming);
    assert!(err.implicates(read));
    assert!(err.implicates(acc));
    assert!(err.implicates(add));
    assert_eq!(c.driver(add, 1), Some(out(acc)));
}

#[test]
fn test_register_feeding_read_address_blocks_retiming() {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let memory = c.add_memory(memory_with(&[1, 2, 3, 0], 2, MemoryKind::Block));
    let read = c.add_mem_port(memory, None).unwrap();
    let not = c.add_logic(LogicOp::Not);
    c.connect_input(not, 0, rd_data(read)).unwrap();
    let pointer = register_of(&mut c, clock, out(not));
    let mut address = out(pointer);
    c.append_signal(&mut address, "pointer").unwrap();
    c.connect_input(read, mem_port::ADDRESS, address).unwrap();

    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::FeedbackInRetiming);
    assert!(err.implicates(pointer));
    assert!(err.implicates(read));
}

#[test]
fn test_register_without_clock() {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let data = c.add_pin(ConnectionType::bitvec(8));
    let en = bool_pin(&mut c);
    write_port(&mut c, memory, clock, address, data, en);
    let read = read_port(&mut c, memory, address);
    let not = c.add_logic(LogicOp::Not);
    c.connect_input(not, 0, rd_data(read)).unwrap();
    let reg = c.add_register(None, ConnectionType::bitvec(8));
    c.connect_input(reg, register::DATA, out(not)).unwrap();

    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::NoRetimingClock);
    assert!(err.implicates(reg));
    assert!(err.implicates(read));
}

#[test]
fn test_registers_with_differing_enables() {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let read = read_port(&mut c, memory, address);
    let not = c.add_logic(LogicOp::Not);
    c.connect_input(not, 0, rd_data(read)).unwrap();
    let inverted = register_of(&mut c, clock, out(not));
    let plain = register_of(&mut c, clock, rd_data(read));
    let first_en = bool_pin(&mut c);
    let second_en = bool_pin(&mut c);
    c.connect_input(inverted, register::ENABLE, out(first_en)).unwrap();
    c.connect_input(plain, register::ENABLE, out(second_en)).unwrap();

    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::EnableMismatchRetiming);
    assert!(err.implicates(inverted));
    assert!(err.implicates(plain));
}

#[test]
fn test_read_feeding_two_writes_of_its_memory() {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let en = bool_pin(&mut c);
    let read = read_port(&mut c, memory, address);
    let not = c.add_logic(LogicOp::Not);
    c.connect_input(not, 0, rd_data(read)).unwrap();
    let first = write_port(&mut c, memory, clock, address, not, en);
    let second = write_port(&mut c, memory, clock, address, not, en);

    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::AsyncReadFeedsMemory);
    assert!(err.message.contains("more than one write port"));
    assert!(err.implicates(read));
    assert!(err.implicates(second));
    assert!(!err.implicates(first));
}

#[test]
fn test_read_addressing_writable_memory() {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let index = c.add_memory(memory_with(&[3, 0, 2, 1], 2, MemoryKind::Block));
    let table = c.add_memory(counting_memory(4, 8, MemoryKind::Distributed));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let data = c.add_pin(ConnectionType::bitvec(8));
    let en = bool_pin(&mut c);
    write_port(&mut c, table, clock, address, data, en);

    let read = read_port(&mut c, index, address);
    let lookup = c.add_mem_port(table, None).unwrap();
    c.connect_input(lookup, mem_port::ADDRESS, rd_data(read)).unwrap();
    let reg = register_of(&mut c, clock, rd_data(lookup));
    let pin = c.add_output_pin();
    c.connect_input(pin, 0, out(reg)).unwrap();

    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::AsyncReadFeedsMemory);
    assert!(err.implicates(read));
    assert!(err.implicates(lookup));
}

/// An asynchronous block memory read addressing a ROM whose data is inverted and registered.
fn rom_lookup() -> (Lookup, NodeId) {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let memory = c.add_memory(memory_with(&[3, 0, 2, 1], 2, MemoryKind::Block));
    let rom = c.add_memory(memory_with(&[0x10, 0x20, 0x30, 0x40], 8, MemoryKind::Distributed));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let read = read_port(&mut c, memory, address);
    let lookup = c.add_mem_port(rom, None).unwrap();
    c.connect_input(lookup, mem_port::ADDRESS, rd_data(read)).unwrap();
    let not = c.add_logic(LogicOp::Not);
    c.connect_input(not, 0, rd_data(lookup)).unwrap();
    let reg = register_of(&mut c, clock, out(not));
    let pin = c.add_output_pin();
    c.connect_input(pin, 0, out(reg)).unwrap();
    let design = Lookup {
        circuit: c,
        memory,
        clock,
        address,
        read,
        pin,
    };
    (design, lookup)
}

#[test]
fn test_rom_lookup_is_delayed_with_the_logic() {
    let (mut design, lookup) = rom_lookup();
    find_memory_groups(&mut design.circuit).unwrap();
    build_explicit_memory_circuitry(&mut design.circuit).unwrap();

    let c = &design.circuit;
    let group = c.memory_group_of(design.memory).unwrap();
    assert_eq!(group.phase(), MemoryPhase::Verified);
    let sync = group.read_ports()[0].sync_read_data_reg.unwrap();
    assert_eq!(c.driver(lookup, mem_port::ADDRESS), Some(out(sync)));

    let not = c.driver(design.pin, 0).unwrap().node;
    assert!(matches!(c.node(not).kind(), NodeKind::Logic(LogicOp::Not)));
    assert_eq!(c.driver(not, 0), Some(rd_data(lookup)));
}

#[test]
fn test_retimed_rom_lookup_is_cycle_equivalent() {
    let addresses = [2, 0, 1, 1, 3, 2];
    let original = trace(&rom_lookup().0, &addresses);

    let (mut design, _) = rom_lookup();
    find_memory_groups(&mut design.circuit).unwrap();
    build_explicit_memory_circuitry(&mut design.circuit).unwrap();
    let retimed = trace(&design, &addresses);

    assert_eq!(original, retimed);
    assert_eq!(retimed[0], None);
    assert_eq!(retimed[1], Some(!0x30 & 0xFF));
    assert_eq!(retimed[2], Some(!0x40 & 0xFF));
}

struct ReadModifyWrite {
    circuit: Circuit,
    memory: NodeId,
    clock: ClockId,
    rd_addr: NodeId,
    wr_addr: NodeId,
    en: NodeId,
    one: NodeId,
    read: NodeId,
    add: NodeId,
    write: NodeId,
}

/// `mem[wr_addr] <= mem[rd_addr] + 1` on a block memory read asynchronously.
fn read_modify_write() -> ReadModifyWrite {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let rd_addr = c.add_pin(ConnectionType::bitvec(2));
    let wr_addr = c.add_pin(ConnectionType::bitvec(2));
    let en = bool_pin(&mut c);
    let one = c.add_constant_u64(1, 8);
    let read = read_port(&mut c, memory, rd_addr);
    let add = c.add_arithmetic(ArithmeticOp::Add);
    c.connect_input(add, 0, rd_data(read)).unwrap();
    c.connect_input(add, 1, out(one)).unwrap();
    let write = write_port(&mut c, memory, clock, wr_addr, add, en);
    ReadModifyWrite {
        circuit: c,
        memory,
        clock,
        rd_addr,
        wr_addr,
        en,
        one,
        read,
        add,
        write,
    }
}

/// The register driving `input` of `node`, asserting it delays `data` on `clock`.
fn delay_register(c: &Circuit, node: NodeId, input: usize, data: hdlgraph::NodePort, clock: ClockId) -> NodeId {
    let reg = c.non_signal_driver(node, input).unwrap().node;
    assert!(c.node(reg).is_register(), "{node} input {input} is not delayed");
    assert_eq!(c.driver(reg, register::DATA), Some(data));
    assert_eq!(c.node(reg).clock(), Some(clock));
    reg
}

#[test]
fn test_read_modify_write_is_delayed_and_forwarded() {
    let mut design = read_modify_write();
    find_memory_groups(&mut design.circuit).unwrap();
    build_explicit_memory_circuitry(&mut design.circuit).unwrap();

    let c = &design.circuit;
    let clock = design.clock;
    let group = c.memory_group_of(design.memory).unwrap();
    assert_eq!(group.phase(), MemoryPhase::Verified);
    let fixup = group.fixup_group().unwrap();
    let sync = group.read_ports()[0].sync_read_data_reg.unwrap();
    assert_eq!(c.driver(sync, register::DATA), Some(rd_data(design.read)));

    // address and enable of the write follow one cycle later
    let wr_addr = delay_register(c, design.write, mem_port::ADDRESS, out(design.wr_addr), clock);
    let wr_en = delay_register(c, design.write, mem_port::ENABLE, out(design.en), clock);
    assert_eq!(c.node(wr_addr).group(), fixup);
    assert_eq!(c.node(wr_en).group(), fixup);
    assert_eq!(c.driver(design.write, mem_port::WR_ENABLE), Some(out(wr_en)));
    assert_eq!(c.driver(design.write, mem_port::WR_DATA), Some(out(design.add)));
    delay_register(c, design.add, 1, out(design.one), clock);

    // the add reads the registered data, bypassed by the registered write data
    let bypass = c.non_signal_driver(design.add, 0).unwrap().node;
    assert!(matches!(c.node(bypass).kind(), NodeKind::Multiplexer { .. }));
    assert_eq!(c.driver(bypass, 1), Some(out(sync)));
    delay_register(c, bypass, 2, out(design.add), clock);

    let conflict = c.non_signal_driver(bypass, mux::SELECTOR).unwrap().node;
    assert!(matches!(c.node(conflict).kind(), NodeKind::Logic(LogicOp::And)));
    assert_eq!(c.driver(conflict, 1), Some(out(wr_en)));
    let compare = c.non_signal_driver(conflict, 0).unwrap().node;
    assert!(matches!(c.node(compare).kind(), NodeKind::Compare(CompareOp::Eq)));
    assert_eq!(c.driver(compare, 0), Some(out(design.rd_addr)));
    assert_eq!(c.driver(compare, 1), Some(out(wr_addr)));
}
