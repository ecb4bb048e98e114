mod common;

use common::*;
use hdlgraph::{
    Circuit, ConnectionType, DesignErrorKind, MemoryKind, MemoryPassOptions, MemoryPhase,
    build_explicit_memory_circuitry, build_explicit_memory_circuitry_with, find_memory_groups,
    mem_port,
};
use miette::Diagnostic;

fn two_reads(kind: MemoryKind) -> (Circuit, [hdlgraph::NodeId; 2]) {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let memory = c.add_memory(counting_memory(4, 8, kind));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let reads = [0, 1].map(|_| {
        let read = read_port(&mut c, memory, address);
        let not = c.add_logic(hdlgraph::LogicOp::Not);
        c.connect_input(not, 0, rd_data(read)).unwrap();
        register_of(&mut c, clock, out(not));
        read
    });
    (c, reads)
}

#[test]
fn test_unregistered_block_reads_are_reported_together() {
    let (mut c, reads) = two_reads(MemoryKind::Block);
    find_memory_groups(&mut c).unwrap();
    let options = MemoryPassOptions {
        retime_block_memories: false,
        ..Default::default()
    };
    let err = design_error(build_explicit_memory_circuitry_with(&mut c, &options));
    assert_eq!(err.kind, DesignErrorKind::MissingSyncRegister);
    assert!(reads.iter().all(|&r| err.implicates(r)));
    assert_eq!(
        err.code().map(|code| code.to_string()).as_deref(),
        Some("hdlgraph::verify::sync_read")
    );
    insta::assert_snapshot!(err.message, @"memory cannot become block memory because 2 read port(s) lack a data register");
}

#[test]
fn test_retiming_satisfies_block_verification() {
    let (mut c, _) = two_reads(MemoryKind::Block);
    find_memory_groups(&mut c).unwrap();
    build_explicit_memory_circuitry(&mut c).unwrap();
    let group = c.memory_groups().next().unwrap();
    assert_eq!(group.phase(), MemoryPhase::Verified);
    assert!(group.read_ports().iter().all(|rp| rp.sync_read_data_reg.is_some()));
    assert_eq!(group.read_ports().len() + group.write_ports().len(), 2);
}

#[test]
fn test_distributed_memory_takes_one_read_port() {
    let (mut c, reads) = two_reads(MemoryKind::Distributed);
    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::TooManyPorts);
    assert!(reads.iter().all(|&r| err.implicates(r)));
}

#[test]
fn test_block_memory_takes_two_ports() {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let data = c.add_pin(ConnectionType::bitvec(8));
    let en = bool_pin(&mut c);
    let writes: Vec<_> = (0..3)
        .map(|_| write_port(&mut c, memory, clock, address, data, en))
        .collect();

    find_memory_groups(&mut c).unwrap();
    let err = design_error(build_explicit_memory_circuitry(&mut c));
    assert_eq!(err.kind, DesignErrorKind::TooManyPorts);
    assert!(writes.iter().all(|&w| err.implicates(w)));
    assert!(err.report().contains("block memory supports 2 ports, found 3"));
}

#[test]
fn test_write_ports_share_a_clock() {
    let mut c = Circuit::new();
    let a = c.create_clock("a");
    let b = c.create_clock("b");
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Block));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let data = c.add_pin(ConnectionType::bitvec(8));
    let en = bool_pin(&mut c);
    write_port(&mut c, memory, a, address, data, en);
    let second = write_port(&mut c, memory, b, address, data, en);

    let err = design_error(find_memory_groups(&mut c));
    assert_eq!(err.kind, DesignErrorKind::WritePortClockMismatch);
    assert!(err.implicates(second));
}

#[test]
fn test_port_cannot_read_and_write() {
    let mut c = Circuit::new();
    let clock = c.create_clock("clk");
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Distributed));
    let address = c.add_pin(ConnectionType::bitvec(2));
    let data = c.add_pin(ConnectionType::bitvec(8));
    let en = bool_pin(&mut c);
    let port = write_port(&mut c, memory, clock, address, data, en);
    let pin = c.add_output_pin();
    c.connect_input(pin, 0, rd_data(port)).unwrap();

    let err = design_error(find_memory_groups(&mut c));
    assert_eq!(err.kind, DesignErrorKind::MixedReadWritePort);
    assert!(err.implicates(port));
    assert!(err.implicates(memory));
}

#[test]
fn test_unused_port_is_ignored() {
    let mut c = Circuit::new();
    let memory = c.add_memory(counting_memory(4, 8, MemoryKind::Distributed));
    let port = c.add_mem_port(memory, None).unwrap();
    let address = c.add_pin(ConnectionType::bitvec(2));
    c.connect_input(port, mem_port::ADDRESS, out(address)).unwrap();

    let groups = find_memory_groups(&mut c).unwrap();
    assert_eq!(groups.len(), 1);
    build_explicit_memory_circuitry(&mut c).unwrap();
    let group = c.memory_group(groups[0]).unwrap();
    assert!(group.read_ports().is_empty());
    assert!(group.write_ports().is_empty());
    assert!(find_memory_groups(&mut c).unwrap().is_empty());
}
