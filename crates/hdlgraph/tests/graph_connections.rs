mod common;

use common::out;
use hdlgraph::{
    ArithmeticOp, Circuit, ConnectionType, Exploration, Interpretation, LogicOp, NodePort,
};

#[test]
fn test_connections_are_mirrored() {
    let mut c = Circuit::new();
    let a = c.add_pin(ConnectionType::bitvec(8));
    let b = c.add_pin(ConnectionType::bitvec(8));
    let add = c.add_arithmetic(ArithmeticOp::Add);
    c.connect_input(add, 0, out(a)).unwrap();
    c.connect_input(add, 1, out(b)).unwrap();

    assert_eq!(c.driver(add, 0), Some(out(a)));
    assert_eq!(c.directly_driven(out(a)), &[NodePort::new(add, 0)]);
    assert_eq!(c.directly_driven(out(b)), &[NodePort::new(add, 1)]);

    c.connect_input(add, 1, out(a)).unwrap();
    assert!(c.directly_driven(out(b)).is_empty());
    assert_eq!(c.directly_driven(out(a)).len(), 2);

    c.disconnect_input(add, 0).unwrap();
    assert_eq!(c.driver(add, 0), None);
    assert_eq!(c.directly_driven(out(a)), &[NodePort::new(add, 1)]);
}

#[test]
fn test_non_signal_driver_walks_long_chains() {
    let mut c = Circuit::new();
    let pin = c.add_pin(ConnectionType::bitvec(4));
    let mut port = out(pin);
    for i in 0..1000 {
        c.append_signal(&mut port, format!("s{i}")).unwrap();
    }
    let not = c.add_logic(LogicOp::Not);
    c.connect_input(not, 0, port).unwrap();

    assert_eq!(c.non_signal_driver(not, 0), Some(out(pin)));
    assert_eq!(c.output_type(out(not)).width, 4);
}

#[test]
fn test_non_signal_driver_detects_signal_loops() {
    let mut c = Circuit::new();
    let first = c.add_signal();
    let mut last = first;
    for _ in 0..450 {
        let next = c.add_signal();
        c.connect_input(next, 0, out(last)).unwrap();
        last = next;
    }
    c.connect_input(first, 0, out(last)).unwrap();
    let not = c.add_logic(LogicOp::Not);
    c.connect_input(not, 0, out(last)).unwrap();

    assert_eq!(c.non_signal_driver(not, 0), None);

    let single = c.add_signal();
    c.connect_input(single, 0, out(single)).unwrap();
    assert_eq!(c.non_signal_driver(single, 0), None);
}

#[test]
fn test_exploration_visits_each_port_once() {
    let mut c = Circuit::new();
    let pin = c.add_pin(ConnectionType::bool());
    let and = c.add_logic(LogicOp::And);
    c.connect_input(and, 0, out(pin)).unwrap();
    c.connect_input(and, 1, out(pin)).unwrap();
    let not = c.add_logic(LogicOp::Not);
    c.connect_input(not, 0, out(and)).unwrap();

    let mut walk = Exploration::new(&c, out(pin));
    let mut seen = Vec::new();
    while let Some(port) = walk.next(&c) {
        seen.push(port);
    }
    assert_eq!(seen, vec![NodePort::new(and, 0), NodePort::new(not, 0)]);
}

#[test]
fn test_constant_keeps_its_interpretation() {
    let mut c = Circuit::new();
    let constant = c.add_constant(hdlgraph::BitVectorState::from_u64(1, 1), Interpretation::Bool);
    assert_eq!(c.output_type(out(constant)).interpretation, Interpretation::Bool);
    assert_eq!(c.output_type(out(constant)).width, 1);
}
