use criterion::{Criterion, criterion_group, criterion_main};
use hdlgraph::{
    ArithmeticOp, Circuit, ClockId, ConnectionType, NodeId, NodePort, Simulator, register,
};

const N: usize = 1000;

/// `N` independent 32 bit counters on one clock, each reset to 0.
fn counters() -> (Circuit, ClockId, Vec<NodeId>) {
    let mut c = Circuit::new();
    let clk = c.create_clock("clk");
    let one = c.add_constant_u64(1, 32);
    let zero = c.add_constant_u64(0, 32);
    let regs = (0..N)
        .map(|_| {
            let reg = c.add_register(Some(clk), ConnectionType::bitvec(32));
            let add = c.add_arithmetic(ArithmeticOp::Add);
            c.connect_input(add, 0, NodePort::new(reg, 0)).unwrap();
            c.connect_input(add, 1, NodePort::new(one, 0)).unwrap();
            c.connect_input(reg, register::DATA, NodePort::new(add, 0)).unwrap();
            c.connect_input(reg, register::RESET_VALUE, NodePort::new(zero, 0)).unwrap();
            reg
        })
        .collect();
    (c, clk, regs)
}

fn benchmark_counter(c: &mut Criterion) {
    let (circuit, clk, regs) = counters();

    c.bench_function("simulation_build_counters_n1000", |b| {
        b.iter(|| {
            let _sim = Simulator::new(&circuit).unwrap();
        })
    });

    let mut sim = Simulator::new(&circuit).unwrap();
    c.bench_function("simulation_tick_counters_n1000_x1", |b| {
        b.iter(|| {
            sim.advance_clock(clk).unwrap();
        })
    });

    c.bench_function("simulation_tick_counters_n1000_x1000", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                sim.advance_clock(clk).unwrap();
            }
            sim.value_u64(NodePort::new(regs[0], 0)).unwrap()
        })
    });
}

criterion_group!(benches, benchmark_counter);
criterion_main!(benches);
