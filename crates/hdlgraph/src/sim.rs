//! Cycle-based two-state-plus-undefined simulation of a finished circuit.

mod callbacks;
pub mod eval;
mod simulator;

pub use callbacks::{LogOutput, SimulatorCallbacks};
pub use simulator::{Simulator, SimulatorBuilder, SimulatorOptions};
