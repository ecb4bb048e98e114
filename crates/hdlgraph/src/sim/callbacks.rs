use log::{debug, error, info, warn};

use crate::graph::Clock;

/// Observer notified by the simulator. Every method defaults to doing nothing.
pub trait SimulatorCallbacks {
    fn on_new_tick(&mut self, _tick: u64) {}
    fn on_clock(&mut self, _clock: &Clock, _rising_edge: bool) {}
    fn on_debug_message(&mut self, _message: &str) {}
    fn on_warning(&mut self, _message: &str) {}
    fn on_assert(&mut self, _message: &str) {}
}

/// Forwards simulator notifications to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOutput;

impl SimulatorCallbacks for LogOutput {
    fn on_new_tick(&mut self, tick: u64) {
        debug!("tick {tick}");
    }

    fn on_clock(&mut self, clock: &Clock, rising_edge: bool) {
        let edge = if rising_edge { "rising" } else { "falling" };
        debug!("{edge} edge on clock '{}'", clock.name());
    }

    fn on_debug_message(&mut self, message: &str) {
        info!("{message}");
    }

    fn on_warning(&mut self, message: &str) {
        warn!("{message}");
    }

    fn on_assert(&mut self, message: &str) {
        error!("assertion failed: {message}");
    }
}
