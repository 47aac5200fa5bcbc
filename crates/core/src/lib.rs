pub mod bus;
pub mod calculator;
pub mod metrics;
pub mod peripherals;
pub mod snapshot;

use std::any::Any;


#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Unmapped register access at {0:#x}")]
    UnmappedAccess(u64),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Trait for observing calculator loop activity in a modular way.
pub trait LoopObserver: std::fmt::Debug + Send + Sync {
    fn on_loop_start(&self) {}
    fn on_loop_stop(&self) {}
    fn on_iteration(&self, _n: u64) {}
    fn on_key_event(&self, _code: u32) {}
    fn on_display_write(&self, _value: u32) {}
}

/// Trait representing a word-wide memory-mapped peripheral.
///
/// Register reads and writes on real hardware do not fail; out-of-block
/// offsets read as zero and writes to undefined offsets are dropped.
pub trait Peripheral: std::fmt::Debug + Send {
    fn read(&self, offset: u64) -> u32;
    fn write(&mut self, offset: u64, value: u32);
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
}

/// Capability handed to the calculator loop: exactly the three register
/// accesses the firmware performs, nothing else. Infallible so the loop
/// body stays as close to the original polling code as possible.
pub trait KeyPorts {
    fn read_status(&self) -> u32;
    fn read_key_code(&self) -> u32;
    fn write_display(&mut self, value: u32);
}
