use crate::peripherals::display::SevenSegDisplay;
use crate::peripherals::keypad::{Keypad, KeypadState};
use crate::{KeyPorts, Peripheral, SimResult, SimulationError};
use keysum_config::BoardDescriptor;
use std::sync::Arc;

/// A named peripheral mapped at a fixed base address.
pub struct PeripheralEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub dev: Box<dyn Peripheral>,
}

/// Word-addressed system bus. Dispatches reads and writes to whichever
/// peripheral claims the address.
pub struct SystemBus {
    pub peripherals: Vec<PeripheralEntry>,
}

impl SystemBus {
    pub fn new() -> Self {
        Self {
            peripherals: Vec::new(),
        }
    }

    pub fn attach(&mut self, name: &str, base: u64, size: u64, dev: Box<dyn Peripheral>) {
        self.peripherals.push(PeripheralEntry {
            name: name.to_string(),
            base,
            size,
            dev,
        });
    }

    /// Build a bus with the keypad and display mapped at the addresses the
    /// board descriptor gives. Returns the shared keypad state alongside so
    /// a harness can inject key events after the bus is handed off.
    pub fn from_config(board: &BoardDescriptor) -> anyhow::Result<(Self, Arc<KeypadState>)> {
        board.validate()?;

        let keypad_state = Arc::new(KeypadState::default());
        let mut bus = Self::new();

        // The status word sits at a fixed offset from the key-code word, so
        // the keypad block is based at the key-code address.
        let status_offset = board.ports.status - board.ports.keycode;
        bus.attach(
            "keypad",
            board.ports.keycode,
            status_offset + 4,
            Box::new(Keypad::new(keypad_state.clone(), status_offset)),
        );
        bus.attach(
            "display",
            board.ports.display,
            4,
            Box::new(SevenSegDisplay::new()),
        );

        Ok((bus, keypad_state))
    }

    pub fn read_word(&self, addr: u64) -> SimResult<u32> {
        for entry in &self.peripherals {
            if addr >= entry.base && addr < entry.base + entry.size {
                return Ok(entry.dev.read(addr - entry.base));
            }
        }
        Err(SimulationError::UnmappedAccess(addr))
    }

    pub fn write_word(&mut self, addr: u64, value: u32) -> SimResult<()> {
        for entry in &mut self.peripherals {
            if addr >= entry.base && addr < entry.base + entry.size {
                entry.dev.write(addr - entry.base, value);
                return Ok(());
            }
        }
        Err(SimulationError::UnmappedAccess(addr))
    }

    /// Downcast lookup of an attached peripheral by name.
    pub fn find<T: 'static>(&self, name: &str) -> Option<&T> {
        self.peripherals
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.dev.as_any())
            .and_then(|a| a.downcast_ref::<T>())
    }
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

/// The three calculator ports resolved against a system bus.
///
/// Port access is infallible (see `KeyPorts`); an unmapped address is a
/// board configuration mistake, logged once per access, and reads as zero.
pub struct MmioPorts {
    bus: SystemBus,
    status_addr: u64,
    keycode_addr: u64,
    display_addr: u64,
}

impl MmioPorts {
    pub fn new(bus: SystemBus, board: &BoardDescriptor) -> Self {
        Self {
            bus,
            status_addr: board.ports.status,
            keycode_addr: board.ports.keycode,
            display_addr: board.ports.display,
        }
    }

    pub fn bus(&self) -> &SystemBus {
        &self.bus
    }

    fn read_or_zero(&self, addr: u64) -> u32 {
        match self.bus.read_word(addr) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("{}, substituting 0", e);
                0
            }
        }
    }
}

impl KeyPorts for MmioPorts {
    fn read_status(&self) -> u32 {
        self.read_or_zero(self.status_addr)
    }

    fn read_key_code(&self) -> u32 {
        self.read_or_zero(self.keycode_addr)
    }

    fn write_display(&mut self, value: u32) {
        if let Err(e) = self.bus.write_word(self.display_addr, value) {
            tracing::warn!("{}, display write dropped", e);
        }
    }
}
