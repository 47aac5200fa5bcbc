use crate::Peripheral;
use std::any::Any;

/// Data register offset within the display block.
pub const REG_DATA: u64 = 0x0;

/// Simulated eight-digit seven-segment bank.
///
/// One word register: write latches the value, read returns the latch (the
/// Minisys display driver read-modify-writes it to place individual BCD
/// digits). Every accepted write is also kept in a history so tests can
/// assert on exactly what the firmware sent.
#[derive(Debug, Default)]
pub struct SevenSegDisplay {
    value: u32,
    writes: Vec<u32>,
}

impl SevenSegDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn writes(&self) -> &[u32] {
        &self.writes
    }

    /// The latch split into eight BCD digits, least significant first,
    /// four bits per digit as the board's `display_digit` driver packs them.
    pub fn digits(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        for (loc, d) in out.iter_mut().enumerate() {
            *d = ((self.value >> (loc * 4)) & 0xF) as u8;
        }
        out
    }
}

impl Peripheral for SevenSegDisplay {
    fn read(&self, offset: u64) -> u32 {
        match offset {
            REG_DATA => self.value,
            _ => 0,
        }
    }

    fn write(&mut self, offset: u64, value: u32) {
        if offset == REG_DATA {
            self.value = value;
            self.writes.push(value);
            tracing::debug!("display <- {}", value);
        }
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }
}
