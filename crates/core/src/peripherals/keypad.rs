use crate::Peripheral;
use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Key-code register offset within the keypad block.
pub const REG_KEYCODE: u64 = 0x0;

bitflags::bitflags! {
    /// Status register bits. Only bit 0 is defined on the Minisys board.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyStatus: u32 {
        const PRESSED = 1 << 0;
    }
}

/// Sentinel stored while no key is down. Outside the 16-bit key space, so
/// it can never collide with a real code.
const RELEASED: u32 = u32::MAX;

/// Shared keypad state. The harness side presses and releases keys; the
/// peripheral side exposes them as registers.
#[derive(Debug)]
pub struct KeypadState {
    pressed: AtomicU32,
}

impl Default for KeypadState {
    fn default() -> Self {
        Self {
            pressed: AtomicU32::new(RELEASED),
        }
    }
}

impl KeypadState {
    pub fn press(&self, code: u32) {
        self.pressed.store(code, Ordering::SeqCst);
        tracing::debug!("keypad: press {}", code);
    }

    pub fn release(&self) {
        self.pressed.store(RELEASED, Ordering::SeqCst);
        tracing::debug!("keypad: release");
    }

    pub fn current(&self) -> Option<u32> {
        match self.pressed.load(Ordering::SeqCst) {
            RELEASED => None,
            code => Some(code),
        }
    }
}

/// Simulated matrix keypad register block.
///
/// Key-code word at offset 0x0, status word at a board-dependent offset
/// (0x2 on the Minisys-1A, where the pair lives at 0xFFFFFC10/0xFFFFFC12).
/// The block is read-only; writes are dropped.
#[derive(Debug)]
pub struct Keypad {
    state: Arc<KeypadState>,
    status_offset: u64,
}

impl Keypad {
    pub fn new(state: Arc<KeypadState>, status_offset: u64) -> Self {
        Self {
            state,
            status_offset,
        }
    }
}

impl Peripheral for Keypad {
    fn read(&self, offset: u64) -> u32 {
        if offset == REG_KEYCODE {
            // Key code reads as 0 while nothing is down, like the real
            // scanner's latch.
            return self.state.current().unwrap_or(0);
        }
        if offset == self.status_offset {
            return match self.state.current() {
                Some(_) => KeyStatus::PRESSED.bits(),
                None => KeyStatus::empty().bits(),
            };
        }
        0
    }

    fn write(&mut self, _offset: u64, _value: u32) {}

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }
}
