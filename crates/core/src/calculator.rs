use crate::peripherals::keypad::KeyStatus;
use crate::snapshot::CalculatorSnapshot;
use crate::{KeyPorts, LoopObserver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Key code of the 'A' key, which commits the current digit into the sum.
pub const KEY_ADD: u32 = 10;

/// Value of `last_key` before any key has been processed. Outside the
/// 16-bit key space, so the first press always differs from it; the
/// original firmware started at 0 and silently swallowed a leading '0'.
pub const NO_KEY: u32 = u32::MAX;

/// Classification of a raw key code read from the keypad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Digit(u8),
    Add,
    Unknown(u32),
}

impl Key {
    pub fn classify(code: u32) -> Self {
        match code {
            0..=9 => Key::Digit(code as u8),
            KEY_ADD => Key::Add,
            other => Key::Unknown(other),
        }
    }
}

/// How the loop settles between polls.
///
/// The firmware burns a fixed countdown (2000 on the Minisys) to ride out
/// switch bounce. Hosted runs can spin the same way, sleep instead, or
/// skip the delay entirely so tests run without real time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebouncePolicy {
    Spin(u32),
    Sleep(Duration),
    None,
}

impl DebouncePolicy {
    fn settle(&self) {
        match self {
            DebouncePolicy::Spin(count) => {
                for _ in 0..*count {
                    std::hint::spin_loop();
                }
            }
            DebouncePolicy::Sleep(d) => std::thread::sleep(*d),
            DebouncePolicy::None => {}
        }
    }
}

/// The input-accumulate-display loop.
///
/// Each `step` is one iteration of the firmware's `while(1)`: poll the
/// status word, edge-detect a new key against `last_key`, latch a digit or
/// fold it into the running sum, drive the display, debounce.
pub struct Calculator<P: KeyPorts> {
    ports: P,
    last_key: u32,
    current_digit: u32,
    // Wraps on overflow; the original 32-bit board wrapped too.
    running_sum: u32,
    iterations: u64,
    debounce: DebouncePolicy,
    pub observers: Vec<Arc<dyn LoopObserver>>,
}

impl<P: KeyPorts> Calculator<P> {
    pub fn new(ports: P, debounce: DebouncePolicy) -> Self {
        Self {
            ports,
            last_key: NO_KEY,
            current_digit: 0,
            running_sum: 0,
            iterations: 0,
            debounce,
            observers: Vec::new(),
        }
    }

    pub fn running_sum(&self) -> u32 {
        self.running_sum
    }

    pub fn current_digit(&self) -> u32 {
        self.current_digit
    }

    pub fn last_key(&self) -> u32 {
        self.last_key
    }

    pub fn ports(&self) -> &P {
        &self.ports
    }

    fn write_display(&mut self, value: u32) {
        self.ports.write_display(value);
        for obs in &self.observers {
            obs.on_display_write(value);
        }
    }

    /// One polling iteration. Returns true if a new key event was processed.
    pub fn step(&mut self) -> bool {
        let mut event = false;

        let status = KeyStatus::from_bits_truncate(self.ports.read_status());
        if status.contains(KeyStatus::PRESSED) {
            let code = self.ports.read_key_code();
            // A held key reads the same code every poll; only a distinct
            // code is a new event.
            if code != self.last_key {
                for obs in &self.observers {
                    obs.on_key_event(code);
                }
                match Key::classify(code) {
                    Key::Digit(d) => {
                        self.current_digit = d as u32;
                        let digit = self.current_digit;
                        self.write_display(digit);
                        tracing::info!("digit {} entered", d);
                    }
                    Key::Add => {
                        self.running_sum = self.running_sum.wrapping_add(self.current_digit);
                        let sum = self.running_sum;
                        self.write_display(sum);
                        self.current_digit = 0;
                        tracing::info!("add: sum = {}", sum);
                    }
                    Key::Unknown(c) => {
                        tracing::debug!("ignoring undefined key code {}", c);
                    }
                }
                // Latched in every branch, so an undefined code suppresses
                // its own repeats just like a defined one.
                self.last_key = code;
                event = true;
            }
        }

        self.debounce.settle();

        self.iterations += 1;
        for obs in &self.observers {
            obs.on_iteration(self.iterations);
        }
        event
    }

    /// Iterations polled so far, over the loop's whole lifetime.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Run until the stop flag is raised or the iteration bound is hit.
    /// Returns the number of iterations executed.
    ///
    /// The bare-metal original loops forever and is "stopped" by pulling
    /// power; hosted callers get a deterministic stop contract instead.
    pub fn run(&mut self, stop: &AtomicBool, max_iterations: Option<u64>) -> u64 {
        for obs in &self.observers {
            obs.on_loop_start();
        }

        let mut n: u64 = 0;
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            if let Some(max) = max_iterations {
                if n >= max {
                    break;
                }
            }
            self.step();
            n += 1;
        }

        for obs in &self.observers {
            obs.on_loop_stop();
        }
        n
    }

    pub fn snapshot(&self) -> CalculatorSnapshot {
        CalculatorSnapshot {
            last_key: self.last_key,
            current_digit: self.current_digit,
            running_sum: self.running_sum,
        }
    }

    pub fn restore(&mut self, snap: &CalculatorSnapshot) {
        self.last_key = snap.last_key;
        self.current_digit = snap.current_digit;
        self.running_sum = snap.running_sum;
    }
}
