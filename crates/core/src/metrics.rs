use crate::LoopObserver;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct LoopMetrics {
    iterations: AtomicU64,
    key_events: AtomicU64,
    display_writes: AtomicU64,
    start_time: Instant,
}

impl Default for LoopMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self {
            iterations: AtomicU64::new(0),
            key_events: AtomicU64::new(0),
            display_writes: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn get_iterations(&self) -> u64 {
        self.iterations.load(Ordering::SeqCst)
    }

    pub fn get_key_events(&self) -> u64 {
        self.key_events.load(Ordering::SeqCst)
    }

    pub fn get_display_writes(&self) -> u64 {
        self.display_writes.load(Ordering::SeqCst)
    }

    pub fn get_ips(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.get_iterations() as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl LoopObserver for LoopMetrics {
    fn on_iteration(&self, _n: u64) {
        self.iterations.fetch_add(1, Ordering::SeqCst);
    }

    fn on_key_event(&self, _code: u32) {
        self.key_events.fetch_add(1, Ordering::SeqCst);
    }

    fn on_display_write(&self, _value: u32) {
        self.display_writes.fetch_add(1, Ordering::SeqCst);
    }
}
