//! Lock-free accumulator shared by the built-in collectors.

use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` counter that can be updated from the sampling thread and read or
/// reset from the aggregation thread.
#[derive(Debug)]
pub struct Accumulator {
    bits: AtomicU64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn add(&self, delta: f64) {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn reset(&self) {
        self.bits.store(0f64.to_bits(), Ordering::Release);
    }

    /// Read and zero in one step; concurrent adds land in the next read.
    pub fn take(&self) -> f64 {
        f64::from_bits(self.bits.swap(0f64.to_bits(), Ordering::AcqRel))
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add_and_reset() {
        let acc = Accumulator::new();
        acc.add(1.0);
        acc.add(0.5);
        assert!((acc.get() - 1.5).abs() < f64::EPSILON);

        acc.reset();
        assert_eq!(acc.get(), 0.0);
    }

    #[test]
    fn test_take_loses_nothing_under_contention() {
        let acc = Arc::new(Accumulator::new());
        let writer = {
            let acc = Arc::clone(&acc);
            thread::spawn(move || {
                for _ in 0..20_000 {
                    acc.add(1.0);
                }
            })
        };

        let mut taken = 0.0;
        while !writer.is_finished() {
            taken += acc.take();
        }
        writer.join().unwrap();
        taken += acc.take();

        assert_eq!(taken, 20_000.0);
        assert_eq!(acc.get(), 0.0);
    }

    #[test]
    fn test_concurrent_adds() {
        let acc = Arc::new(Accumulator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let acc = Arc::clone(&acc);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        acc.add(1.0);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(acc.get(), 4000.0);
    }
}
