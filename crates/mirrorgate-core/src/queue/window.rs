//! Fixed-capacity rolling window of samples.

use std::collections::VecDeque;

/// Keeps the newest `capacity` samples; the oldest is evicted on overflow.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: T) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// True iff the window is full and every sample satisfies `pred`.
    pub fn full_and_all(&self, pred: impl Fn(T) -> bool) -> bool {
        self.is_full() && self.samples.iter().all(|s| pred(*s))
    }
}
