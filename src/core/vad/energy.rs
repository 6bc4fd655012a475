//! Bounded sliding window over per-frame energy samples.

use std::collections::VecDeque;

/// Fixed-capacity ring of recent energy samples, oldest evicted first.
///
/// Feeds the smoothed audio level surfaced to observers; the detector's
/// speech/silence classification works on per-frame energy.
#[derive(Debug)]
pub struct EnergyWindow {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl EnergyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Push a sample, evicting the oldest if the window is full.
    pub fn push(&mut self, energy: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(energy);
    }

    /// Mean of the retained samples; zero when empty.
    pub fn mean(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
