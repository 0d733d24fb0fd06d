use std::collections::VecDeque;
use std::time::{Duration, Instant};

use statrs::statistics::Statistics;

/// A single rate measurement derived from two consecutive snapshots.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub timestamp: Instant,
    pub rate: f64,
}

/// Controls which samples a `SampleWindow` keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retention {
    /// Keeps at most the given number of newest samples
    Count(usize),
    /// Keeps samples not older than the given age, measured from the newest sample
    Age(Duration),
}

/// An insertion-ordered sequence of recent samples.
///
/// Samples are expected to arrive in timestamp order, so eviction
/// only ever has to look at the front.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleWindow {
    retention: Retention,
    samples: VecDeque<Sample>,
}

impl SampleWindow {
    pub fn new(retention: Retention) -> SampleWindow {
        let samples = match retention {
            Retention::Count(n) => VecDeque::with_capacity(n + 1),
            Retention::Age(_) => VecDeque::new(),
        };
        SampleWindow { retention, samples }
    }

    /// Appends a sample and evicts whatever falls out of the retention bound.
    pub fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        match self.retention {
            Retention::Count(max_len) => {
                while self.samples.len() > max_len {
                    self.samples.pop_front();
                }
            }
            Retention::Age(max_age) => {
                let cutoff = match sample.timestamp.checked_sub(max_age) {
                    Some(cutoff) => cutoff,
                    None => return,
                };
                while let Some(oldest) = self.samples.front() {
                    if oldest.timestamp >= cutoff {
                        break;
                    }
                    self.samples.pop_front();
                }
            }
        }
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

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> + '_ {
        self.samples.iter()
    }

    pub fn rates(&self) -> impl Iterator<Item = f64> + '_ {
        self.iter().map(|s| s.rate)
    }

    /// Arithmetic mean of the retained rates, 0.0 for an empty window
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.rates().sum::<f64>() / self.samples.len() as f64
        }
    }

    /// Sample standard deviation of the retained rates.
    /// Undefined for fewer than two samples.
    pub fn std_dev(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let std_dev = self.rates().std_dev();
        if std_dev.is_nan() {
            None
        } else {
            Some(std_dev)
        }
    }
}
