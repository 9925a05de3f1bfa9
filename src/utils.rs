use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use crate::frame::Metrics;

/// Mean over the last `max_length` samples.
#[derive(Debug, Clone)]
pub struct RollingMean {
    data: VecDeque<f64>,
    max_length: usize,
}

impl RollingMean {
    pub fn new(max_length: usize) -> Self {
        Self {
            data: VecDeque::new(),
            max_length: max_length.max(1),
        }
    }

    pub fn push(&mut self, value: f64) {
        self.data.push_back(value);

        if self.data.len() > self.max_length {
            self.data.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get_mean(&self) -> Option<f64> {
        if self.data.is_empty() {
            None
        } else {
            Some(self.data.iter().sum::<f64>() / self.data.len() as f64)
        }
    }
}

/// Accumulates wall time per named stage across one frame.
#[derive(Debug, Default)]
pub struct StageTimings {
    totals: BTreeMap<&'static str, Duration>,
}

impl StageTimings {
    pub fn new(stages: &[&'static str]) -> Self {
        Self {
            totals: stages.iter().map(|&s| (s, Duration::ZERO)).collect(),
        }
    }

    pub fn time<T>(&mut self, stage: &'static str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        *self.totals.entry(stage).or_default() += start.elapsed();
        out
    }

    /// Writes `<stage>_ms` entries.
    pub fn record_into(&self, metrics: &mut Metrics) {
        for (stage, total) in self.totals.iter() {
            metrics.insert(format!("{}_ms", stage), total.as_secs_f64() * 1000.0);
        }
    }
}
