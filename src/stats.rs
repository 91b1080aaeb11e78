//! Summary statistics
//!
//! The one place mean/std/min/max are computed. Both the collector (quality
//! score, session summaries) and the pipeline normalizer (raw series input)
//! go through [`Stats::from_samples`], so the two agree bit for bit.

use serde::{Deserialize, Serialize};

/// Summary statistics over a numeric sequence
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub mean: f64,
    /// Population standard deviation (divides by N)
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Stats {
    /// Compute statistics; an empty slice yields all zeros
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self {
            mean,
            std: variance.sqrt(),
            min,
            max,
        }
    }

    /// Like [`Stats::from_samples`] but `None` for an empty slice
    pub fn non_empty(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            None
        } else {
            Some(Self::from_samples(samples))
        }
    }

    /// Degenerate statistics for a single known value
    pub fn constant(value: f64) -> Self {
        Self {
            mean: value,
            std: 0.0,
            min: value,
            max: value,
        }
    }

    /// Copy with every component rounded to 3 decimals
    pub fn rounded(&self) -> Self {
        Self {
            mean: round3(self.mean),
            std: round3(self.std),
            min: round3(self.min),
            max: round3(self.max),
        }
    }
}

/// Round to 3 decimal places. Non-finite values collapse to 0.
pub fn round3(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 1000.0).round() / 1000.0
}
