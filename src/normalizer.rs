//! Input normalization
//!
//! This module turns caller-supplied measurement data into the complete
//! statistics objects the engines consume.
//! - Raw per-sample series are summarized with [`Stats`](crate::stats::Stats)
//! - Pre-aggregated statistics are taken as given
//! - Any missing metric gets its documented default and is listed in `defaulted`
//!
//! Normalization never fails: a report is never blocked on a single missing
//! metric.

use crate::types::{
    AccAggregate, AccMetrics, AccSeries, AccStatistics, EegAggregate, EegMetrics, EegSeries,
    EegStatistics, PpgAggregate, PpgMetrics, PpgSeries, PpgStatistics,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// EEG measurement data as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EegInput {
    /// One value per sample for each metric
    Raw(EegSeries),
    /// Statistics computed elsewhere; any field may be missing
    Aggregated(EegAggregate),
}

/// PPG measurement data as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PpgInput {
    Raw(PpgSeries),
    Aggregated(PpgAggregate),
}

/// Accelerometer measurement data as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AccInput {
    Raw(AccSeries),
    Aggregated(AccAggregate),
}

/// Canonical statistics plus a record of what had to be filled in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Normalized<T> {
    pub statistics: T,
    /// Metric names that fell back to defaults
    pub defaulted: Vec<String>,
    /// Fraction of metrics present in the input (0-1)
    pub coverage: f64,
}

impl<T> Normalized<T> {
    fn from_completed(completed: (T, Vec<&'static str>), total_fields: usize) -> Self {
        let (statistics, defaulted) = completed;
        let coverage = if total_fields == 0 {
            1.0
        } else {
            1.0 - defaulted.len() as f64 / total_fields as f64
        };
        Self {
            statistics,
            defaulted: defaulted.into_iter().map(str::to_string).collect(),
            coverage,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.defaulted.is_empty()
    }
}

/// Normalizer for caller-supplied measurement data
pub struct InputNormalizer;

impl InputNormalizer {
    pub fn eeg(input: &EegInput) -> Normalized<EegStatistics> {
        let aggregate = match input {
            EegInput::Raw(series) => series.summarize(),
            EegInput::Aggregated(aggregate) => aggregate.clone(),
        };
        let normalized = Normalized::from_completed(aggregate.complete(), EegMetrics::FIELDS.len());
        log_defaults("eeg", &normalized.defaulted);
        normalized
    }

    pub fn ppg(input: &PpgInput) -> Normalized<PpgStatistics> {
        let aggregate = match input {
            PpgInput::Raw(series) => series.summarize(),
            PpgInput::Aggregated(aggregate) => aggregate.clone(),
        };
        let normalized = Normalized::from_completed(aggregate.complete(), PpgMetrics::FIELDS.len());
        log_defaults("ppg", &normalized.defaulted);
        normalized
    }

    pub fn acc(input: &AccInput) -> Normalized<AccStatistics> {
        let aggregate = match input {
            AccInput::Raw(series) => series.summarize(),
            AccInput::Aggregated(aggregate) => aggregate.clone(),
        };
        let normalized = Normalized::from_completed(aggregate.complete(), AccMetrics::FIELDS.len());
        log_defaults("acc", &normalized.defaulted);
        normalized
    }
}

fn log_defaults(modality: &str, defaulted: &[String]) {
    if !defaulted.is_empty() {
        debug!(
            modality,
            count = defaulted.len(),
            fields = ?defaulted,
            "Substituted default statistics"
        );
    }
}
