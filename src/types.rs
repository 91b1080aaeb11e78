//! Core types for the Mindscope measurement pipeline
//!
//! This module defines the data that flows from the collector into the
//! analysis pipeline: per-tick processed metrics, the accumulated session time
//! series, and the aggregated statistics shapes the engines consume.
//!
//! Each modality is described once through [`metric_family!`], which keeps the
//! per-tick struct, the series buffer, the optional aggregate and the completed
//! statistics in lockstep. A field's default value is the documented fallback
//! used whenever a source or an input omits that metric.

use crate::stats::{round3, Stats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Look up `key`, falling back to `default` when absent or non-finite
fn pick(indices: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    match indices.get(key) {
        Some(value) if value.is_finite() => *value,
        _ => default,
    }
}

macro_rules! metric_family {
    (
        $modality:literal,
        $metrics:ident, $series:ident, $aggregate:ident, $statistics:ident {
            $( $(#[$fdoc:meta])* $field:ident = $default:expr ),+ $(,)?
        }
    ) => {
        #[doc = concat!("Per-tick ", $modality, " metrics")]
        #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
        pub struct $metrics {
            $( $(#[$fdoc])* pub $field: f64, )+
        }

        impl Default for $metrics {
            fn default() -> Self {
                Self { $( $field: $default, )+ }
            }
        }

        impl $metrics {
            /// Field names, which double as snapshot keys
            pub const FIELDS: &'static [&'static str] = &[$( stringify!($field) ),+];

            /// Build from a key-value snapshot, defaulting missing keys
            pub fn from_indices(indices: &HashMap<String, f64>) -> Self {
                let defaults = Self::default();
                Self { $( $field: pick(indices, stringify!($field), defaults.$field), )+ }
            }

            /// Copy with every field rounded to 3 decimals
            pub fn rounded(&self) -> Self {
                Self { $( $field: round3(self.$field), )+ }
            }
        }

        #[doc = concat!(
            "Accumulated ", $modality, " time series, one element per collected tick"
        )]
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $series {
            $( pub $field: Vec<f64>, )+
        }

        impl $series {
            /// Append one tick (values are rounded to 3 decimals)
            pub fn push(&mut self, metrics: &$metrics) {
                $( self.$field.push(round3(metrics.$field)); )+
            }

            /// Length of every field array, in declaration order
            pub fn lengths(&self) -> Vec<usize> {
                vec![$( self.$field.len() ),+]
            }

            /// Number of samples (length of the first array)
            pub fn len(&self) -> usize {
                self.lengths().first().copied().unwrap_or(0)
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            pub fn clear(&mut self) {
                $( self.$field.clear(); )+
            }

            /// Summarize every field; empty arrays stay `None`
            pub fn summarize(&self) -> $aggregate {
                $aggregate { $( $field: Stats::non_empty(&self.$field), )+ }
            }
        }

        #[doc = concat!(
            "Pre-aggregated ", $modality, " statistics, any of which may be missing"
        )]
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $aggregate {
            $(
                #[serde(skip_serializing_if = "Option::is_none")]
                pub $field: Option<Stats>,
            )+
        }

        impl $aggregate {
            /// Fill every missing metric from the documented defaults.
            ///
            /// Returns the completed statistics and the names of the fields that
            /// were defaulted.
            pub fn complete(&self) -> ($statistics, Vec<&'static str>) {
                let defaults = $metrics::default();
                let mut defaulted = Vec::new();
                let statistics = $statistics {
                    $(
                        $field: match self.$field {
                            Some(stats) if stats.mean.is_finite() => stats,
                            _ => {
                                defaulted.push(stringify!($field));
                                Stats::constant(defaults.$field)
                            }
                        },
                    )+
                };
                (statistics, defaulted)
            }
        }

        #[doc = concat!("Complete ", $modality, " statistics handed to analysis engines")]
        #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
        pub struct $statistics {
            $( pub $field: Stats, )+
        }

        impl Default for $statistics {
            fn default() -> Self {
                $aggregate::default().complete().0
            }
        }
    };
}

metric_family! {
    "EEG",
    EegMetrics, EegSeries, EegAggregate, EegStatistics {
        /// Relative delta band power (1-4 Hz)
        delta_power = 0.25,
        /// Relative theta band power (4-8 Hz)
        theta_power = 0.2,
        /// Relative alpha band power (8-13 Hz)
        alpha_power = 0.43,
        /// Relative beta band power (13-30 Hz)
        beta_power = 0.3,
        /// Relative gamma band power (30-45 Hz)
        gamma_power = 0.1,
        total_power = 1.28,
        focus_index = 0.5,
        relaxation_index = 0.5,
        stress_index = 0.5,
        attention_index = 0.5,
        meditation_index = 0.5,
        /// Left/right asymmetry, -1 to 1
        hemispheric_balance = 0.0,
        cognitive_load = 0.5,
        emotional_stability = 0.5,
        /// 0-1
        signal_quality = 0.0,
    }
}

metric_family! {
    "PPG",
    PpgMetrics, PpgSeries, PpgAggregate, PpgStatistics {
        /// Beats per minute
        heart_rate = 72.0,
        /// ms
        rmssd = 35.0,
        /// ms
        sdnn = 50.0,
        /// percent
        pnn50 = 15.0,
        /// ms^2
        lf_power = 500.0,
        /// ms^2
        hf_power = 350.0,
        lf_hf_ratio = 1.5,
        stress_level = 0.5,
        recovery_index = 0.5,
        autonomic_balance = 0.5,
        /// Breaths per minute
        respiratory_rate = 15.0,
        /// SpO2 percent
        oxygen_saturation = 98.0,
        /// Average NN interval, ms
        avnn = 833.0,
        /// percent
        pnn20 = 40.0,
        /// ms
        sdsd = 30.0,
        hr_max = 85.0,
        hr_min = 60.0,
        signal_quality = 0.0,
        motion_artifact = 0.0,
    }
}

metric_family! {
    "accelerometer",
    AccMetrics, AccSeries, AccAggregate, AccStatistics {
        activity_level = 0.0,
        movement_intensity = 0.0,
        postural_stability = 0.5,
        postural_transitions = 0.0,
        step_count = 0.0,
        /// Steps per minute
        step_rate = 0.0,
        movement_quality = 0.5,
        /// kcal/min
        energy_expenditure = 0.0,
        signal_quality = 0.0,
    }
}

metric_family! {
    "fused cross-modal",
    FusedMetrics, FusedSeries, FusedAggregate, FusedStatistics {
        overall_stress = 0.0,
        cognitive_stress = 0.0,
        physical_stress = 0.0,
        fatigue_level = 0.0,
        alertness_level = 0.0,
        wellbeing_score = 0.0,
    }
}

/// Body posture classification from the accelerometer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Posture {
    Sitting,
    Standing,
    Lying,
    Moving,
    #[default]
    Unknown,
}

impl Posture {
    /// Most frequent posture, `Unknown` when there are no samples
    pub fn dominant(samples: &[Posture]) -> Posture {
        const ORDER: [Posture; 5] = [
            Posture::Sitting,
            Posture::Standing,
            Posture::Lying,
            Posture::Moving,
            Posture::Unknown,
        ];
        let mut best = Posture::Unknown;
        let mut best_count = 0;
        for candidate in ORDER {
            let count = samples.iter().filter(|p| **p == candidate).count();
            if count > best_count {
                best = candidate;
                best_count = count;
            }
        }
        best
    }
}

/// Everything derived from one collection tick
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessedMetrics {
    pub eeg: EegMetrics,
    pub ppg: PpgMetrics,
    pub acc: AccMetrics,
    /// Categorical, tracked beside the numeric ACC fields
    pub posture: Posture,
}

impl ProcessedMetrics {
    pub fn rounded(&self) -> Self {
        Self {
            eeg: self.eeg.rounded(),
            ppg: self.ppg.rounded(),
            acc: self.acc.rounded(),
            posture: self.posture,
        }
    }
}

/// Session-level metadata attached to a completed series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMetadata {
    /// Hz
    pub eeg_sampling_rate: u32,
    /// Hz
    pub ppg_sampling_rate: u32,
    /// Hz
    pub acc_sampling_rate: u32,
    pub processing_version: String,
    /// 0-100
    pub quality_score: f64,
}

impl Default for SeriesMetadata {
    fn default() -> Self {
        Self {
            eeg_sampling_rate: 256,
            ppg_sampling_rate: 50,
            acc_sampling_rate: 25,
            processing_version: crate::PROCESSING_VERSION.to_string(),
            quality_score: 0.0,
        }
    }
}

/// Accumulated per-session record produced by the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDataTimeSeries {
    pub session_id: String,
    pub measurement_id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: f64,
    pub timestamps: Vec<DateTime<Utc>>,
    pub eeg: EegSeries,
    pub ppg: PpgSeries,
    pub acc: AccSeries,
    pub posture: Vec<Posture>,
    pub fused: FusedSeries,
    pub metadata: SeriesMetadata,
}

impl ProcessedDataTimeSeries {
    /// Empty series for a session starting at `start_time`
    pub fn new(
        session_id: impl Into<String>,
        measurement_id: impl Into<String>,
        user_id: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            measurement_id: measurement_id.into(),
            user_id: user_id.into(),
            start_time,
            end_time: start_time,
            duration_secs: 0.0,
            timestamps: Vec::new(),
            eeg: EegSeries::default(),
            ppg: PpgSeries::default(),
            acc: AccSeries::default(),
            posture: Vec::new(),
            fused: FusedSeries::default(),
            metadata: SeriesMetadata::default(),
        }
    }

    /// Append one tick to every array
    pub fn push_sample(
        &mut self,
        timestamp: DateTime<Utc>,
        metrics: &ProcessedMetrics,
        fused: &FusedMetrics,
    ) {
        self.timestamps.push(timestamp);
        self.eeg.push(&metrics.eeg);
        self.ppg.push(&metrics.ppg);
        self.acc.push(&metrics.acc);
        self.posture.push(metrics.posture);
        self.fused.push(fused);
    }

    /// Number of collected samples
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// True when every array holds exactly `len()` elements
    pub fn is_consistent(&self) -> bool {
        let n = self.len();
        self.eeg
            .lengths()
            .into_iter()
            .chain(self.ppg.lengths())
            .chain(self.acc.lengths())
            .chain(self.fused.lengths())
            .chain(std::iter::once(self.posture.len()))
            .all(|len| len == n)
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
        self.eeg.clear();
        self.ppg.clear();
        self.acc.clear();
        self.posture.clear();
        self.fused.clear();
    }

    /// Per-field statistics over the whole session
    pub fn summary(&self) -> SeriesSummary {
        SeriesSummary {
            sample_count: self.len(),
            duration_secs: self.duration_secs,
            eeg: self.eeg.summarize(),
            ppg: self.ppg.summarize(),
            acc: self.acc.summarize(),
            fused: self.fused.summarize(),
            dominant_posture: Posture::dominant(&self.posture),
            quality_score: self.metadata.quality_score,
        }
    }
}

/// Statistics over a completed series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    pub sample_count: usize,
    pub duration_secs: f64,
    pub eeg: EegAggregate,
    pub ppg: PpgAggregate,
    pub acc: AccAggregate,
    pub fused: FusedAggregate,
    pub dominant_posture: Posture,
    pub quality_score: f64,
}

/// Biological sex / gender as recorded on the measurement subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// Subject information passed to every engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub age: u32,
    pub gender: Gender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

impl PersonalInfo {
    pub fn new(age: u32, gender: Gender) -> Self {
        Self {
            name: None,
            age,
            gender,
            occupation: None,
            department: None,
        }
    }
}
