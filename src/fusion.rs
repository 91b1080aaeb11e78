//! Cross-modal fusion
//!
//! This module derives the six fused scores from a single tick's EEG, PPG and
//! accelerometer metrics:
//! - Overall, cognitive and physical stress
//! - Fatigue and alertness
//! - Wellbeing
//!
//! All inputs are 0-1 indices; every output is clamped to 0-1.

use crate::types::{FusedMetrics, ProcessedMetrics};

/// Deriver for fused cross-modal scores
pub struct FusionDeriver;

impl FusionDeriver {
    /// Derive fused scores from one tick of processed metrics
    pub fn derive(metrics: &ProcessedMetrics) -> FusedMetrics {
        let overall_stress = compute_overall_stress(metrics);
        let cognitive_stress = compute_cognitive_stress(metrics);
        let physical_stress = compute_physical_stress(metrics);
        let fatigue_level = compute_fatigue_level(metrics);
        let alertness_level = compute_alertness_level(metrics);
        let wellbeing_score = compute_wellbeing_score(metrics, overall_stress);

        FusedMetrics {
            overall_stress,
            cognitive_stress,
            physical_stress,
            fatigue_level,
            alertness_level,
            wellbeing_score,
        }
    }
}

/// Mean of EEG stress index and PPG stress level
fn compute_overall_stress(m: &ProcessedMetrics) -> f64 {
    ((m.eeg.stress_index + m.ppg.stress_level) / 2.0).clamp(0.0, 1.0)
}

/// Formula: `0.7 * eeg_stress + 0.3 * cognitive_load`
fn compute_cognitive_stress(m: &ProcessedMetrics) -> f64 {
    (0.7 * m.eeg.stress_index + 0.3 * m.eeg.cognitive_load).clamp(0.0, 1.0)
}

/// Formula: `0.6 * ppg_stress + 0.4 * movement_intensity`
fn compute_physical_stress(m: &ProcessedMetrics) -> f64 {
    (0.6 * m.ppg.stress_level + 0.4 * m.acc.movement_intensity).clamp(0.0, 1.0)
}

/// Low attention, poor recovery and high load all read as fatigue
///
/// Formula: `0.4 * (1 - attention) + 0.3 * (1 - recovery) + 0.3 * cognitive_load`
fn compute_fatigue_level(m: &ProcessedMetrics) -> f64 {
    (0.4 * (1.0 - m.eeg.attention_index)
        + 0.3 * (1.0 - m.ppg.recovery_index)
        + 0.3 * m.eeg.cognitive_load)
        .clamp(0.0, 1.0)
}

/// Formula: `0.5 * focus + 0.3 * attention + 0.2 * activity_level`
fn compute_alertness_level(m: &ProcessedMetrics) -> f64 {
    (0.5 * m.eeg.focus_index + 0.3 * m.eeg.attention_index + 0.2 * m.acc.activity_level)
        .clamp(0.0, 1.0)
}

/// Formula:
/// `0.3 * emotional_stability + 0.3 * relaxation + 0.2 * recovery + 0.2 * (1 - overall_stress)`
fn compute_wellbeing_score(m: &ProcessedMetrics, overall_stress: f64) -> f64 {
    (0.3 * m.eeg.emotional_stability
        + 0.3 * m.eeg.relaxation_index
        + 0.2 * m.ppg.recovery_index
        + 0.2 * (1.0 - overall_stress))
        .clamp(0.0, 1.0)
}
