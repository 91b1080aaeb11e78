//! Analysis engine capability
//!
//! An analysis engine turns aggregated statistics for one modality (or the
//! combined per-modality results) into a scored, human-readable report. Engines
//! are registered in the [`EngineRegistry`](crate::registry::EngineRegistry)
//! under a stable id and described by an immutable [`EngineDescriptor`].

use crate::error::ComputeError;
use crate::types::{AccStatistics, EegStatistics, PersonalInfo, PpgStatistics};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Which modalities an engine can consume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportedDataTypes {
    pub eeg: bool,
    pub ppg: bool,
    pub acc: bool,
}

impl SupportedDataTypes {
    pub const EEG: Self = Self {
        eeg: true,
        ppg: false,
        acc: false,
    };
    pub const PPG: Self = Self {
        eeg: false,
        ppg: true,
        acc: false,
    };
    pub const ALL: Self = Self {
        eeg: true,
        ppg: true,
        acc: true,
    };

    /// At least one modality is supported
    pub fn any(&self) -> bool {
        self.eeg || self.ppg || self.acc
    }

    /// Every modality requested in `required` is supported
    pub fn covers(&self, required: &SupportedDataTypes) -> bool {
        (!required.eeg || self.eeg) && (!required.ppg || self.ppg) && (!required.acc || self.acc)
    }
}

/// Operating envelope advertised by an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCapabilities {
    pub supported_languages: Vec<String>,
    /// Longest measurement accepted, in seconds
    pub max_data_duration_secs: u64,
    /// Minimum acceptable signal quality, 0-100
    pub min_data_quality: f64,
    pub supported_output_formats: Vec<String>,
    pub real_time_processing: bool,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            supported_languages: vec!["en".to_string()],
            max_data_duration_secs: 300,
            min_data_quality: 30.0,
            supported_output_formats: vec!["json".to_string()],
            real_time_processing: false,
        }
    }
}

/// Identity and capability descriptor; immutable once registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub provider: String,
    /// Credits consumed per analysis; must be non-negative
    pub cost_per_analysis: i64,
    pub supported_data_types: SupportedDataTypes,
    pub capabilities: EngineCapabilities,
}

/// Mutable bookkeeping kept by the registry for each engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineMetadata {
    pub registered_at: DateTime<Utc>,
    pub usage_count: u64,
    pub average_rating: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub is_enabled: bool,
}

impl EngineMetadata {
    /// Fresh metadata for an engine registered at `now`
    pub fn registered(now: DateTime<Utc>) -> Self {
        Self {
            registered_at: now,
            usage_count: 0,
            average_rating: 0.0,
            last_used: None,
            is_enabled: true,
        }
    }
}

/// Two-tier validation outcome: errors block, warnings do not
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// 0-100
    pub quality_score: f64,
}

impl ValidationResult {
    pub fn new(errors: Vec<String>, warnings: Vec<String>, quality_score: f64) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            quality_score,
        }
    }
}

/// EEG analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EegAnalysisInput {
    pub statistics: EegStatistics,
    pub personal_info: PersonalInfo,
    pub duration_secs: f64,
    /// Metrics that were missing from the measurement and filled with defaults
    #[serde(default)]
    pub defaulted: Vec<String>,
}

/// PPG analysis request; accelerometer context is optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpgAnalysisInput {
    pub statistics: PpgStatistics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acc: Option<AccStatistics>,
    pub personal_info: PersonalInfo,
    pub duration_secs: f64,
    #[serde(default)]
    pub defaulted: Vec<String>,
}

/// Integrated analysis request built from the per-modality results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratedAnalysisInput {
    pub personal_info: PersonalInfo,
    pub eeg_analysis: Option<AnalysisResult>,
    pub ppg_analysis: Option<AnalysisResult>,
    pub duration_secs: f64,
    /// Session quality score (0-100) when the input came from the collector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

/// What an engine is asked to analyze
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EngineInput {
    Eeg(EegAnalysisInput),
    Ppg(PpgAnalysisInput),
    Integrated(IntegratedAnalysisInput),
}

impl EngineInput {
    /// Modalities this input carries
    pub fn data_types(&self) -> SupportedDataTypes {
        match self {
            EngineInput::Eeg(_) => SupportedDataTypes::EEG,
            // Accelerometer statistics ride along as context only
            EngineInput::Ppg(_) => SupportedDataTypes::PPG,
            EngineInput::Integrated(input) => SupportedDataTypes {
                eeg: input.eeg_analysis.is_some(),
                ppg: input.ppg_analysis.is_some(),
                acc: false,
            },
        }
    }

    pub fn personal_info(&self) -> &PersonalInfo {
        match self {
            EngineInput::Eeg(input) => &input.personal_info,
            EngineInput::Ppg(input) => &input.personal_info,
            EngineInput::Integrated(input) => &input.personal_info,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        match self {
            EngineInput::Eeg(input) => input.duration_secs,
            EngineInput::Ppg(input) => input.duration_secs,
            EngineInput::Integrated(input) => input.duration_secs,
        }
    }

    /// Signal quality on a 0-100 scale
    pub fn quality_score(&self) -> f64 {
        match self {
            EngineInput::Eeg(input) => input.statistics.signal_quality.mean * 100.0,
            EngineInput::Ppg(input) => input.statistics.signal_quality.mean * 100.0,
            EngineInput::Integrated(input) => input.quality_score.unwrap_or(100.0),
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub language: String,
    pub output_format: String,
    pub include_details: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            output_format: "json".to_string(),
            include_details: true,
        }
    }
}

/// Narrative part of an analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Insights {
    pub summary: String,
    pub detailed_analysis: String,
    pub recommendations: Vec<String>,
    pub warnings: Vec<String>,
}

/// Named scores per modality
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModalityMetrics {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub eeg: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ppg: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub acc: BTreeMap<String, f64>,
}

/// Output of a single `analyze()` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub engine_id: String,
    pub engine_version: String,
    pub analysis_id: String,
    pub timestamp: DateTime<Utc>,
    /// 0-100
    pub overall_score: f64,
    /// 0-100
    pub stress_level: f64,
    /// 0-100
    pub focus_level: f64,
    pub insights: Insights,
    pub metrics: ModalityMetrics,
    pub processing_time_ms: u64,
    pub cost_used: i64,
    /// 0-1
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    /// Set only on the stand-in built by [`AnalysisResult::degraded()`]
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl AnalysisResult {
    /// Empty result stamped with the engine's identity
    pub fn for_engine(descriptor: &EngineDescriptor) -> Self {
        Self {
            engine_id: descriptor.id.clone(),
            engine_version: descriptor.version.clone(),
            analysis_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            overall_score: 0.0,
            stress_level: 0.0,
            focus_level: 0.0,
            insights: Insights::default(),
            metrics: ModalityMetrics::default(),
            processing_time_ms: 0,
            cost_used: descriptor.cost_per_analysis,
            confidence: 0.0,
            details: serde_json::Value::Null,
            degraded: false,
        }
    }

    /// Fixed-shape stand-in used when the integrated analysis never ran
    pub fn degraded(engine_id: &str, reason: &str) -> Self {
        Self {
            engine_id: engine_id.to_string(),
            engine_version: "0.0.0".to_string(),
            analysis_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            overall_score: 0.0,
            stress_level: 0.0,
            focus_level: 0.0,
            insights: Insights {
                summary: "The analysis could not be completed.".to_string(),
                detailed_analysis: "An error occurred while analyzing the measurement. \
                                    Please try again later."
                    .to_string(),
                recommendations: vec!["Repeat the measurement and try again.".to_string()],
                warnings: vec![reason.to_string()],
            },
            metrics: ModalityMetrics::default(),
            processing_time_ms: 0,
            cost_used: 0,
            confidence: 0.0,
            details: serde_json::Value::Null,
            degraded: true,
        }
    }

    /// True for the stand-in produced by [`AnalysisResult::degraded()`]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

/// Pluggable analysis engine
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    fn descriptor(&self) -> &EngineDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Check whether `input` is acceptable for this engine
    async fn validate(&self, input: &EngineInput) -> ValidationResult;

    /// Run the analysis
    async fn analyze(
        &self,
        input: &EngineInput,
        options: &AnalysisOptions,
    ) -> Result<AnalysisResult, ComputeError>;
}

/// Baseline input checks against a descriptor's capabilities.
///
/// Unsupported modality or an over-long measurement is an error; signal
/// quality below `min_data_quality` is only a warning.
pub fn check_input(descriptor: &EngineDescriptor, input: &EngineInput) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let caps = &descriptor.capabilities;

    let required = input.data_types();
    if !descriptor.supported_data_types.covers(&required) {
        errors.push(format!(
            "engine {} does not support the supplied data types",
            descriptor.id
        ));
    }

    let duration = input.duration_secs();
    if duration > caps.max_data_duration_secs as f64 {
        errors.push(format!(
            "measurement duration {duration:.1}s exceeds the {}s limit",
            caps.max_data_duration_secs
        ));
    }

    if let EngineInput::Integrated(integrated) = input {
        if integrated.eeg_analysis.is_none() && integrated.ppg_analysis.is_none() {
            warnings.push("no per-modality analysis available".to_string());
        }
    }

    let quality = input.quality_score().clamp(0.0, 100.0);
    if quality < caps.min_data_quality {
        warnings.push(format!(
            "signal quality {quality:.1} is below the recommended {:.1}",
            caps.min_data_quality
        ));
    }

    ValidationResult::new(errors, warnings, quality)
}
