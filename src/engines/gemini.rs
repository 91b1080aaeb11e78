//! Gemini-backed analysis engines
//!
//! Each engine renders its statistics into a prompt, asks the Gemini
//! `generateContent` endpoint for a JSON answer and maps that answer onto an
//! [`AnalysisResult`]. Parsing is lenient: markdown fences and prose around the
//! JSON object are ignored, and both snake_case and camelCase keys are read.

use crate::engine::{
    check_input, AnalysisEngine, AnalysisOptions, AnalysisResult, EegAnalysisInput,
    EngineCapabilities, EngineDescriptor, EngineInput, IntegratedAnalysisInput, Insights,
    ModalityMetrics, PpgAnalysisInput, SupportedDataTypes, ValidationResult,
};
use crate::error::ComputeError;
use crate::pipeline::{EEG_ENGINE_ID, INTEGRATED_ENGINE_ID, PPG_ENGINE_ID};
use crate::types::{Gender, PersonalInfo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const USER_AGENT: &str = concat!("mindscope/", env!("CARGO_PKG_VERSION"));

/// Gemini connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    /// Never written back out
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub temperature: f64,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            request_timeout_secs: 60,
            temperature: 0.3,
        }
    }
}

/// Minimal `generateContent` client
pub struct GeminiClient {
    http_client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    temperature: f64,
}

impl GeminiClient {
    pub fn new(settings: &GeminiSettings) -> Result<Self, ComputeError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| ComputeError::Http(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key: settings.api_key.clone().filter(|key| !key.trim().is_empty()),
            model: settings.model.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            temperature: settings.temperature,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Send one prompt and return the first candidate's text
    pub async fn generate(&self, prompt: &str) -> Result<String, ComputeError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ComputeError::Config("Gemini API key is not configured".to_string()))?;

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": self.temperature,
                "responseMimeType": "application/json"
            }
        });

        debug!(model = %self.model, prompt_chars = prompt.len(), "Calling Gemini generateContent");

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| ComputeError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ComputeError::Http(format!(
                "Gemini returned {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ComputeError::ParseError(e.to_string()))?;
        candidate_text(&payload)
    }
}

/// `candidates[0].content.parts[*].text`, concatenated
fn candidate_text(payload: &Value) -> Result<String, ComputeError> {
    let parts = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| ComputeError::ParseError("Gemini response has no candidates".to_string()))?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        return Err(ComputeError::ParseError(
            "Gemini response candidate is empty".to_string(),
        ));
    }
    Ok(text)
}

/// Which stage of the pipeline an engine serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Eeg,
    Ppg,
    Integrated,
}

impl EngineKind {
    pub fn id(&self) -> &'static str {
        match self {
            EngineKind::Eeg => EEG_ENGINE_ID,
            EngineKind::Ppg => PPG_ENGINE_ID,
            EngineKind::Integrated => INTEGRATED_ENGINE_ID,
        }
    }

    pub fn descriptor(&self) -> EngineDescriptor {
        let (name, description, cost, data_types) = match self {
            EngineKind::Eeg => (
                "Advanced EEG Analysis (Gemini)",
                "Brainwave band power and cognitive index interpretation",
                1,
                SupportedDataTypes::EEG,
            ),
            EngineKind::Ppg => (
                "Advanced PPG Analysis (Gemini)",
                "Heart rate variability and autonomic balance interpretation",
                1,
                SupportedDataTypes {
                    eeg: false,
                    ppg: true,
                    acc: true,
                },
            ),
            EngineKind::Integrated => (
                "Integrated Mental Health Analysis (Gemini)",
                "Combined EEG and PPG assessment with personalized recommendations",
                2,
                SupportedDataTypes::ALL,
            ),
        };

        EngineDescriptor {
            id: self.id().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            version: "1.0.0".to_string(),
            provider: "google-gemini".to_string(),
            cost_per_analysis: cost,
            supported_data_types: data_types,
            capabilities: EngineCapabilities {
                supported_languages: vec!["en".to_string(), "ko".to_string()],
                max_data_duration_secs: 300,
                min_data_quality: 30.0,
                supported_output_formats: vec!["json".to_string()],
                real_time_processing: false,
            },
        }
    }

    fn accepts(&self, input: &EngineInput) -> bool {
        matches!(
            (self, input),
            (EngineKind::Eeg, EngineInput::Eeg(_))
                | (EngineKind::Ppg, EngineInput::Ppg(_))
                | (EngineKind::Integrated, EngineInput::Integrated(_))
        )
    }
}

/// Analysis engine backed by a Gemini model
pub struct GeminiEngine {
    descriptor: EngineDescriptor,
    kind: EngineKind,
    client: GeminiClient,
}

impl GeminiEngine {
    pub fn new(kind: EngineKind, client: GeminiClient) -> Self {
        Self {
            descriptor: kind.descriptor(),
            kind,
            client,
        }
    }
}

#[async_trait]
impl AnalysisEngine for GeminiEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    async fn validate(&self, input: &EngineInput) -> ValidationResult {
        let mut validation = check_input(&self.descriptor, input);
        if !self.kind.accepts(input) {
            validation
                .errors
                .push(format!("{} cannot analyze this input kind", self.descriptor.id));
            validation.is_valid = false;
        }
        validation
    }

    async fn analyze(
        &self,
        input: &EngineInput,
        options: &AnalysisOptions,
    ) -> Result<AnalysisResult, ComputeError> {
        let validation = self.validate(input).await;
        if !validation.is_valid {
            return Err(ComputeError::InvalidInput {
                engine_id: self.descriptor.id.clone(),
                reason: validation.errors.join("; "),
            });
        }

        let started = Instant::now();
        let prompt = build_prompt(input, options);
        let text = self
            .client
            .generate(&prompt)
            .await
            .map_err(|e| ComputeError::engine(self.descriptor.id.clone(), e.to_string()))?;

        let mut result = parse_analysis(&text, &self.descriptor, self.kind)?;
        result.processing_time_ms = started.elapsed().as_millis() as u64;
        result.insights.warnings.extend(validation.warnings);

        info!(
            engine_id = %self.descriptor.id,
            overall_score = result.overall_score,
            elapsed_ms = result.processing_time_ms,
            "Gemini analysis complete"
        );
        Ok(result)
    }
}

/// Render the prompt for any input kind
pub fn build_prompt(input: &EngineInput, options: &AnalysisOptions) -> String {
    let mut prompt = match input {
        EngineInput::Eeg(eeg) => eeg_prompt(eeg),
        EngineInput::Ppg(ppg) => ppg_prompt(ppg),
        EngineInput::Integrated(integrated) => integrated_prompt(integrated),
    };

    let _ = write!(
        prompt,
        "\nRespond in language '{}' with a single JSON object using these keys: \
         overall_score (0-100), stress_level (0-100), focus_level (0-100), \
         summary, detailed_analysis, recommendations (array of strings), \
         warnings (array of strings), metrics (object of named 0-100 scores), \
         confidence (0-1).\n",
        options.language
    );
    prompt
}

fn eeg_prompt(input: &EegAnalysisInput) -> String {
    let mut prompt = String::from(
        "You are an expert in EEG analysis. Interpret the following \
         frontal EEG measurement statistics.\n\n",
    );
    push_subject(&mut prompt, &input.personal_info, input.duration_secs);
    push_statistics(&mut prompt, "EEG", &input.statistics);
    push_defaulted(&mut prompt, &input.defaulted);
    prompt
}

fn ppg_prompt(input: &PpgAnalysisInput) -> String {
    let mut prompt = String::from(
        "You are an expert in heart rate variability analysis. Interpret the \
         following PPG measurement statistics.\n\n",
    );
    push_subject(&mut prompt, &input.personal_info, input.duration_secs);
    push_statistics(&mut prompt, "PPG", &input.statistics);
    if let Some(acc) = &input.acc {
        push_statistics(&mut prompt, "Accelerometer", acc);
    }
    push_defaulted(&mut prompt, &input.defaulted);
    prompt
}

fn integrated_prompt(input: &IntegratedAnalysisInput) -> String {
    let mut prompt = String::from(
        "You are a mental health specialist. Combine the following EEG and \
         PPG analyses into one integrated assessment with personalized \
         recommendations.\n\n",
    );
    push_subject(&mut prompt, &input.personal_info, input.duration_secs);
    if let Some(quality) = input.quality_score {
        let _ = writeln!(prompt, "Session signal quality: {quality:.1}/100");
    }
    for (label, analysis) in [("EEG", &input.eeg_analysis), ("PPG", &input.ppg_analysis)] {
        match analysis {
            Some(result) => {
                let _ = writeln!(
                    prompt,
                    "\n{label} analysis: overall {:.0}, stress {:.0}, focus {:.0}\nSummary: {}",
                    result.overall_score,
                    result.stress_level,
                    result.focus_level,
                    result.insights.summary
                );
            }
            None => {
                let _ = writeln!(prompt, "\n{label} analysis: not available");
            }
        }
    }
    prompt
}

fn push_subject(prompt: &mut String, info: &PersonalInfo, duration_secs: f64) {
    let gender = match info.gender {
        Gender::Male => "male",
        Gender::Female => "female",
        Gender::Other => "other",
    };
    let _ = writeln!(prompt, "Subject: age {}, {}", info.age, gender);
    if let Some(occupation) = &info.occupation {
        let _ = writeln!(prompt, "Occupation: {occupation}");
    }
    if let Some(department) = &info.department {
        let _ = writeln!(prompt, "Department: {department}");
    }
    let _ = writeln!(prompt, "Measurement duration: {duration_secs:.0} s");
}

/// One line per metric: `name: mean / std / min / max`
fn push_statistics<T: Serialize>(prompt: &mut String, label: &str, statistics: &T) {
    let _ = writeln!(prompt, "\n{label} statistics (mean / std / min / max):");
    if let Ok(Value::Object(fields)) = serde_json::to_value(statistics) {
        for (name, stats) in fields {
            let value = |key: &str| stats.get(key).and_then(Value::as_f64).unwrap_or(0.0);
            let _ = writeln!(
                prompt,
                "- {name}: {:.3} / {:.3} / {:.3} / {:.3}",
                value("mean"),
                value("std"),
                value("min"),
                value("max")
            );
        }
    }
}

fn push_defaulted(prompt: &mut String, defaulted: &[String]) {
    if !defaulted.is_empty() {
        let _ = writeln!(
            prompt,
            "\nThe following metrics were not measured and use population defaults: {}",
            defaulted.join(", ")
        );
    }
}

/// Map a model answer onto an [`AnalysisResult`]
pub fn parse_analysis(
    text: &str,
    descriptor: &EngineDescriptor,
    kind: EngineKind,
) -> Result<AnalysisResult, ComputeError> {
    let object = extract_json_object(text).ok_or_else(|| {
        ComputeError::ParseError(format!("{} returned no JSON object", descriptor.id))
    })?;

    let mut result = AnalysisResult::for_engine(descriptor);
    result.overall_score = score(&object, &["overall_score", "overallScore", "score"]);
    result.stress_level = score(&object, &["stress_level", "stressLevel"]);
    result.focus_level = score(&object, &["focus_level", "focusLevel"]);
    result.confidence = field(&object, &["confidence"])
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(0.8);
    result.insights = Insights {
        summary: text_field(&object, &["summary"]),
        detailed_analysis: text_field(&object, &["detailed_analysis", "detailedAnalysis"]),
        recommendations: string_list(&object, &["recommendations"]),
        warnings: string_list(&object, &["warnings"]),
    };

    let scores: BTreeMap<String, f64> = field(&object, &["metrics"])
        .and_then(Value::as_object)
        .map(|metrics| {
            metrics
                .iter()
                .filter_map(|(name, value)| Some((name.clone(), value.as_f64()?)))
                .collect()
        })
        .unwrap_or_default();
    result.metrics = match kind {
        EngineKind::Eeg => ModalityMetrics {
            eeg: scores,
            ..Default::default()
        },
        EngineKind::Ppg => ModalityMetrics {
            ppg: scores,
            ..Default::default()
        },
        EngineKind::Integrated => split_integrated_metrics(scores),
    };
    result.details = object;

    Ok(result)
}

/// Integrated answers prefix metric names with `eeg_`, `ppg_` or `acc_`;
/// anything else is filed under EEG and PPG both.
fn split_integrated_metrics(scores: BTreeMap<String, f64>) -> ModalityMetrics {
    let mut metrics = ModalityMetrics::default();
    for (name, value) in scores {
        if let Some(rest) = name.strip_prefix("eeg_") {
            metrics.eeg.insert(rest.to_string(), value);
        } else if let Some(rest) = name.strip_prefix("ppg_") {
            metrics.ppg.insert(rest.to_string(), value);
        } else if let Some(rest) = name.strip_prefix("acc_") {
            metrics.acc.insert(rest.to_string(), value);
        } else {
            metrics.eeg.insert(name.clone(), value);
            metrics.ppg.insert(name, value);
        }
    }
    metrics
}

/// First `{` through last `}`, parsed as a JSON object
fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn field<'a>(object: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| object.get(*key))
}

fn score(object: &Value, keys: &[&str]) -> f64 {
    field(object, keys)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

fn text_field(object: &Value, keys: &[&str]) -> String {
    field(object, keys)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_list(object: &Value, keys: &[&str]) -> Vec<String> {
    match field(object, keys) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}
