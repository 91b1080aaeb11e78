//! Analysis pipeline orchestration
//!
//! Drives one measurement from caller-supplied data to a finished report:
//!
//! 1. Resolve engines (well-known ids, optional preferred overrides)
//! 2. Normalize EEG / PPG / accelerometer input into complete statistics
//! 3. Run the EEG and PPG analyses concurrently
//! 4. Feed both results into the integrated engine
//! 5. Account for duration, calls, cost and errors
//!
//! Only configuration problems detected before any engine runs (no personal
//! info, no integrated engine) are returned as `Err`. Every failure after that
//! point is folded into a [`PipelineResult`] whose status tells the caller
//! what happened; the integrated analysis is then a degraded placeholder.

use crate::engine::{
    AnalysisEngine, AnalysisOptions, AnalysisResult, EegAnalysisInput, EngineInput,
    IntegratedAnalysisInput, PpgAnalysisInput,
};
use crate::error::ComputeError;
use crate::normalizer::{AccInput, EegInput, InputNormalizer, PpgInput};
use crate::types::{PersonalInfo, ProcessedDataTimeSeries, SeriesSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default EEG engine id
pub const EEG_ENGINE_ID: &str = "eeg-advanced-gemini-v1";
/// Default PPG engine id
pub const PPG_ENGINE_ID: &str = "ppg-advanced-gemini-v1";
/// Default integrated engine id
pub const INTEGRATED_ENGINE_ID: &str = "integrated-advanced-gemini-v1";

/// Measurement length assumed when the caller does not state one
pub const DEFAULT_DURATION_SECS: f64 = 60.0;

/// Where the orchestrator gets its engines from
pub trait EngineProvider: Send + Sync {
    /// A usable engine bound to `id`
    fn engine(&self, id: &str) -> Option<Arc<dyn AnalysisEngine>>;

    /// No engines registered at all
    fn is_empty(&self) -> bool;

    /// Called after each successful analysis
    fn record_usage(&self, _id: &str) {}
}

type Bootstrap = Box<dyn FnOnce() -> Result<(), ComputeError> + Send>;

/// What the orchestrator does when an EEG or PPG analysis fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalityFailurePolicy {
    /// The first failing modality fails the whole run
    #[default]
    AbortPipeline,
    /// Record the failure and continue with whatever succeeded
    Isolate,
}

/// Orchestrator tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Upper bound for every `analyze()` call
    pub engine_timeout_secs: u64,
    pub modality_failure: ModalityFailurePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            engine_timeout_secs: 120,
            modality_failure: ModalityFailurePolicy::default(),
        }
    }
}

impl PipelineSettings {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs.max(1))
    }
}

/// Per-modality measurement data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eeg: Option<EegInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ppg: Option<PpgInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acc: Option<AccInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Session quality, 0-100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

impl MeasurementData {
    /// Raw inputs taken straight from a collected session
    pub fn from_series(series: &ProcessedDataTimeSeries) -> Self {
        Self {
            eeg: Some(EegInput::Raw(series.eeg.clone())),
            ppg: Some(PpgInput::Raw(series.ppg.clone())),
            acc: Some(AccInput::Raw(series.acc.clone())),
            duration_secs: Some(series.duration_secs),
            quality_score: Some(series.metadata.quality_score),
        }
    }

    /// Aggregated inputs taken from a session summary
    pub fn from_summary(summary: &SeriesSummary) -> Self {
        Self {
            eeg: Some(EegInput::Aggregated(summary.eeg.clone())),
            ppg: Some(PpgInput::Aggregated(summary.ppg.clone())),
            acc: Some(AccInput::Aggregated(summary.acc.clone())),
            duration_secs: Some(summary.duration_secs),
            quality_score: Some(summary.quality_score),
        }
    }
}

/// Engine ids to use instead of the well-known defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferredEngines {
    pub eeg: Option<String>,
    pub ppg: Option<String>,
    pub integrated: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub skip_eeg: bool,
    pub skip_ppg: bool,
    pub preferred_engines: PreferredEngines,
    pub analysis: AnalysisOptions,
}

/// Everything needed for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub personal_info: Option<PersonalInfo>,
    #[serde(default)]
    pub measurement_data: MeasurementData,
    /// Collected session; fills any modality missing from `measurement_data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_time_series: Option<ProcessedDataTimeSeries>,
    #[serde(default)]
    pub options: PipelineOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Processing,
    Completed,
    Error,
    Cancelled,
}

/// Run accounting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub pipeline_id: String,
    pub total_duration_ms: u64,
    /// Engine invocations attempted
    pub api_calls: u32,
    pub timestamp: DateTime<Utc>,
    pub status: PipelineStatus,
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Credits consumed by successful analyses
    #[serde(default)]
    pub total_cost: i64,
}

/// Outcome of a run; produced even when the run failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eeg_analysis: Option<AnalysisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppg_analysis: Option<AnalysisResult>,
    pub integrated_analysis: AnalysisResult,
    pub metadata: PipelineMetadata,
}

/// Milestone notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineProgress {
    pub status: PipelineStatus,
    /// 0-100
    pub percent: u8,
    pub message: String,
}

struct ResolvedEngines {
    eeg: Option<Arc<dyn AnalysisEngine>>,
    ppg: Option<Arc<dyn AnalysisEngine>>,
    integrated: Arc<dyn AnalysisEngine>,
}

/// Mutable state of one run
struct RunState {
    eeg_analysis: Option<AnalysisResult>,
    ppg_analysis: Option<AnalysisResult>,
    integrated_analysis: Option<AnalysisResult>,
    api_calls: u32,
    total_cost: i64,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Multi-stage analysis orchestrator
pub struct PipelineOrchestrator {
    provider: Arc<dyn EngineProvider>,
    bootstrap: Mutex<Option<Bootstrap>>,
    settings: PipelineSettings,
    progress: Option<mpsc::UnboundedSender<PipelineProgress>>,
}

impl PipelineOrchestrator {
    pub fn new(provider: Arc<dyn EngineProvider>) -> Self {
        Self {
            provider,
            bootstrap: Mutex::new(None),
            settings: PipelineSettings::default(),
            progress: None,
        }
    }

    /// Initializer run on first use if the provider has no engines yet
    pub fn with_bootstrap<F>(mut self, bootstrap: F) -> Self
    where
        F: FnOnce() -> Result<(), ComputeError> + Send + 'static,
    {
        self.bootstrap = Mutex::new(Some(Box::new(bootstrap)));
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Send milestone updates to `sender`
    pub fn with_progress(mut self, sender: mpsc::UnboundedSender<PipelineProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn run_pipeline(
        &self,
        config: &PipelineConfig,
    ) -> Result<PipelineResult, ComputeError> {
        self.run_pipeline_with_cancel(config, CancellationToken::new())
            .await
    }

    /// Run with an external cancellation token.
    ///
    /// Cancelling aborts outstanding engine calls; the result then has
    /// status `Cancelled`.
    pub async fn run_pipeline_with_cancel(
        &self,
        config: &PipelineConfig,
        cancel: CancellationToken,
    ) -> Result<PipelineResult, ComputeError> {
        let personal_info = config
            .personal_info
            .as_ref()
            .ok_or(ComputeError::MissingPersonalInfo)?;

        let mut state = RunState {
            eeg_analysis: None,
            ppg_analysis: None,
            integrated_analysis: None,
            api_calls: 0,
            total_cost: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        let engines = self.resolve_engines(&config.options, &mut state.warnings)?;

        let pipeline_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        info!(%pipeline_id, "Starting analysis pipeline");
        self.report(PipelineStatus::Processing, 0, "Starting analysis pipeline");

        let outcome = self
            .execute(config, personal_info, &engines, &mut state, &cancel)
            .await;

        let status = match outcome {
            Ok(()) => PipelineStatus::Completed,
            Err(ComputeError::Cancelled) => {
                warn!(%pipeline_id, "Analysis pipeline cancelled");
                state.errors.push(ComputeError::Cancelled.to_string());
                PipelineStatus::Cancelled
            }
            Err(e) => {
                error!(%pipeline_id, error = %e, "Analysis pipeline failed");
                state.errors.push(e.to_string());
                PipelineStatus::Error
            }
        };

        let integrated_analysis = match state.integrated_analysis.take() {
            Some(result) => result,
            None => {
                let reason = state
                    .errors
                    .last()
                    .cloned()
                    .unwrap_or_else(|| "integrated analysis did not run".to_string());
                AnalysisResult::degraded(engines.integrated.id(), &reason)
            }
        };

        let metadata = PipelineMetadata {
            pipeline_id,
            total_duration_ms: started.elapsed().as_millis() as u64,
            api_calls: state.api_calls,
            timestamp: Utc::now(),
            status,
            errors: state.errors,
            warnings: state.warnings,
            total_cost: state.total_cost,
        };

        info!(
            pipeline_id = %metadata.pipeline_id,
            status = ?metadata.status,
            api_calls = metadata.api_calls,
            duration_ms = metadata.total_duration_ms,
            "Analysis pipeline finished"
        );
        self.report(status, 100, completion_message(status));

        Ok(PipelineResult {
            eeg_analysis: state.eeg_analysis,
            ppg_analysis: state.ppg_analysis,
            integrated_analysis,
            metadata,
        })
    }

    async fn execute(
        &self,
        config: &PipelineConfig,
        personal_info: &PersonalInfo,
        engines: &ResolvedEngines,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(), ComputeError> {
        let options = &config.options;
        let data = &config.measurement_data;
        let series = config.processed_time_series.as_ref();
        let duration_secs = data
            .duration_secs
            .or(series.map(|s| s.duration_secs))
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(DEFAULT_DURATION_SECS);
        let quality_score = data
            .quality_score
            .or(series.map(|s| s.metadata.quality_score));

        let eeg_input = if options.skip_eeg {
            None
        } else {
            data.eeg
                .clone()
                .or_else(|| series.map(|s| EegInput::Raw(s.eeg.clone())))
        };
        let ppg_input = if options.skip_ppg {
            None
        } else {
            data.ppg
                .clone()
                .or_else(|| series.map(|s| PpgInput::Raw(s.ppg.clone())))
        };
        let acc_input = data
            .acc
            .clone()
            .or_else(|| series.map(|s| AccInput::Raw(s.acc.clone())));

        let eeg_request = match (&engines.eeg, eeg_input) {
            (Some(engine), Some(input)) => {
                let normalized = InputNormalizer::eeg(&input);
                if normalized.coverage == 0.0 {
                    state
                        .warnings
                        .push("EEG data contained no metrics; defaults were used".to_string());
                }
                Some((
                    Arc::clone(engine),
                    EngineInput::Eeg(EegAnalysisInput {
                        statistics: normalized.statistics,
                        personal_info: personal_info.clone(),
                        duration_secs,
                        defaulted: normalized.defaulted,
                    }),
                ))
            }
            _ => None,
        };

        let ppg_request = match (&engines.ppg, ppg_input) {
            (Some(engine), Some(input)) => {
                let normalized = InputNormalizer::ppg(&input);
                if normalized.coverage == 0.0 {
                    state
                        .warnings
                        .push("PPG data contained no metrics; defaults were used".to_string());
                }
                let acc = acc_input
                    .as_ref()
                    .map(|acc| InputNormalizer::acc(acc).statistics);
                Some((
                    Arc::clone(engine),
                    EngineInput::Ppg(PpgAnalysisInput {
                        statistics: normalized.statistics,
                        acc,
                        personal_info: personal_info.clone(),
                        duration_secs,
                        defaulted: normalized.defaulted,
                    }),
                ))
            }
            _ => None,
        };

        self.report(PipelineStatus::Processing, 10, "Analyzing EEG and PPG data");

        state.api_calls += eeg_request.is_some() as u32 + ppg_request.is_some() as u32;
        let analysis_options = &options.analysis;

        let eeg_call = async {
            match &eeg_request {
                Some((engine, input)) => self
                    .invoke(engine, input, analysis_options, cancel)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let ppg_call = async {
            match &ppg_request {
                Some((engine, input)) => self
                    .invoke(engine, input, analysis_options, cancel)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };

        let (eeg_analysis, ppg_analysis) = match self.settings.modality_failure {
            ModalityFailurePolicy::AbortPipeline => tokio::try_join!(eeg_call, ppg_call)?,
            ModalityFailurePolicy::Isolate => {
                let (eeg, ppg) = tokio::join!(eeg_call, ppg_call);
                (
                    settle(eeg, "EEG", &mut state.errors)?,
                    settle(ppg, "PPG", &mut state.errors)?,
                )
            }
        };

        for result in eeg_analysis.iter().chain(ppg_analysis.iter()) {
            state.total_cost += result.cost_used;
        }
        state.eeg_analysis = eeg_analysis;
        state.ppg_analysis = ppg_analysis;

        self.report(PipelineStatus::Processing, 40, "Modality analyses complete");

        let integrated_input = EngineInput::Integrated(IntegratedAnalysisInput {
            personal_info: personal_info.clone(),
            eeg_analysis: state.eeg_analysis.clone(),
            ppg_analysis: state.ppg_analysis.clone(),
            duration_secs,
            quality_score,
        });

        self.report(PipelineStatus::Processing, 50, "Running integrated analysis");

        state.api_calls += 1;
        let integrated = self
            .invoke(&engines.integrated, &integrated_input, analysis_options, cancel)
            .await?;
        state.total_cost += integrated.cost_used;
        state.integrated_analysis = Some(integrated);

        Ok(())
    }

    /// One engine call bounded by the configured timeout and `cancel`
    async fn invoke(
        &self,
        engine: &Arc<dyn AnalysisEngine>,
        input: &EngineInput,
        options: &AnalysisOptions,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, ComputeError> {
        let engine_id = engine.id().to_string();
        let timeout = self.settings.engine_timeout();
        debug!(%engine_id, "Invoking analysis engine");

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ComputeError::Cancelled),
            outcome = tokio::time::timeout(timeout, engine.analyze(input, options)) => outcome,
        };

        let result = outcome.map_err(|_| ComputeError::EngineTimeout {
            engine_id: engine_id.clone(),
            timeout_ms: timeout.as_millis() as u64,
        })??;

        self.provider.record_usage(&engine_id);
        debug!(
            %engine_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Analysis engine finished"
        );
        Ok(result)
    }

    fn resolve_engines(
        &self,
        options: &PipelineOptions,
        warnings: &mut Vec<String>,
    ) -> Result<ResolvedEngines, ComputeError> {
        self.bootstrap_once();

        let preferred = &options.preferred_engines;
        let eeg = self.lookup(EEG_ENGINE_ID, preferred.eeg.as_deref());
        let ppg = self.lookup(PPG_ENGINE_ID, preferred.ppg.as_deref());
        let integrated = self
            .lookup(INTEGRATED_ENGINE_ID, preferred.integrated.as_deref())
            .ok_or_else(|| {
                ComputeError::MissingIntegratedEngine(INTEGRATED_ENGINE_ID.to_string())
            })?;

        if eeg.is_none() && !options.skip_eeg {
            warn!(engine_id = EEG_ENGINE_ID, "EEG engine unavailable; skipping EEG analysis");
            warnings.push(format!("EEG engine {EEG_ENGINE_ID} unavailable; EEG analysis skipped"));
        }
        if ppg.is_none() && !options.skip_ppg {
            warn!(engine_id = PPG_ENGINE_ID, "PPG engine unavailable; skipping PPG analysis");
            warnings.push(format!("PPG engine {PPG_ENGINE_ID} unavailable; PPG analysis skipped"));
        }

        Ok(ResolvedEngines {
            eeg,
            ppg,
            integrated,
        })
    }

    /// Preferred id when it resolves, otherwise the default id
    fn lookup(&self, default_id: &str, preferred: Option<&str>) -> Option<Arc<dyn AnalysisEngine>> {
        if let Some(id) = preferred {
            match self.provider.engine(id) {
                Some(engine) => return Some(engine),
                None => debug!(preferred = id, "Preferred engine not found; using default"),
            }
        }
        self.provider.engine(default_id)
    }

    fn bootstrap_once(&self) {
        let bootstrap = self
            .bootstrap
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(bootstrap) = bootstrap else {
            return;
        };
        if !self.provider.is_empty() {
            return;
        }
        info!("No engines registered; bootstrapping defaults");
        if let Err(e) = bootstrap() {
            warn!(error = %e, "Engine bootstrap failed");
        }
    }

    fn report(&self, status: PipelineStatus, percent: u8, message: &str) {
        if let Some(sender) = &self.progress {
            // A closed receiver only means nobody is listening.
            let _ = sender.send(PipelineProgress {
                status,
                percent,
                message: message.to_string(),
            });
        }
    }
}

/// Keep a failed modality's error and carry on. Cancellation still aborts.
fn settle(
    outcome: Result<Option<AnalysisResult>, ComputeError>,
    modality: &str,
    errors: &mut Vec<String>,
) -> Result<Option<AnalysisResult>, ComputeError> {
    match outcome {
        Ok(result) => Ok(result),
        Err(ComputeError::Cancelled) => Err(ComputeError::Cancelled),
        Err(e) => {
            warn!(modality, error = %e, "Modality analysis failed; continuing");
            errors.push(format!("{modality} analysis failed: {e}"));
            Ok(None)
        }
    }
}

fn completion_message(status: PipelineStatus) -> &'static str {
    match status {
        PipelineStatus::Completed => "Analysis complete",
        PipelineStatus::Cancelled => "Analysis cancelled",
        PipelineStatus::Error | PipelineStatus::Processing => "Analysis failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{descriptor, Behavior, MockEngine};
    use crate::engine::SupportedDataTypes;
    use crate::registry::{RegisterOptions, SharedEngineRegistry};
    use crate::stats::Stats;
    use crate::types::{EegAggregate, Gender, PpgAggregate};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        registry: SharedEngineRegistry,
        eeg: Arc<MockEngine>,
        ppg: Arc<MockEngine>,
        integrated: Arc<MockEngine>,
    }

    impl Fixture {
        fn new(eeg: Behavior, ppg: Behavior, integrated: Behavior) -> Self {
            let registry = SharedEngineRegistry::new();
            let eeg = Arc::new(
                MockEngine::new(descriptor(EEG_ENGINE_ID, SupportedDataTypes::EEG))
                    .with_behavior(eeg),
            );
            let ppg = Arc::new(
                MockEngine::new(descriptor(PPG_ENGINE_ID, SupportedDataTypes::PPG))
                    .with_behavior(ppg),
            );
            let integrated = Arc::new(
                MockEngine::new(descriptor(INTEGRATED_ENGINE_ID, SupportedDataTypes::ALL))
                    .with_behavior(integrated),
            );
            for engine in [&eeg, &ppg, &integrated] {
                registry
                    .register(
                        Arc::clone(engine) as Arc<dyn AnalysisEngine>,
                        RegisterOptions::default(),
                    )
                    .unwrap();
            }
            Self {
                registry,
                eeg,
                ppg,
                integrated,
            }
        }

        fn healthy() -> Self {
            Self::new(Behavior::Succeed, Behavior::Succeed, Behavior::Succeed)
        }

        fn orchestrator(&self) -> PipelineOrchestrator {
            PipelineOrchestrator::new(Arc::new(self.registry.clone()))
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            personal_info: Some(PersonalInfo::new(30, Gender::Male)),
            measurement_data: MeasurementData {
                eeg: Some(EegInput::Aggregated(EegAggregate {
                    alpha_power: Some(Stats::constant(0.45)),
                    signal_quality: Some(Stats::constant(0.9)),
                    ..Default::default()
                })),
                ppg: Some(PpgInput::Aggregated(PpgAggregate {
                    heart_rate: Some(Stats::constant(68.0)),
                    signal_quality: Some(Stats::constant(0.85)),
                    ..Default::default()
                })),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        let fixture = Fixture::healthy();
        let result = fixture.orchestrator().run_pipeline(&config()).await.unwrap();

        assert!(result.eeg_analysis.is_some());
        assert!(result.ppg_analysis.is_some());
        assert_eq!(result.integrated_analysis.engine_id, INTEGRATED_ENGINE_ID);
        assert!(!result.integrated_analysis.is_degraded());
        assert_eq!(result.metadata.status, PipelineStatus::Completed);
        assert_eq!(result.metadata.api_calls, 3);
        assert_eq!(result.metadata.total_cost, 3);
        assert!(result.metadata.errors.is_empty());

        let registry = fixture.registry.read();
        assert_eq!(registry.metadata(EEG_ENGINE_ID).unwrap().usage_count, 1);
        assert_eq!(registry.metadata(INTEGRATED_ENGINE_ID).unwrap().usage_count, 1);
    }

    #[tokio::test]
    async fn test_failing_engine_resolves_with_error_status() {
        let fixture = Fixture::new(Behavior::Fail, Behavior::Succeed, Behavior::Succeed);
        let result = fixture.orchestrator().run_pipeline(&config()).await.unwrap();

        assert_eq!(result.metadata.status, PipelineStatus::Error);
        assert!(!result.metadata.errors.is_empty());
        assert!(result.integrated_analysis.is_degraded());
        assert_eq!(result.integrated_analysis.confidence, 0.0);
        assert_eq!(fixture.integrated.calls(), 0);
    }

    #[tokio::test]
    async fn test_failing_integrated_engine_resolves() {
        let fixture = Fixture::new(Behavior::Succeed, Behavior::Succeed, Behavior::Fail);
        let result = fixture.orchestrator().run_pipeline(&config()).await.unwrap();

        assert_eq!(result.metadata.status, PipelineStatus::Error);
        assert_eq!(result.metadata.api_calls, 3);
        assert!(result.eeg_analysis.is_some());
        assert!(result.integrated_analysis.is_degraded());
        assert!(result.metadata.errors[0].contains(INTEGRATED_ENGINE_ID));
    }

    #[tokio::test]
    async fn test_isolate_policy_keeps_surviving_modality() {
        let fixture = Fixture::new(Behavior::Fail, Behavior::Succeed, Behavior::Succeed);
        let orchestrator = fixture.orchestrator().with_settings(PipelineSettings {
            modality_failure: ModalityFailurePolicy::Isolate,
            ..Default::default()
        });

        let result = orchestrator.run_pipeline(&config()).await.unwrap();

        assert_eq!(result.metadata.status, PipelineStatus::Completed);
        assert!(result.eeg_analysis.is_none());
        assert!(result.ppg_analysis.is_some());
        assert!(!result.integrated_analysis.is_degraded());
        assert_eq!(result.metadata.errors.len(), 1);
        assert!(result.metadata.errors[0].starts_with("EEG analysis failed"));
        assert_eq!(result.metadata.api_calls, 3);
    }

    #[tokio::test]
    async fn test_skip_eeg() {
        let fixture = Fixture::healthy();
        let mut config = config();
        config.options.skip_eeg = true;

        let result = fixture.orchestrator().run_pipeline(&config).await.unwrap();

        assert!(result.eeg_analysis.is_none());
        assert!(result.ppg_analysis.is_some());
        assert_eq!(result.metadata.api_calls, 2);
        assert_eq!(fixture.eeg.calls(), 0);
        assert!(result.metadata.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_skip_both_modalities() {
        let fixture = Fixture::healthy();
        let mut config = config();
        config.options.skip_eeg = true;
        config.options.skip_ppg = true;

        let result = fixture.orchestrator().run_pipeline(&config).await.unwrap();

        assert_eq!(result.metadata.api_calls, 1);
        assert_eq!(fixture.ppg.calls(), 0);
        assert_eq!(result.metadata.status, PipelineStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_modality_engine_is_a_warning() {
        let fixture = Fixture::healthy();
        fixture.registry.write().unregister(PPG_ENGINE_ID);

        let result = fixture.orchestrator().run_pipeline(&config()).await.unwrap();

        assert_eq!(result.metadata.status, PipelineStatus::Completed);
        assert!(result.ppg_analysis.is_none());
        assert_eq!(result.metadata.api_calls, 2);
        assert_eq!(result.metadata.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_integrated_engine_is_fatal() {
        let fixture = Fixture::healthy();
        fixture.registry.write().unregister(INTEGRATED_ENGINE_ID);

        let result = fixture.orchestrator().run_pipeline(&config()).await;

        assert!(matches!(result, Err(ComputeError::MissingIntegratedEngine(_))));
        assert_eq!(fixture.eeg.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_personal_info_is_fatal() {
        let fixture = Fixture::healthy();
        let mut config = config();
        config.personal_info = None;

        let result = fixture.orchestrator().run_pipeline(&config).await;

        assert!(matches!(result, Err(ComputeError::MissingPersonalInfo)));
    }

    #[tokio::test]
    async fn test_preferred_engine_override() {
        let fixture = Fixture::healthy();
        let custom = Arc::new(MockEngine::new(descriptor(
            "eeg-custom-v2",
            SupportedDataTypes::EEG,
        )));
        fixture
            .registry
            .register(Arc::clone(&custom) as Arc<dyn AnalysisEngine>, RegisterOptions::default())
            .unwrap();

        let mut config = config();
        config.options.preferred_engines.eeg = Some("eeg-custom-v2".to_string());
        config.options.preferred_engines.ppg = Some("does-not-exist".to_string());

        let result = fixture.orchestrator().run_pipeline(&config).await.unwrap();

        assert_eq!(result.eeg_analysis.unwrap().engine_id, "eeg-custom-v2");
        assert_eq!(result.ppg_analysis.unwrap().engine_id, PPG_ENGINE_ID);
        assert_eq!(custom.calls(), 1);
        assert_eq!(fixture.eeg.calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_score_free_engine_is_a_real_result() {
        let fixture = Fixture::healthy();
        let mut free = descriptor("integrated-free-v1", SupportedDataTypes::ALL);
        free.cost_per_analysis = 0;
        fixture
            .registry
            .register(
                Arc::new(MockEngine::new(free).with_score(0.0)),
                RegisterOptions::default(),
            )
            .unwrap();

        let mut config = config();
        config.options.preferred_engines.integrated = Some("integrated-free-v1".to_string());

        let result = fixture.orchestrator().run_pipeline(&config).await.unwrap();

        assert_eq!(result.metadata.status, PipelineStatus::Completed);
        assert_eq!(result.integrated_analysis.engine_id, "integrated-free-v1");
        assert_eq!(result.integrated_analysis.overall_score, 0.0);
        assert_eq!(result.metadata.total_cost, 2);
        assert!(!result.integrated_analysis.is_degraded());
    }

    #[tokio::test]
    async fn test_bootstrap_runs_once_when_empty() {
        let registry = SharedEngineRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let target = registry.clone();
        let counter = Arc::clone(&runs);
        let orchestrator =
            PipelineOrchestrator::new(Arc::new(registry.clone())).with_bootstrap(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                for (id, types) in [
                    (EEG_ENGINE_ID, SupportedDataTypes::EEG),
                    (PPG_ENGINE_ID, SupportedDataTypes::PPG),
                    (INTEGRATED_ENGINE_ID, SupportedDataTypes::ALL),
                ] {
                    target.register(
                        Arc::new(MockEngine::new(descriptor(id, types))),
                        RegisterOptions::default(),
                    )?;
                }
                Ok(())
            });

        let first = orchestrator.run_pipeline(&config()).await.unwrap();
        let second = orchestrator.run_pipeline(&config()).await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(first.metadata.status, PipelineStatus::Completed);
        assert_eq!(second.metadata.api_calls, 3);
    }

    #[tokio::test]
    async fn test_bootstrap_skipped_when_engines_exist() {
        let fixture = Fixture::healthy();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let orchestrator = fixture.orchestrator().with_bootstrap(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        orchestrator.run_pipeline(&config()).await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_engine_times_out() {
        let fixture = Fixture::new(Behavior::Succeed, Behavior::Succeed, Behavior::Hang);
        let orchestrator = fixture.orchestrator().with_settings(PipelineSettings {
            engine_timeout_secs: 5,
            ..Default::default()
        });

        let result = orchestrator.run_pipeline(&config()).await.unwrap();

        assert_eq!(result.metadata.status, PipelineStatus::Error);
        assert!(result.metadata.errors[0].contains("timed out"));
        assert!(result.integrated_analysis.is_degraded());
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let fixture = Fixture::new(Behavior::Hang, Behavior::Hang, Behavior::Succeed);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = fixture
            .orchestrator()
            .run_pipeline_with_cancel(&config(), cancel)
            .await
            .unwrap();

        assert_eq!(result.metadata.status, PipelineStatus::Cancelled);
        assert!(result.integrated_analysis.is_degraded());
        assert_eq!(fixture.integrated.calls(), 0);
    }

    #[tokio::test]
    async fn test_progress_milestones() {
        let fixture = Fixture::healthy();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator = fixture.orchestrator().with_progress(tx);

        orchestrator.run_pipeline(&config()).await.unwrap();
        drop(orchestrator);

        let mut percents = Vec::new();
        while let Some(progress) = rx.recv().await {
            percents.push(progress.percent);
        }
        assert_eq!(percents, vec![0, 10, 40, 50, 100]);
    }

    #[tokio::test]
    async fn test_collected_series_feeds_pipeline() {
        let fixture = Fixture::healthy();
        let mut series = ProcessedDataTimeSeries::new("s", "m", "u", Utc::now());
        series.eeg.alpha_power = vec![0.4, 0.5];
        series.ppg.heart_rate = vec![70.0, 72.0];
        series.duration_secs = 60.0;

        let config = PipelineConfig {
            personal_info: Some(PersonalInfo::new(41, Gender::Female)),
            processed_time_series: Some(series),
            ..Default::default()
        };

        let result = fixture.orchestrator().run_pipeline(&config).await.unwrap();

        assert_eq!(result.metadata.status, PipelineStatus::Completed);
        assert_eq!(result.metadata.api_calls, 3);
    }

    #[tokio::test]
    async fn test_session_summary_feeds_pipeline() {
        let fixture = Fixture::healthy();
        let mut series = ProcessedDataTimeSeries::new("s", "m", "u", Utc::now());
        series.eeg.alpha_power = vec![0.4, 0.5];
        series.ppg.heart_rate = vec![70.0, 74.0];
        series.duration_secs = 2.0;
        series.metadata.quality_score = 88.0;

        let data = MeasurementData::from_summary(&series.summary());
        match &data.ppg {
            Some(PpgInput::Aggregated(ppg)) => {
                assert_eq!(ppg.heart_rate.map(|s| s.mean), Some(72.0));
            }
            other => panic!("expected aggregated PPG input, got {other:?}"),
        }
        assert_eq!(data.quality_score, Some(88.0));

        let config = PipelineConfig {
            personal_info: Some(PersonalInfo::new(41, Gender::Female)),
            measurement_data: data,
            ..Default::default()
        };
        let result = fixture.orchestrator().run_pipeline(&config).await.unwrap();

        assert_eq!(result.metadata.status, PipelineStatus::Completed);
        assert_eq!(result.metadata.api_calls, 3);
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "personal_info": {"age": 30, "gender": "male"},
            "measurement_data": {
                "eeg": {"type": "aggregated", "data": {}},
                "ppg": {"type": "raw", "data": {"heart_rate": [70.0, 71.0]}}
            },
            "options": {"skip_ppg": true}
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.personal_info.unwrap().age, 30);
        assert!(config.options.skip_ppg);
        assert!(matches!(config.measurement_data.ppg, Some(PpgInput::Raw(_))));
        assert_eq!(config.options.analysis.language, "en");
    }
}
