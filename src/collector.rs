//! Real-time metrics collection
//!
//! Drives a fixed-length measurement session against a live [`MetricsSource`].
//!
//! # State Progression
//! IDLE → WAITING_FOR_DATA → COLLECTING → COMPLETED
//!
//! - **WAITING_FOR_DATA**: poll the source until EEG and PPG both report fresh
//!   indices, giving up after a bounded number of attempts and collecting
//!   anyway.
//! - **COLLECTING**: one tick per sampling interval. Each tick snapshots the
//!   source, defaults missing fields, derives fused scores and appends
//!   everything (rounded to 3 decimals) to the session series.
//! - **COMPLETED**: quality score computed, series frozen, completion observer
//!   invoked exactly once.
//!
//! A failing tick is reported to the observer and skipped. It still consumes
//! its slot, so the session length stays fixed and the completed series may
//! hold fewer than `target_samples` entries. `stop()` (or a [`StopHandle`])
//! aborts at any point without a completion callback. A handle stopped before
//! `start()` makes the next run return immediately. Dropping the `start()`
//! future mid-run returns the collector to idle.

use crate::error::ComputeError;
use crate::fusion::FusionDeriver;
use crate::source::MetricsSource;
use crate::stats::{round3, Stats};
use crate::types::{
    AccMetrics, EegMetrics, FusedMetrics, PpgMetrics, ProcessedDataTimeSeries, ProcessedMetrics,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default sampling interval (1 Hz)
pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 1000;

/// Samples in a standard session (60 s at 1 Hz)
pub const TARGET_SAMPLES: usize = 60;

/// Readiness polls before collection starts regardless
pub const MAX_READINESS_ATTEMPTS: u32 = 10;

/// Quality score weights per modality
const EEG_QUALITY_WEIGHT: f64 = 0.4;
const PPG_QUALITY_WEIGHT: f64 = 0.4;
const ACC_QUALITY_WEIGHT: f64 = 0.2;

/// Collector timing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub sampling_interval_ms: u64,
    pub target_samples: usize,
    pub max_readiness_attempts: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: DEFAULT_SAMPLING_INTERVAL_MS,
            target_samples: TARGET_SAMPLES,
            max_readiness_attempts: MAX_READINESS_ATTEMPTS,
        }
    }
}

impl CollectorConfig {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms.max(1))
    }
}

/// Who and what is being measured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub session_id: String,
    pub measurement_id: String,
    pub user_id: String,
}

impl SessionIdentity {
    pub fn new(
        session_id: impl Into<String>,
        measurement_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            measurement_id: measurement_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// Collector lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectionState {
    Idle,
    WaitingForData,
    Collecting,
    Completed,
}

/// Progress after a tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CollectionProgress {
    /// Ticks attempted so far, including failed ones
    pub tick: usize,
    pub target: usize,
    /// Samples actually stored
    pub data_points: usize,
    /// 0-100
    pub percent: f64,
}

/// Callbacks fired while a session runs. Every hook defaults to a no-op.
pub trait CollectionObserver: Send {
    fn on_state_change(&mut self, _state: CollectionState) {}

    fn on_tick(
        &mut self,
        _progress: &CollectionProgress,
        _metrics: &ProcessedMetrics,
        _fused: &FusedMetrics,
    ) {
    }

    fn on_error(&mut self, _tick: usize, _error: &ComputeError) {}

    fn on_complete(&mut self, _series: &ProcessedDataTimeSeries) {}
}

impl CollectionObserver for () {}

/// Cloneable handle that aborts a running session from another task
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

enum Readiness {
    Ready,
    TimedOut,
    Cancelled,
}

/// Fixed-length real-time collector
pub struct MetricsCollector {
    identity: SessionIdentity,
    config: CollectorConfig,
    source: Arc<dyn MetricsSource>,
    state: CollectionState,
    series: Option<ProcessedDataTimeSeries>,
    ticks: usize,
    cancel: CancellationToken,
}

impl MetricsCollector {
    /// Create a collector with the default 60 x 1 s session
    pub fn new(identity: SessionIdentity, source: Arc<dyn MetricsSource>) -> Self {
        Self::with_config(identity, source, CollectorConfig::default())
    }

    pub fn with_config(
        identity: SessionIdentity,
        source: Arc<dyn MetricsSource>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            identity,
            config,
            source,
            state: CollectionState::Idle,
            series: None,
            ticks: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> CollectionState {
        self.state
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Samples stored so far; always equals every series array's length
    pub fn data_point_count(&self) -> usize {
        self.series.as_ref().map_or(0, |series| series.len())
    }

    /// Ticks attempted in the current session
    pub fn tick_count(&self) -> usize {
        self.ticks
    }

    /// Series collected so far, if a session is active or completed
    pub fn series(&self) -> Option<&ProcessedDataTimeSeries> {
        self.series.as_ref()
    }

    /// Handle for stopping the next (or current) run from elsewhere.
    ///
    /// A handle covers one run; fetch a new one after that run was stopped.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.cancel.clone(),
        }
    }

    /// Abort and reset to idle. Safe to call in any state, any number of times.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.reset();
    }

    /// Run a full session.
    ///
    /// Returns `Some(series)` on completion and `None` if the session was
    /// stopped. Fails only when a session is already in progress.
    pub async fn start(
        &mut self,
        observer: &mut dyn CollectionObserver,
    ) -> Result<Option<ProcessedDataTimeSeries>, ComputeError> {
        if matches!(
            self.state,
            CollectionState::WaitingForData | CollectionState::Collecting
        ) {
            return Err(ComputeError::Collector(
                "collection already in progress".to_string(),
            ));
        }
        if self.cancel.is_cancelled() {
            info!(session_id = %self.identity.session_id, "Stop requested before start");
            self.cancel = CancellationToken::new();
            self.reset();
            return Ok(None);
        }

        let mut session = SessionGuard {
            collector: self,
            finished: false,
        };
        let outcome = session.collector.run_session(observer).await;
        session.finished = true;
        outcome
    }

    async fn run_session(
        &mut self,
        observer: &mut dyn CollectionObserver,
    ) -> Result<Option<ProcessedDataTimeSeries>, ComputeError> {
        let cancel = self.cancel.clone();

        let started_at = Utc::now();
        self.ticks = 0;
        self.series = Some(ProcessedDataTimeSeries::new(
            self.identity.session_id.clone(),
            self.identity.measurement_id.clone(),
            self.identity.user_id.clone(),
            started_at,
        ));

        info!(
            session_id = %self.identity.session_id,
            target_samples = self.config.target_samples,
            interval_ms = self.config.sampling_interval_ms,
            "Starting metrics collection"
        );
        self.transition(CollectionState::WaitingForData, observer);

        match self.wait_for_data(started_at, &cancel).await {
            Readiness::Ready => debug!("Real data ready, collecting"),
            Readiness::TimedOut => warn!(
                attempts = self.config.max_readiness_attempts,
                "Real data not ready; collecting with available values"
            ),
            Readiness::Cancelled => {
                info!(session_id = %self.identity.session_id, "Collection stopped while waiting");
                self.cancel = CancellationToken::new();
                self.reset();
                return Ok(None);
            }
        }

        self.transition(CollectionState::Collecting, observer);

        let mut interval = tokio::time::interval(self.config.sampling_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; samples land one interval apart.
        interval.tick().await;

        while self.ticks < self.config.target_samples {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(
                        session_id = %self.identity.session_id,
                        ticks = self.ticks,
                        "Collection stopped"
                    );
                    self.cancel = CancellationToken::new();
                    self.reset();
                    return Ok(None);
                }
                _ = interval.tick() => {}
            }

            self.ticks += 1;
            match self.collect_tick() {
                Ok((metrics, fused)) => {
                    let progress = self.progress();
                    observer.on_tick(&progress, &metrics, &fused);
                }
                Err(e) => {
                    warn!(tick = self.ticks, error = %e, "Collection tick failed; skipping sample");
                    observer.on_error(self.ticks, &e);
                }
            }
        }

        let series = self.finish()?;
        self.transition(CollectionState::Completed, observer);

        info!(
            session_id = %series.session_id,
            samples = series.len(),
            quality_score = series.metadata.quality_score,
            "Metrics collection completed"
        );
        observer.on_complete(&series);

        Ok(Some(series))
    }

    async fn wait_for_data(&self, since: DateTime<Utc>, cancel: &CancellationToken) -> Readiness {
        let attempts = self.config.max_readiness_attempts.max(1);
        for attempt in 1..=attempts {
            if self.source.is_ready(since) {
                debug!(attempt, "Metrics source ready");
                return Readiness::Ready;
            }
            if attempt == attempts {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Readiness::Cancelled,
                _ = tokio::time::sleep(self.config.sampling_interval()) => {}
            }
        }
        Readiness::TimedOut
    }

    fn collect_tick(&mut self) -> Result<(ProcessedMetrics, FusedMetrics), ComputeError> {
        let snapshot = self.source.snapshot()?;

        let metrics = ProcessedMetrics {
            eeg: EegMetrics::from_indices(&snapshot.eeg.indices),
            ppg: PpgMetrics::from_indices(&snapshot.ppg.indices),
            acc: AccMetrics::from_indices(&snapshot.acc.indices),
            posture: snapshot.posture.unwrap_or_default(),
        }
        .rounded();
        let fused = FusionDeriver::derive(&metrics).rounded();

        let series = self
            .series
            .as_mut()
            .ok_or_else(|| ComputeError::Collector("no active session".to_string()))?;
        series.push_sample(Utc::now(), &metrics, &fused);

        Ok((metrics, fused))
    }

    fn progress(&self) -> CollectionProgress {
        let target = self.config.target_samples;
        let percent = if target == 0 {
            100.0
        } else {
            round3(self.ticks as f64 / target as f64 * 100.0)
        };
        CollectionProgress {
            tick: self.ticks,
            target,
            data_points: self.data_point_count(),
            percent,
        }
    }

    fn finish(&mut self) -> Result<ProcessedDataTimeSeries, ComputeError> {
        let series = self
            .series
            .as_mut()
            .ok_or_else(|| ComputeError::Collector("no active session".to_string()))?;

        let end_time = Utc::now();
        series.end_time = end_time;
        series.duration_secs =
            round3((end_time - series.start_time).num_milliseconds() as f64 / 1000.0);
        series.metadata.quality_score = quality_score(series);

        Ok(series.clone())
    }

    fn transition(&mut self, state: CollectionState, observer: &mut dyn CollectionObserver) {
        debug!(from = ?self.state, to = ?state, "Collector state change");
        self.state = state;
        observer.on_state_change(state);
    }

    fn reset(&mut self) {
        self.state = CollectionState::Idle;
        self.series = None;
        self.ticks = 0;
    }
}

/// Resets the collector when a `start()` future is dropped before finishing
struct SessionGuard<'a> {
    collector: &'a mut MetricsCollector,
    finished: bool,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                session_id = %self.collector.identity.session_id,
                "Collection abandoned mid-run"
            );
            self.collector.reset();
        }
    }
}

/// Weighted mean signal quality across modalities, scaled to 0-100
fn quality_score(series: &ProcessedDataTimeSeries) -> f64 {
    let eeg = Stats::from_samples(&series.eeg.signal_quality).mean;
    let ppg = Stats::from_samples(&series.ppg.signal_quality).mean;
    let acc = Stats::from_samples(&series.acc.signal_quality).mean;
    round3(
        (EEG_QUALITY_WEIGHT * eeg + PPG_QUALITY_WEIGHT * ppg + ACC_QUALITY_WEIGHT * acc) * 100.0,
    )
}
