//! Mindscope - real-time biometric metrics collection and analysis pipeline
//!
//! Mindscope collects per-second EEG, PPG and accelerometer indices over a
//! fixed-length measurement session, derives fused stress/fatigue/wellbeing
//! scores, and hands the aggregated statistics to a multi-stage analysis
//! pipeline: EEG engine and PPG engine in parallel, then an integrated engine.
//!
//! ## Modules
//!
//! - **Collection**: [`collector::MetricsCollector`] against a [`source::MetricsSource`]
//! - **Engines**: [`engine::AnalysisEngine`] implementations catalogued in
//!   [`registry::EngineRegistry`]
//! - **Pipeline**: [`pipeline::PipelineOrchestrator`] producing a [`pipeline::PipelineResult`]
//! - **Reports**: [`report::ReportStore`] persistence boundary

pub mod collector;
pub mod config;
pub mod engine;
pub mod engines;
pub mod error;
pub mod fusion;
pub mod normalizer;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod source;
pub mod stats;
pub mod types;

#[cfg(test)]
mod test_logs;

pub use collector::{CollectionObserver, CollectionState, MetricsCollector, SessionIdentity};
pub use engine::{AnalysisEngine, AnalysisResult, EngineDescriptor};
pub use error::ComputeError;
pub use pipeline::{
    EngineProvider, PipelineConfig, PipelineOrchestrator, PipelineResult, PipelineStatus,
};
pub use registry::{EngineRegistry, SharedEngineRegistry};
pub use stats::Stats;
pub use types::{ProcessedDataTimeSeries, ProcessedMetrics};

/// Processing version embedded in every series and report
pub const PROCESSING_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for stored reports
pub const PRODUCER_NAME: &str = "mindscope";
