//! Built-in analysis engines
//!
//! The default deployment registers three Gemini-backed engines under the
//! well-known pipeline ids. [`bootstrap_default_engines`] is what the
//! orchestrator runs on a cold start.

mod gemini;

pub use gemini::{
    build_prompt, parse_analysis, EngineKind, GeminiClient, GeminiEngine, GeminiSettings,
};

use crate::error::ComputeError;
use crate::registry::{RegisterOptions, SharedEngineRegistry};
use std::sync::Arc;
use tracing::{info, warn};

/// Register the EEG, PPG and integrated Gemini engines
pub fn bootstrap_default_engines(
    registry: &SharedEngineRegistry,
    settings: &GeminiSettings,
) -> Result<(), ComputeError> {
    if settings.api_key.as_deref().map_or(true, |key| key.trim().is_empty()) {
        warn!("No Gemini API key configured; default engines will fail on analyze");
    }

    for kind in [EngineKind::Eeg, EngineKind::Ppg, EngineKind::Integrated] {
        let client = GeminiClient::new(settings)?;
        registry.register(
            Arc::new(GeminiEngine::new(kind, client)),
            RegisterOptions::default(),
        )?;
    }

    info!(model = %settings.model, "Default analysis engines registered");
    Ok(())
}
