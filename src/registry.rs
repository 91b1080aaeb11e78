//! Engine registry
//!
//! In-memory catalogue of analysis engines keyed by id. Registration runs a
//! structural check of the engine descriptor and refuses engines with errors;
//! warnings are logged and never block. Each registered engine carries mutable
//! [`EngineMetadata`] (usage, rating, enabled flag) that lives exactly as long
//! as the registration.
//!
//! Nothing here is persisted. Construct one registry per process (or per test)
//! and share it through [`SharedEngineRegistry`].

use crate::engine::{
    AnalysisEngine, EngineDescriptor, EngineMetadata, SupportedDataTypes, ValidationResult,
};
use crate::error::ComputeError;
use crate::pipeline::EngineProvider;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Registration switches
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    /// Register without the structural check
    pub skip_validation: bool,
}

/// Sort key for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Cost,
    Name,
    /// Tracked average rating
    Quality,
    /// Usage count
    Popularity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Listing options shared by [`EngineRegistry::get_all`] and [`EngineRegistry::search`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub include_disabled: bool,
    pub sort_by: Option<SortBy>,
    pub order: SortOrder,
}

/// Search criteria; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Exact provider match
    pub provider: Option<String>,
    /// Every requested modality must be supported
    pub supported_data_types: Option<SupportedDataTypes>,
    /// Inclusive upper bound on cost per analysis
    pub max_cost: Option<i64>,
    /// Inclusive lower bound on tracked average rating
    pub min_quality_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Validation outcome for one registered engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineHealth {
    pub id: String,
    pub is_enabled: bool,
    pub validation: ValidationResult,
}

/// Re-validation of everything currently registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub total_engines: usize,
    pub valid_engines: usize,
    pub invalid_engines: usize,
    pub engines_with_warnings: usize,
    pub overall_health: HealthStatus,
    pub engines: Vec<EngineHealth>,
}

/// Catalogue of analysis engines
#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn AnalysisEngine>>,
    metadata: HashMap<String, EngineMetadata>,
    /// Registration order; listings start from it so sorting is stable
    order: Vec<String>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an engine under its descriptor id.
    ///
    /// Fails with every violation joined into one message when the descriptor
    /// has errors, unless validation is skipped. Replacing an existing id is
    /// logged as a warning.
    pub fn register(
        &mut self,
        engine: Arc<dyn AnalysisEngine>,
        options: RegisterOptions,
    ) -> Result<(), ComputeError> {
        let id = engine.descriptor().id.clone();

        if !options.skip_validation {
            let validation = Self::validate_engine(engine.descriptor());
            if !validation.is_valid {
                warn!(engine_id = %id, errors = ?validation.errors, "Engine rejected");
                return Err(ComputeError::InvalidEngine(validation.errors.join("; ")));
            }
            for warning in &validation.warnings {
                warn!(engine_id = %id, "{}", warning);
            }
        }

        if self.engines.contains_key(&id) {
            warn!(engine_id = %id, "Engine already registered; overwriting");
        } else {
            self.order.push(id.clone());
        }

        self.engines.insert(id.clone(), engine);
        self.metadata
            .insert(id.clone(), EngineMetadata::registered(Utc::now()));

        info!(engine_id = %id, "Engine registered");
        Ok(())
    }

    /// Structural check of a descriptor
    pub fn validate_engine(descriptor: &EngineDescriptor) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if descriptor.id.is_empty() {
            errors.push("id is required".to_string());
        } else if !is_valid_id(&descriptor.id) {
            errors.push(format!(
                "id '{}' must contain only lowercase letters, digits and hyphens",
                descriptor.id
            ));
        }

        for (field, value) in [
            ("name", &descriptor.name),
            ("description", &descriptor.description),
            ("version", &descriptor.version),
            ("provider", &descriptor.provider),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("{field} is required"));
            }
        }

        if !descriptor.version.trim().is_empty() && !is_semver(&descriptor.version) {
            warnings.push(format!(
                "version '{}' should follow the x.y.z format",
                descriptor.version
            ));
        }

        if descriptor.cost_per_analysis < 0 {
            errors.push(format!(
                "cost_per_analysis must be a non-negative integer (got {})",
                descriptor.cost_per_analysis
            ));
        }

        if !descriptor.supported_data_types.any() {
            errors.push(
                "supported_data_types must enable at least one of eeg, ppg, acc".to_string(),
            );
        }

        let caps = &descriptor.capabilities;
        if caps.supported_languages.is_empty() {
            errors.push("capabilities.supported_languages must not be empty".to_string());
        }
        if caps.max_data_duration_secs == 0 {
            errors.push("capabilities.max_data_duration_secs must be positive".to_string());
        }
        if !(0.0..=100.0).contains(&caps.min_data_quality) {
            errors.push(format!(
                "capabilities.min_data_quality must be within 0-100 (got {})",
                caps.min_data_quality
            ));
        }
        if caps.supported_output_formats.is_empty() {
            errors.push("capabilities.supported_output_formats must not be empty".to_string());
        }

        let quality_score = if errors.is_empty() {
            (100.0 - 10.0 * warnings.len() as f64).max(0.0)
        } else {
            0.0
        };
        ValidationResult::new(errors, warnings, quality_score)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn AnalysisEngine>> {
        self.engines.get(id).cloned()
    }

    /// Remove an engine and its metadata. Returns false if it was not registered.
    pub fn unregister(&mut self, id: &str) -> bool {
        if self.engines.remove(id).is_none() {
            return false;
        }
        self.metadata.remove(id);
        self.order.retain(|registered| registered != id);
        info!(engine_id = %id, "Engine unregistered");
        true
    }

    /// Registered engines, enabled only unless `include_disabled`
    pub fn get_all(&self, options: &ListOptions) -> Vec<Arc<dyn AnalysisEngine>> {
        self.list(options, |_, _| true)
    }

    /// [`EngineRegistry::get_all`] narrowed by `filter`
    pub fn search(
        &self,
        filter: &SearchFilter,
        options: &ListOptions,
    ) -> Vec<Arc<dyn AnalysisEngine>> {
        self.list(options, |descriptor, metadata| {
            if let Some(provider) = &filter.provider {
                if &descriptor.provider != provider {
                    return false;
                }
            }
            if let Some(required) = &filter.supported_data_types {
                if !descriptor.supported_data_types.covers(required) {
                    return false;
                }
            }
            if let Some(max_cost) = filter.max_cost {
                if descriptor.cost_per_analysis > max_cost {
                    return false;
                }
            }
            if let Some(min_quality) = filter.min_quality_score {
                if metadata.average_rating < min_quality {
                    return false;
                }
            }
            true
        })
    }

    fn list<F>(&self, options: &ListOptions, keep: F) -> Vec<Arc<dyn AnalysisEngine>>
    where
        F: Fn(&EngineDescriptor, &EngineMetadata) -> bool,
    {
        let mut entries: Vec<(&Arc<dyn AnalysisEngine>, &EngineMetadata)> = self
            .order
            .iter()
            .filter_map(|id| Some((self.engines.get(id)?, self.metadata.get(id)?)))
            .filter(|(_, metadata)| options.include_disabled || metadata.is_enabled)
            .filter(|(engine, metadata)| keep(engine.descriptor(), metadata))
            .collect();

        if let Some(sort_by) = options.sort_by {
            entries.sort_by(|(a, a_meta), (b, b_meta)| {
                let ordering = compare(sort_by, a.descriptor(), a_meta, b.descriptor(), b_meta);
                match options.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
        }

        entries.into_iter().map(|(engine, _)| Arc::clone(engine)).collect()
    }

    /// Enable or disable an engine. Returns false if the id is unknown.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.metadata.get_mut(id) {
            Some(metadata) => {
                metadata.is_enabled = enabled;
                debug!(engine_id = %id, enabled, "Engine enablement changed");
                true
            }
            None => false,
        }
    }

    /// Count a use and optionally fold in a rating.
    ///
    /// The rating blend is `(old + new) / 2`, which weights recent ratings
    /// exponentially rather than computing a true mean.
    pub fn record_usage(&mut self, id: &str, rating: Option<f64>) -> bool {
        let Some(metadata) = self.metadata.get_mut(id) else {
            return false;
        };
        metadata.usage_count += 1;
        metadata.last_used = Some(Utc::now());
        if let Some(rating) = rating.filter(|r| r.is_finite()) {
            metadata.average_rating = (metadata.average_rating + rating) / 2.0;
        }
        true
    }

    pub fn metadata(&self, id: &str) -> Option<&EngineMetadata> {
        self.metadata.get(id)
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.metadata.get(id).is_some_and(|m| m.is_enabled)
    }

    /// Re-validate every registered engine
    pub fn generate_health_report(&self) -> HealthReport {
        let engines: Vec<EngineHealth> = self
            .order
            .iter()
            .filter_map(|id| {
                let engine = self.engines.get(id)?;
                Some(EngineHealth {
                    id: id.clone(),
                    is_enabled: self.is_enabled(id),
                    validation: Self::validate_engine(engine.descriptor()),
                })
            })
            .collect();

        let total_engines = engines.len();
        let valid_engines = engines.iter().filter(|e| e.validation.is_valid).count();
        let engines_with_warnings = engines
            .iter()
            .filter(|e| !e.validation.warnings.is_empty())
            .count();

        let overall_health = if valid_engines == total_engines {
            HealthStatus::Healthy
        } else if valid_engines == 0 {
            HealthStatus::Critical
        } else {
            HealthStatus::Warning
        };

        HealthReport {
            total_engines,
            valid_engines,
            invalid_engines: total_engines - valid_engines,
            engines_with_warnings,
            overall_health,
            engines,
        }
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }
}

fn compare(
    sort_by: SortBy,
    a: &EngineDescriptor,
    a_meta: &EngineMetadata,
    b: &EngineDescriptor,
    b_meta: &EngineMetadata,
) -> Ordering {
    match sort_by {
        SortBy::Cost => a.cost_per_analysis.cmp(&b.cost_per_analysis),
        SortBy::Name => a.name.cmp(&b.name),
        SortBy::Quality => a_meta.average_rating.total_cmp(&b_meta.average_rating),
        SortBy::Popularity => a_meta.usage_count.cmp(&b_meta.usage_count),
    }
}

/// `^[a-z0-9-]+$`
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// `x.y.z` with numeric parts
fn is_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Cloneable handle to a registry shared between the orchestrator and callers.
///
/// Locks are taken only for the duration of a synchronous call and never held
/// across an await.
#[derive(Clone, Default)]
pub struct SharedEngineRegistry {
    inner: Arc<RwLock<EngineRegistry>>,
}

impl SharedEngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, EngineRegistry> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, EngineRegistry> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(
        &self,
        engine: Arc<dyn AnalysisEngine>,
        options: RegisterOptions,
    ) -> Result<(), ComputeError> {
        self.write().register(engine, options)
    }
}

impl From<EngineRegistry> for SharedEngineRegistry {
    fn from(registry: EngineRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }
}

impl EngineProvider for SharedEngineRegistry {
    /// Enabled engines only
    fn engine(&self, id: &str) -> Option<Arc<dyn AnalysisEngine>> {
        let registry = self.read();
        if registry.is_enabled(id) {
            registry.get(id)
        } else {
            None
        }
    }

    fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn record_usage(&self, id: &str) {
        self.write().record_usage(id, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{descriptor, MockEngine};
    use crate::test_logs::capture_logs;
    use pretty_assertions::assert_eq;

    fn engine(descriptor: EngineDescriptor) -> Arc<dyn AnalysisEngine> {
        Arc::new(MockEngine::new(descriptor))
    }

    fn named(
        id: &str,
        name: &str,
        cost: i64,
        data_types: SupportedDataTypes,
    ) -> Arc<dyn AnalysisEngine> {
        let mut d = descriptor(id, data_types);
        d.name = name.to_string();
        d.cost_per_analysis = cost;
        engine(d)
    }

    fn ids(engines: &[Arc<dyn AnalysisEngine>]) -> Vec<String> {
        engines.iter().map(|e| e.id().to_string()).collect()
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = EngineRegistry::new();
        registry
            .register(
                engine(descriptor("eeg-basic", SupportedDataTypes::EEG)),
                RegisterOptions::default(),
            )
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("eeg-basic").is_some());
        assert!(registry.get("missing").is_none());

        let metadata = registry.metadata("eeg-basic").unwrap();
        assert_eq!(metadata.usage_count, 0);
        assert_eq!(metadata.average_rating, 0.0);
        assert!(metadata.last_used.is_none());
        assert!(metadata.is_enabled);
    }

    #[test]
    fn test_reregistration_last_write_wins() {
        let mut registry = EngineRegistry::new();
        registry
            .register(
                named("x", "Engine A", 1, SupportedDataTypes::EEG),
                RegisterOptions::default(),
            )
            .unwrap();
        registry.record_usage("x", Some(4.0));

        let (result, output) = capture_logs(tracing::Level::WARN, || {
            registry.register(
                named("x", "Engine B", 1, SupportedDataTypes::EEG),
                RegisterOptions::default(),
            )
        });

        assert!(result.is_ok());
        assert_eq!(output.matches("WARN").count(), 1, "{output}");
        assert!(output.contains("Engine already registered; overwriting"));
        assert!(output.contains("engine_id=x"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("x").unwrap().descriptor().name, "Engine B");
        assert_eq!(registry.ids(), vec!["x".to_string()]);
        // metadata re-initialised
        assert_eq!(registry.metadata("x").unwrap().usage_count, 0);
    }

    #[test]
    fn test_negative_cost_is_rejected() {
        let mut registry = EngineRegistry::new();
        let err = registry
            .register(
                named("cheap", "Cheap", -1, SupportedDataTypes::EEG),
                RegisterOptions::default(),
            )
            .unwrap_err();

        assert!(matches!(err, ComputeError::InvalidEngine(_)));
        assert!(err.to_string().contains("cost"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_no_data_types_is_rejected() {
        let mut registry = EngineRegistry::new();
        let result = registry.register(
            engine(descriptor("nothing", SupportedDataTypes::default())),
            RegisterOptions::default(),
        );
        assert!(result.is_err());
        assert!(registry.get("nothing").is_none());
    }

    #[test]
    fn test_every_violation_is_reported() {
        let mut d = descriptor("Bad_ID", SupportedDataTypes::default());
        d.name = " ".to_string();
        d.cost_per_analysis = -5;
        d.capabilities.supported_languages.clear();
        d.capabilities.min_data_quality = 120.0;

        let validation = EngineRegistry::validate_engine(&d);

        assert!(!validation.is_valid);
        assert_eq!(validation.errors.len(), 6);
        let joined = validation.errors.join("; ");
        assert!(joined.contains("id"));
        assert!(joined.contains("name"));
        assert!(joined.contains("cost"));
        assert!(joined.contains("supported_data_types"));
        assert!(joined.contains("supported_languages"));
        assert!(joined.contains("min_data_quality"));
    }

    #[test]
    fn test_version_format_is_only_a_warning() {
        let mut d = descriptor("loose-version", SupportedDataTypes::PPG);
        d.version = "v2".to_string();

        let validation = EngineRegistry::validate_engine(&d);
        assert!(validation.is_valid);
        assert_eq!(validation.warnings.len(), 1);

        let mut registry = EngineRegistry::new();
        assert!(registry.register(engine(d), RegisterOptions::default()).is_ok());
    }

    #[test]
    fn test_skip_validation_registers_invalid_engine() {
        let mut registry = EngineRegistry::new();
        let result = registry.register(
            named("broken", "Broken", -1, SupportedDataTypes::EEG),
            RegisterOptions { skip_validation: true },
        );
        assert!(result.is_ok());
        assert!(registry.get("broken").is_some());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut registry = EngineRegistry::new();
        registry
            .register(
                engine(descriptor("gone", SupportedDataTypes::EEG)),
                RegisterOptions::default(),
            )
            .unwrap();

        assert!(registry.unregister("gone"));
        assert!(registry.metadata("gone").is_none());
        assert!(registry.ids().is_empty());
        assert!(!registry.unregister("gone"));
    }

    #[test]
    fn test_disabled_engines_hidden_by_default() {
        let mut registry = EngineRegistry::new();
        registry
            .register(engine(descriptor("a", SupportedDataTypes::EEG)), RegisterOptions::default())
            .unwrap();
        registry
            .register(engine(descriptor("b", SupportedDataTypes::EEG)), RegisterOptions::default())
            .unwrap();

        assert!(registry.set_enabled("a", false));
        assert!(!registry.set_enabled("unknown", false));
        assert!(!registry.metadata("a").unwrap().is_enabled);

        assert_eq!(ids(&registry.get_all(&ListOptions::default())), vec!["b"]);
        let all = registry.get_all(&ListOptions {
            include_disabled: true,
            ..Default::default()
        });
        assert_eq!(ids(&all), vec!["a", "b"]);

        registry.set_enabled("a", true);
        assert_eq!(registry.get_all(&ListOptions::default()).len(), 2);
    }

    #[test]
    fn test_sorting_is_stable() {
        let mut registry = EngineRegistry::new();
        for (id, name, cost) in [
            ("c", "Charlie", 5),
            ("a", "Alpha", 2),
            ("b", "Bravo", 5),
            ("d", "Delta", 1),
        ] {
            registry
                .register(
                    named(id, name, cost, SupportedDataTypes::EEG),
                    RegisterOptions::default(),
                )
                .unwrap();
        }

        let by_cost = registry.get_all(&ListOptions {
            sort_by: Some(SortBy::Cost),
            ..Default::default()
        });
        assert_eq!(ids(&by_cost), vec!["d", "a", "c", "b"]);

        let by_cost_desc = registry.get_all(&ListOptions {
            sort_by: Some(SortBy::Cost),
            order: SortOrder::Desc,
            ..Default::default()
        });
        // ties keep registration order
        assert_eq!(ids(&by_cost_desc), vec!["c", "b", "a", "d"]);

        let by_name = registry.get_all(&ListOptions {
            sort_by: Some(SortBy::Name),
            ..Default::default()
        });
        assert_eq!(ids(&by_name), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_sort_by_popularity_and_quality() {
        let mut registry = EngineRegistry::new();
        for id in ["a", "b", "c"] {
            registry
                .register(
                    engine(descriptor(id, SupportedDataTypes::EEG)),
                    RegisterOptions::default(),
                )
                .unwrap();
        }
        registry.record_usage("b", Some(5.0));
        registry.record_usage("b", None);
        registry.record_usage("c", Some(2.0));

        let popular = registry.get_all(&ListOptions {
            sort_by: Some(SortBy::Popularity),
            order: SortOrder::Desc,
            ..Default::default()
        });
        assert_eq!(ids(&popular), vec!["b", "c", "a"]);

        let quality = registry.get_all(&ListOptions {
            sort_by: Some(SortBy::Quality),
            order: SortOrder::Desc,
            ..Default::default()
        });
        assert_eq!(ids(&quality), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_search_requires_all_data_types() {
        let mut registry = EngineRegistry::new();
        let both = SupportedDataTypes {
            eeg: true,
            ppg: true,
            acc: false,
        };
        registry
            .register(
                named("eeg-only", "E", 1, SupportedDataTypes::EEG),
                RegisterOptions::default(),
            )
            .unwrap();
        registry
            .register(
                named("ppg-only", "P", 1, SupportedDataTypes::PPG),
                RegisterOptions::default(),
            )
            .unwrap();
        registry
            .register(named("both", "B", 3, both), RegisterOptions::default())
            .unwrap();
        registry
            .register(named("all", "A", 9, SupportedDataTypes::ALL), RegisterOptions::default())
            .unwrap();

        let filter = SearchFilter {
            supported_data_types: Some(both),
            ..Default::default()
        };
        assert_eq!(
            ids(&registry.search(&filter, &ListOptions::default())),
            vec!["both", "all"]
        );

        let cheap = SearchFilter {
            supported_data_types: Some(both),
            max_cost: Some(3),
            ..Default::default()
        };
        assert_eq!(ids(&registry.search(&cheap, &ListOptions::default())), vec!["both"]);
    }

    #[test]
    fn test_search_by_provider_and_rating() {
        let mut registry = EngineRegistry::new();
        let mut other = descriptor("other", SupportedDataTypes::EEG);
        other.provider = "acme".to_string();
        registry.register(engine(other), RegisterOptions::default()).unwrap();
        registry
            .register(
                engine(descriptor("mine", SupportedDataTypes::EEG)),
                RegisterOptions::default(),
            )
            .unwrap();
        registry.record_usage("mine", Some(4.0));

        let by_provider = SearchFilter {
            provider: Some("acme".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&registry.search(&by_provider, &ListOptions::default())), vec!["other"]);

        let rated = SearchFilter {
            min_quality_score: Some(2.0),
            ..Default::default()
        };
        assert_eq!(ids(&registry.search(&rated, &ListOptions::default())), vec!["mine"]);
    }

    #[test]
    fn test_record_usage_blends_rating() {
        let mut registry = EngineRegistry::new();
        registry
            .register(
                engine(descriptor("rated", SupportedDataTypes::EEG)),
                RegisterOptions::default(),
            )
            .unwrap();

        assert!(registry.record_usage("rated", Some(4.0)));
        assert!(registry.record_usage("rated", Some(5.0)));
        assert!(registry.record_usage("rated", None));
        assert!(!registry.record_usage("missing", Some(1.0)));

        let metadata = registry.metadata("rated").unwrap();
        assert_eq!(metadata.usage_count, 3);
        // (0 + 4) / 2 = 2, then (2 + 5) / 2 = 3.5
        assert_eq!(metadata.average_rating, 3.5);
        assert!(metadata.last_used.is_some());
    }

    #[test]
    fn test_health_report_with_one_invalid_engine() {
        let mut registry = EngineRegistry::new();
        for id in ["one", "two", "three"] {
            registry
                .register(
                    engine(descriptor(id, SupportedDataTypes::EEG)),
                    RegisterOptions::default(),
                )
                .unwrap();
        }
        registry
            .register(
                named("bad", "Bad", -1, SupportedDataTypes::EEG),
                RegisterOptions { skip_validation: true },
            )
            .unwrap();

        let report = registry.generate_health_report();

        assert_eq!(report.total_engines, 4);
        assert_eq!(report.valid_engines, 3);
        assert_eq!(report.invalid_engines, 1);
        assert_eq!(report.overall_health, HealthStatus::Warning);
        assert_eq!(report.engines.len(), 4);
    }

    #[test]
    fn test_health_report_extremes() {
        let mut registry = EngineRegistry::new();
        assert_eq!(registry.generate_health_report().overall_health, HealthStatus::Healthy);

        registry
            .register(
                named("bad", "Bad", -1, SupportedDataTypes::EEG),
                RegisterOptions { skip_validation: true },
            )
            .unwrap();
        assert_eq!(registry.generate_health_report().overall_health, HealthStatus::Critical);
    }

    #[test]
    fn test_shared_provider_hides_disabled_engines() {
        let shared = SharedEngineRegistry::new();
        assert!(EngineProvider::is_empty(&shared));
        shared
            .register(
                engine(descriptor("eeg-basic", SupportedDataTypes::EEG)),
                RegisterOptions::default(),
            )
            .unwrap();

        assert!(shared.engine("eeg-basic").is_some());
        shared.write().set_enabled("eeg-basic", false);
        assert!(shared.engine("eeg-basic").is_none());

        EngineProvider::record_usage(&shared, "eeg-basic");
        assert_eq!(shared.read().metadata("eeg-basic").unwrap().usage_count, 1);
    }
}
