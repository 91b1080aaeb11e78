//! Report persistence
//!
//! Pipeline results are stored as report records tied to an organization, a
//! user and the measurement they analyze. [`ReportEncoder`] builds the record
//! (null fields stripped, producer provenance attached); [`ReportStore`] is
//! the persistence boundary, with an in-memory implementation that can be
//! snapshotted to JSON.

use crate::error::ComputeError;
use crate::pipeline::{PipelineResult, PipelineStatus};
use crate::{PROCESSING_VERSION, PRODUCER_NAME};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Current report record schema version
pub const REPORT_SCHEMA_VERSION: &str = "1.0.0";

/// Default page size for organization listings
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// A pipeline result waiting to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub organization_id: String,
    pub user_id: String,
    pub measurement_data_id: String,
    pub result: PipelineResult,
}

/// Software that produced the record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Durable report record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub measurement_data_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: PipelineStatus,
    pub schema_version: String,
    pub producer: ReportProducer,
    /// The pipeline result with null fields removed
    pub payload: serde_json::Value,
}

impl StoredReport {
    /// Decode the stored payload back into a pipeline result
    pub fn result(&self) -> Result<PipelineResult, ComputeError> {
        serde_json::from_value(self.payload.clone()).map_err(ComputeError::JsonError)
    }
}

/// Encoder for report records
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    /// Build the record stored under `id`
    pub fn encode(
        &self,
        report: &NewReport,
        id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<StoredReport, ComputeError> {
        let payload = strip_nulls(serde_json::to_value(&report.result)?);

        Ok(StoredReport {
            id: id.to_string(),
            organization_id: report.organization_id.clone(),
            user_id: report.user_id.clone(),
            measurement_data_id: report.measurement_data_id.clone(),
            created_at,
            updated_at: Utc::now(),
            status: report.result.metadata.status,
            schema_version: REPORT_SCHEMA_VERSION.to_string(),
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: PROCESSING_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            payload,
        })
    }
}

/// Remove null-valued object entries at every depth. Array elements are kept.
pub fn strip_nulls(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(strip_nulls).collect())
        }
        other => other,
    }
}

/// Offset pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Report persistence boundary
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Store under a freshly generated id
    async fn save(&self, report: NewReport) -> Result<StoredReport, ComputeError>;

    /// Insert or replace the record with `id`; `created_at` survives a re-save
    async fn save_with_id(&self, id: &str, report: NewReport) -> Result<StoredReport, ComputeError>;

    async fn get(&self, id: &str) -> Result<Option<StoredReport>, ComputeError>;

    /// Reports for one measurement, newest first
    async fn find_by_measurement(
        &self,
        measurement_data_id: &str,
    ) -> Result<Vec<StoredReport>, ComputeError>;

    /// One page of an organization's reports, newest first
    async fn list_by_organization(
        &self,
        organization_id: &str,
        page: Page,
    ) -> Result<Vec<StoredReport>, ComputeError>;
}

/// Process-local report store
#[derive(Default)]
pub struct InMemoryReportStore {
    reports: RwLock<HashMap<String, StoredReport>>,
    encoder: ReportEncoder,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an already-encoded record as is
    pub fn insert(&self, report: StoredReport) -> Result<(), ComputeError> {
        let mut reports = self
            .reports
            .write()
            .map_err(|_| ComputeError::Persistence("report store lock poisoned".to_string()))?;
        reports.insert(report.id.clone(), report);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.reports.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a snapshot written by [`InMemoryReportStore::to_json`]
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let records: Vec<StoredReport> = serde_json::from_str(json)
            .map_err(|e| ComputeError::ParseError(format!("Invalid report snapshot: {e}")))?;
        let store = Self::new();
        for record in records {
            store.insert(record)?;
        }
        Ok(store)
    }

    /// Every record, newest first
    pub fn to_json(&self) -> Result<String, ComputeError> {
        let records = self.filtered(|_| true)?;
        serde_json::to_string_pretty(&records).map_err(ComputeError::JsonError)
    }

    fn filtered<F>(&self, keep: F) -> Result<Vec<StoredReport>, ComputeError>
    where
        F: Fn(&StoredReport) -> bool,
    {
        let reports = self
            .reports
            .read()
            .map_err(|_| ComputeError::Persistence("report store lock poisoned".to_string()))?;
        let mut matching: Vec<StoredReport> =
            reports.values().filter(|r| keep(r)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn save(&self, report: NewReport) -> Result<StoredReport, ComputeError> {
        let id = Uuid::new_v4().to_string();
        self.save_with_id(&id, report).await
    }

    async fn save_with_id(
        &self,
        id: &str,
        report: NewReport,
    ) -> Result<StoredReport, ComputeError> {
        let mut reports = self
            .reports
            .write()
            .map_err(|_| ComputeError::Persistence("report store lock poisoned".to_string()))?;
        let created_at = reports
            .get(id)
            .map(|existing| existing.created_at)
            .unwrap_or_else(Utc::now);
        let record = self.encoder.encode(&report, id, created_at)?;
        reports.insert(id.to_string(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<StoredReport>, ComputeError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| ComputeError::Persistence("report store lock poisoned".to_string()))?;
        Ok(reports.get(id).cloned())
    }

    async fn find_by_measurement(
        &self,
        measurement_data_id: &str,
    ) -> Result<Vec<StoredReport>, ComputeError> {
        self.filtered(|r| r.measurement_data_id == measurement_data_id)
    }

    async fn list_by_organization(
        &self,
        organization_id: &str,
        page: Page,
    ) -> Result<Vec<StoredReport>, ComputeError> {
        Ok(self
            .filtered(|r| r.organization_id == organization_id)?
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect())
    }
}
