//! Live metrics sources
//!
//! The collector never talks to signal-processing code directly. It reads the
//! latest per-modality indices through [`MetricsSource`], a synchronous
//! snapshot accessor with a cheap readiness check.

use crate::error::ComputeError;
use crate::types::Posture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

/// Latest indices for one modality
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModalitySnapshot {
    /// Metric name to value, keyed by the metric struct field names
    pub indices: HashMap<String, f64>,
    /// When the indices were last refreshed
    pub updated_at: Option<DateTime<Utc>>,
}

impl ModalitySnapshot {
    pub fn new(indices: HashMap<String, f64>, updated_at: DateTime<Utc>) -> Self {
        Self {
            indices,
            updated_at: Some(updated_at),
        }
    }

    /// Non-empty indices refreshed strictly after `since`
    pub fn is_fresh(&self, since: DateTime<Utc>) -> bool {
        !self.indices.is_empty() && self.updated_at.map_or(false, |t| t > since)
    }
}

/// Point-in-time view of every modality
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSnapshot {
    pub eeg: ModalitySnapshot,
    pub ppg: ModalitySnapshot,
    pub acc: ModalitySnapshot,
    pub posture: Option<Posture>,
}

impl MetricsSnapshot {
    /// Real data is flowing: both EEG and PPG are fresh relative to `since`
    pub fn is_ready(&self, since: DateTime<Utc>) -> bool {
        self.eeg.is_fresh(since) && self.ppg.is_fresh(since)
    }
}

/// Source of live processed indices
pub trait MetricsSource: Send + Sync {
    /// Latest known indices
    fn snapshot(&self) -> Result<MetricsSnapshot, ComputeError>;

    /// Whether real data newer than `since` is available
    fn is_ready(&self, since: DateTime<Utc>) -> bool {
        self.snapshot()
            .map(|snapshot| snapshot.is_ready(since))
            .unwrap_or(false)
    }
}

/// Latest-value cell written by signal processing and read by the collector
#[derive(Debug, Default)]
pub struct SharedMetricsSource {
    latest: RwLock<MetricsSnapshot>,
}

impl SharedMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_eeg(&self, indices: HashMap<String, f64>) {
        self.write(|snapshot| snapshot.eeg = ModalitySnapshot::new(indices, Utc::now()));
    }

    pub fn update_ppg(&self, indices: HashMap<String, f64>) {
        self.write(|snapshot| snapshot.ppg = ModalitySnapshot::new(indices, Utc::now()));
    }

    pub fn update_acc(&self, indices: HashMap<String, f64>) {
        self.write(|snapshot| snapshot.acc = ModalitySnapshot::new(indices, Utc::now()));
    }

    pub fn set_posture(&self, posture: Posture) {
        self.write(|snapshot| snapshot.posture = Some(posture));
    }

    fn write(&self, f: impl FnOnce(&mut MetricsSnapshot)) {
        let mut guard = self.latest.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

impl MetricsSource for SharedMetricsSource {
    fn snapshot(&self) -> Result<MetricsSnapshot, ComputeError> {
        self.latest
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| ComputeError::MetricsSource("snapshot lock poisoned".to_string()))
    }
}

/// Replays recorded snapshots, one per `snapshot()` call.
///
/// Freshness timestamps are rewritten to the replay time so a recording made
/// earlier still passes the readiness check. The last frame repeats once the
/// recording is exhausted.
#[derive(Debug)]
pub struct ReplaySource {
    frames: Vec<MetricsSnapshot>,
    cursor: Mutex<usize>,
}

impl ReplaySource {
    pub fn new(frames: Vec<MetricsSnapshot>) -> Self {
        Self {
            frames,
            cursor: Mutex::new(0),
        }
    }

    /// Parse NDJSON, one `MetricsSnapshot` per non-empty line
    pub fn from_ndjson(ndjson: &str) -> Result<Self, ComputeError> {
        let mut frames = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let frame = serde_json::from_str::<MetricsSnapshot>(trimmed).map_err(|e| {
                ComputeError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
            })?;
            frames.push(frame);
        }
        Ok(Self::new(frames))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn frame_at(&self, index: usize) -> MetricsSnapshot {
        let Some(frame) = self.frames.get(index.min(self.frames.len().saturating_sub(1))) else {
            return MetricsSnapshot::default();
        };
        let now = Utc::now();
        let mut frame = frame.clone();
        for modality in [&mut frame.eeg, &mut frame.ppg, &mut frame.acc] {
            if !modality.indices.is_empty() {
                modality.updated_at = Some(now);
            }
        }
        frame
    }
}

impl MetricsSource for ReplaySource {
    fn snapshot(&self) -> Result<MetricsSnapshot, ComputeError> {
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| ComputeError::MetricsSource("replay cursor poisoned".to_string()))?;
        let frame = self.frame_at(*cursor);
        *cursor += 1;
        Ok(frame)
    }

    /// Peeks at the current frame without advancing
    fn is_ready(&self, since: DateTime<Utc>) -> bool {
        match self.cursor.lock() {
            Ok(cursor) => self.frame_at(*cursor).is_ready(since),
            Err(_) => false,
        }
    }
}
