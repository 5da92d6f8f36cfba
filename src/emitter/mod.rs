//! Emitter boundary
//!
//! The scheduler hands every [`MetricObservation`] of a tick to an [`Emitter`].
//! What happens next (aggregation, export protocol) belongs to the emitter.

pub mod prometheus;

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::SystemTime;

use serde::Serialize;
use tracing::info;

use crate::config::{ConfigError, ExporterConfig};
use crate::mapping::MetricKind;

pub use prometheus::{PrometheusEmitter, PrometheusFormatter, PrometheusSample};

/// A timestamped metric value produced by one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricObservation {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
    #[serde(skip)]
    pub timestamp: SystemTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Receives metric observations
///
/// Called from the scheduler task only, but implementations are shared with
/// other tasks (e.g. an HTTP endpoint) and must be `Send + Sync`.
///
/// The observations of one successful read are bracketed by
/// [`begin_tick`](Emitter::begin_tick) and [`end_tick`](Emitter::end_tick).
/// A tick that fails to read calls neither.
pub trait Emitter: Send + Sync {
    fn begin_tick(&self) {}

    fn emit(&self, observation: MetricObservation);

    fn end_tick(&self) {}
}

/// Logs every observation (exporter type `logging`)
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEmitter;

impl Emitter for LoggingEmitter {
    fn emit(&self, observation: MetricObservation) {
        info!(
            metric = %observation.name,
            kind = %observation.kind,
            value = observation.value,
            labels = ?observation.labels,
            unit = observation.unit.as_deref().unwrap_or(""),
            "Observation"
        );
    }
}

/// Collects observations in memory
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    observations: Mutex<Vec<MetricObservation>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything recorded so far
    pub fn take(&self) -> Vec<MetricObservation> {
        match self.observations.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn len(&self) -> usize {
        self.observations.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Emitter for RecordingEmitter {
    fn emit(&self, observation: MetricObservation) {
        match self.observations.lock() {
            Ok(mut guard) => guard.push(observation),
            Err(poisoned) => poisoned.into_inner().push(observation),
        }
    }
}

/// Emitters this binary can build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterKind {
    Logging,
    Prometheus,
}

impl EmitterKind {
    /// Pick the emitter for the configured exporter type
    ///
    /// # Errors
    /// `otlp` and unknown types are [`ConfigError::UnsupportedExporter`].
    pub fn from_config(config: &ExporterConfig) -> Result<Self, ConfigError> {
        match config.exporter_type.trim().to_lowercase().as_str() {
            "logging" | "" => Ok(EmitterKind::Logging),
            "prometheus" => Ok(EmitterKind::Prometheus),
            other => Err(ConfigError::UnsupportedExporter(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exporter(kind: &str) -> ExporterConfig {
        ExporterConfig {
            exporter_type: kind.to_string(),
            otlp_endpoint: Some("http://collector:4317".to_string()),
            prometheus_host: "0.0.0.0".to_string(),
            prometheus_port: 9464,
        }
    }

    #[test]
    fn test_emitter_kind() {
        assert_eq!(EmitterKind::from_config(&exporter("logging")).unwrap(), EmitterKind::Logging);
        assert_eq!(
            EmitterKind::from_config(&exporter("Prometheus")).unwrap(),
            EmitterKind::Prometheus
        );
        let err = EmitterKind::from_config(&exporter("otlp")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedExporter(ref t) if t == "otlp"));
        assert!(EmitterKind::from_config(&exporter("statsd")).is_err());
    }

    #[test]
    fn test_recording_emitter() {
        let emitter = RecordingEmitter::new();
        emitter.emit(MetricObservation {
            name: "jvm.thread.count".to_string(),
            kind: MetricKind::UpDownCounter,
            value: 12.0,
            labels: BTreeMap::new(),
            timestamp: SystemTime::now(),
            unit: None,
            description: None,
        });
        assert_eq!(emitter.len(), 1);
        assert_eq!(emitter.take()[0].value, 12.0);
        assert!(emitter.is_empty());
    }
}
