//! Prometheus pull emitter
//!
//! Keeps the latest value of every (name, labels) series and serves them in
//! the text exposition format (version 0.0.4). A series the latest completed
//! tick did not refresh is dropped, so objects that went away stop being
//! exposed.
//!
//! ```text
//! # HELP <metric_name> <help_text>
//! # TYPE <metric_name> <type>
//! <metric_name>{<label1>="<value1>",<label2>="<value2>"} <value> [<timestamp>]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::UNIX_EPOCH;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument};

use super::{Emitter, MetricObservation};
use crate::config::{ConfigError, ExporterConfig, PROMETHEUS_HOST};
use crate::mapping::MetricKind;
use crate::metrics::ScrapeStats;

/// One exposition sample
#[derive(Debug, Clone, PartialEq)]
pub struct PrometheusSample {
    pub name: String,
    pub kind: MetricKind,
    /// Histogram family this `_bucket`, `_sum` or `_count` series belongs to
    pub histogram: Option<String>,
    pub help: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp: Option<i64>,
}

impl PrometheusSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Gauge,
            histogram: None,
            help: None,
            labels: BTreeMap::new(),
            value,
            timestamp: None,
        }
    }

    pub fn with_kind(mut self, kind: MetricKind) -> Self {
        self.kind = kind;
        self
    }

    /// Mark the sample as one series of a histogram family
    pub fn in_histogram(mut self, family: impl Into<String>) -> Self {
        self.histogram = Some(family.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    /// Convert an observation, sanitizing metric and label names
    pub fn from_observation(observation: &MetricObservation) -> Self {
        let help = match (&observation.description, &observation.unit) {
            (Some(desc), Some(unit)) => Some(format!("{} ({})", desc, unit)),
            (Some(desc), None) => Some(desc.clone()),
            (None, Some(unit)) => Some(format!("({})", unit)),
            (None, None) => None,
        };
        let timestamp = observation
            .timestamp
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as i64);

        Self {
            name: sanitize_name(&observation.name),
            kind: observation.kind,
            histogram: None,
            help,
            labels: observation
                .labels
                .iter()
                .map(|(k, v)| (sanitize_name(k).replace(':', "_"), v.clone()))
                .collect(),
            value: observation.value,
            timestamp,
        }
    }

    fn type_str(&self) -> &'static str {
        if self.histogram.is_some() {
            return "histogram";
        }
        match self.kind {
            MetricKind::Counter => "counter",
            MetricKind::Gauge | MetricKind::UpDownCounter => "gauge",
        }
    }

    /// Name under which HELP and TYPE are written
    fn family(&self) -> &str {
        self.histogram.as_deref().unwrap_or(&self.name)
    }
}

/// Replace characters outside `[a-zA-Z0-9_:]` and guard a leading digit
pub fn sanitize_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) || sanitized.is_empty() {
        sanitized.insert(0, '_');
    }
    sanitized
}

/// Prometheus exposition format formatter
#[derive(Debug, Clone, Default)]
pub struct PrometheusFormatter {
    include_timestamp: bool,
}

impl PrometheusFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to include timestamps in output
    pub fn with_timestamps(mut self, include: bool) -> Self {
        self.include_timestamp = include;
        self
    }

    /// Format samples into the text exposition format
    ///
    /// HELP and TYPE lines are emitted once per family, samples of the same
    /// family are grouped together in order of first occurrence. A family is
    /// the sample name, or the histogram name for `_bucket`/`_sum`/`_count`.
    pub fn format(&self, samples: &[PrometheusSample]) -> String {
        if samples.is_empty() {
            return String::new();
        }

        let mut output = String::with_capacity(samples.len() * 100);
        for (name, group) in Self::group_by_name(samples) {
            if let Some(help) = group.iter().find_map(|s| s.help.as_ref()) {
                output.push_str(&format!("# HELP {} {}\n", name, Self::escape_help(help)));
            }
            output.push_str(&format!("# TYPE {} {}\n", name, group[0].type_str()));

            for sample in group {
                output.push_str(&self.format_line(sample));
                output.push('\n');
            }
        }
        output
    }

    fn group_by_name(samples: &[PrometheusSample]) -> Vec<(String, Vec<&PrometheusSample>)> {
        let mut groups: HashMap<&str, Vec<&PrometheusSample>> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();

        for sample in samples {
            let family = sample.family();
            groups
                .entry(family)
                .or_insert_with(|| {
                    order.push(family);
                    Vec::new()
                })
                .push(sample);
        }

        order
            .into_iter()
            .filter_map(|name| groups.remove(name).map(|g| (name.to_string(), g)))
            .collect()
    }

    fn format_line(&self, sample: &PrometheusSample) -> String {
        let mut line = sample.name.clone();

        if !sample.labels.is_empty() {
            let pairs: Vec<String> = sample
                .labels
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, Self::escape_label_value(v)))
                .collect();
            line.push('{');
            line.push_str(&pairs.join(","));
            line.push('}');
        }

        line.push(' ');
        line.push_str(&Self::format_value(sample.value));

        if self.include_timestamp {
            if let Some(ts) = sample.timestamp {
                line.push(' ');
                line.push_str(&ts.to_string());
            }
        }
        line
    }

    /// - NaN → "NaN"
    /// - ±Inf → "+Inf" / "-Inf"
    /// - Integers are formatted without decimal point
    fn format_value(value: f64) -> String {
        if value.is_nan() {
            "NaN".to_string()
        } else if value.is_infinite() {
            if value.is_sign_positive() {
                "+Inf".to_string()
            } else {
                "-Inf".to_string()
            }
        } else if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else if value.abs() >= 1e6 || (value.abs() < 1e-3 && value != 0.0) {
            format!("{:e}", value)
        } else {
            format!("{}", value)
        }
    }

    fn escape_help(help: &str) -> String {
        help.replace('\\', "\\\\").replace('\n', "\\n")
    }

    fn escape_label_value(value: &str) -> String {
        let mut escaped = String::with_capacity(value.len());
        for c in value.chars() {
            match c {
                '\\' => escaped.push_str("\\\\"),
                '"' => escaped.push_str("\\\""),
                '\n' => escaped.push_str("\\n"),
                _ => escaped.push(c),
            }
        }
        escaped
    }
}

type SeriesKey = (String, Vec<(String, String)>);

/// Latest sample of a series and the tick that wrote it
#[derive(Debug, Clone)]
struct Series {
    generation: u64,
    sample: PrometheusSample,
}

/// Emitter backing the `/metrics` endpoint
#[derive(Debug, Default)]
pub struct PrometheusEmitter {
    series: RwLock<BTreeMap<SeriesKey, Series>>,
    generation: AtomicU64,
    stats: Option<Arc<ScrapeStats>>,
    formatter: PrometheusFormatter,
}

impl PrometheusEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append scraper self-metrics to every exposition
    pub fn with_stats(mut self, stats: Arc<ScrapeStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Number of distinct series held
    pub fn series_count(&self) -> usize {
        self.series.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Render the current state in the text exposition format
    pub fn render(&self) -> String {
        let mut samples: Vec<PrometheusSample> = match self.series.read() {
            Ok(series) => series.values().map(|s| s.sample.clone()).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .values()
                .map(|s| s.sample.clone())
                .collect(),
        };
        if let Some(stats) = &self.stats {
            samples.extend(stats.to_samples());
        }
        self.formatter.format(&samples)
    }

    /// HTTP routes: `/`, `/health` and `/metrics`
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/", get(root))
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    /// Serve the routes until `shutdown` resolves
    pub async fn serve<F>(
        self: Arc<Self>,
        listener: tokio::net::TcpListener,
        shutdown: F,
    ) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, "Prometheus endpoint listening");
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

impl Emitter for PrometheusEmitter {
    fn begin_tick(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn emit(&self, observation: MetricObservation) {
        let sample = PrometheusSample::from_observation(&observation);
        let key = (
            sample.name.clone(),
            sample
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        let entry = Series {
            generation: self.generation.load(Ordering::SeqCst),
            sample,
        };
        match self.series.write() {
            Ok(mut series) => {
                series.insert(key, entry);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key, entry);
            }
        }
    }

    fn end_tick(&self) {
        let current = self.generation.load(Ordering::SeqCst);
        let mut series = match self.series.write() {
            Ok(series) => series,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = series.len();
        series.retain(|_, s| s.generation == current);
        let evicted = before - series.len();
        if evicted > 0 {
            debug!(evicted, remaining = series.len(), "Dropped stale series");
        }
    }
}

/// Bind address for the Prometheus endpoint
///
/// `localhost` is accepted, anything else must be an IP address.
pub fn bind_address(config: &ExporterConfig) -> Result<SocketAddr, ConfigError> {
    let host = config.prometheus_host.trim();
    let ip: IpAddr = if host == "localhost" {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        host.parse().map_err(|e| ConfigError::ValidationError {
            key: PROMETHEUS_HOST.to_string(),
            reason: format!("'{}' is not an IP address: {}", host, e),
        })?
    };
    Ok(SocketAddr::from((ip, config.prometheus_port)))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn root() -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>jmx-scraper</title>
</head>
<body>
    <h1>jmx-scraper</h1>
    <p>Version: {}</p>
    <ul>
        <li><a href="/health">Health Check</a></li>
        <li><a href="/metrics">Metrics</a></li>
    </ul>
</body>
</html>"#,
        env!("CARGO_PKG_VERSION")
    ))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[instrument(skip(emitter), name = "metrics_handler")]
async fn metrics(State(emitter): State<Arc<PrometheusEmitter>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        emitter.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn observation(name: &str, value: f64, labels: &[(&str, &str)]) -> MetricObservation {
        MetricObservation {
            name: name.to_string(),
            kind: MetricKind::Counter,
            value,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timestamp: UNIX_EPOCH + Duration::from_millis(1609459200000),
            unit: Some("{collection}".to_string()),
            description: Some("Total collections".to_string()),
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("jvm.gc.collections.count"), "jvm_gc_collections_count");
        assert_eq!(sanitize_name("kafka.consumer.fetch-rate"), "kafka_consumer_fetch_rate");
        assert_eq!(sanitize_name("50thPercentile"), "_50thPercentile");
    }

    #[test]
    fn test_format_with_labels_and_help() {
        let samples = vec![
            PrometheusSample::new("requests_total", 1000.0)
                .with_kind(MetricKind::Counter)
                .with_help("Total requests")
                .with_label("method", "GET"),
            PrometheusSample::new("requests_total", 500.0)
                .with_kind(MetricKind::Counter)
                .with_label("method", "POST"),
        ];
        let output = PrometheusFormatter::new().format(&samples);

        assert_eq!(output.matches("# HELP requests_total").count(), 1);
        assert_eq!(output.matches("# TYPE requests_total counter").count(), 1);
        assert!(output.contains("requests_total{method=\"GET\"} 1000\n"));
        assert!(output.contains("requests_total{method=\"POST\"} 500\n"));
    }

    #[test]
    fn test_updowncounter_renders_as_gauge() {
        let samples =
            vec![PrometheusSample::new("pool_used", 3.0).with_kind(MetricKind::UpDownCounter)];
        assert!(PrometheusFormatter::new()
            .format(&samples)
            .contains("# TYPE pool_used gauge"));
    }

    #[test]
    fn test_histogram_is_one_family() {
        let family = "tick_seconds";
        let samples = vec![
            PrometheusSample::new("tick_seconds_bucket", 1.0)
                .in_histogram(family)
                .with_help("Tick durations")
                .with_label("le", "0.1"),
            PrometheusSample::new("tick_seconds_bucket", 3.0)
                .in_histogram(family)
                .with_label("le", "+Inf"),
            PrometheusSample::new("tick_seconds_sum", 0.75).in_histogram(family),
            PrometheusSample::new("tick_seconds_count", 3.0).in_histogram(family),
        ];
        let output = PrometheusFormatter::new().format(&samples);

        assert_eq!(output.matches("# TYPE").count(), 1);
        assert_eq!(output.matches("# HELP").count(), 1);
        assert!(output
            .starts_with("# HELP tick_seconds Tick durations\n# TYPE tick_seconds histogram\n"));
        assert!(output.contains("tick_seconds_bucket{le=\"+Inf\"} 3\n"));
        assert!(output.contains("tick_seconds_sum 0.75\n"));
        assert!(output.ends_with("tick_seconds_count 3\n"));
    }

    #[test]
    fn test_format_timestamps() {
        let samples = vec![PrometheusSample::new("m", 42.0).with_timestamp(1609459200000)];
        assert!(PrometheusFormatter::new().format(&samples).contains("m 42\n"));
        assert!(PrometheusFormatter::new()
            .with_timestamps(true)
            .format(&samples)
            .contains("m 42 1609459200000"));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(PrometheusFormatter::format_value(f64::NAN), "NaN");
        assert_eq!(PrometheusFormatter::format_value(f64::INFINITY), "+Inf");
        assert_eq!(PrometheusFormatter::format_value(f64::NEG_INFINITY), "-Inf");
        assert_eq!(PrometheusFormatter::format_value(-100.0), "-100");
        assert!(PrometheusFormatter::format_value(1.23456).starts_with("1.23"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(
            PrometheusFormatter::escape_label_value("all\"\\\n"),
            "all\\\"\\\\\\n"
        );
    }

    #[test]
    fn test_emitter_keeps_latest_value_per_series() {
        let emitter = PrometheusEmitter::new();
        emitter.emit(observation("jvm.gc.collections.count", 1.0, &[("name", "G1 Young")]));
        emitter.emit(observation("jvm.gc.collections.count", 5.0, &[("name", "G1 Young")]));
        emitter.emit(observation("jvm.gc.collections.count", 2.0, &[("name", "G1 Old")]));
        assert_eq!(emitter.series_count(), 2);

        let output = emitter.render();
        assert!(
            output.contains("# HELP jvm_gc_collections_count Total collections ({collection})")
        );
        assert!(output.contains("jvm_gc_collections_count{name=\"G1 Young\"} 5\n"));
        assert!(output.contains("jvm_gc_collections_count{name=\"G1 Old\"} 2\n"));
    }

    #[test]
    fn test_series_missing_from_latest_tick_are_evicted() {
        let emitter = PrometheusEmitter::new();

        emitter.begin_tick();
        emitter.emit(observation("kafka.request.count", 3.0, &[("topic", "orders")]));
        emitter.emit(observation("kafka.request.count", 4.0, &[("topic", "payments")]));
        emitter.end_tick();
        assert_eq!(emitter.series_count(), 2);

        emitter.begin_tick();
        emitter.emit(observation("kafka.request.count", 5.0, &[("topic", "orders")]));
        emitter.end_tick();

        let output = emitter.render();
        assert_eq!(emitter.series_count(), 1);
        assert!(output.contains("kafka_request_count{topic=\"orders\"} 5\n"));
        assert!(!output.contains("payments"), "output: {output}");

        // a tick that produced nothing leaves nothing behind
        emitter.begin_tick();
        emitter.end_tick();
        assert_eq!(emitter.series_count(), 0);
        assert!(!emitter.render().contains("kafka_request_count"));
    }

    #[test]
    fn test_render_appends_stats() {
        let stats = Arc::new(ScrapeStats::new());
        stats.record_tick();
        let emitter = PrometheusEmitter::new().with_stats(stats);
        assert!(emitter.render().contains("jmx_scraper_ticks_total 1"));
    }

    #[test]
    fn test_bind_address() {
        let mut config = ExporterConfig {
            exporter_type: "prometheus".to_string(),
            otlp_endpoint: None,
            prometheus_host: "localhost".to_string(),
            prometheus_port: 9464,
        };
        assert_eq!(bind_address(&config).unwrap().to_string(), "127.0.0.1:9464");

        config.prometheus_host = "my-host".to_string();
        let err = bind_address(&config).unwrap_err();
        assert!(err.to_string().contains(PROMETHEUS_HOST));
    }

    #[test]
    fn test_from_observation_timestamp() {
        let sample = PrometheusSample::from_observation(&MetricObservation {
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(2),
            ..observation("a.b", 1.0, &[("x.y", "v")])
        });
        assert_eq!(sample.timestamp, Some(2000));
        assert_eq!(sample.labels.get("x_y").map(String::as_str), Some("v"));
    }
}
