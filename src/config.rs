//! Configuration management for the JMX scraper
//!
//! Startup configuration is a flat property set in Java `.properties` syntax.
//! [`Properties`] holds the raw key/value pairs, [`RawConfig`] extracts the
//! recognized keys, and [`RawConfig::validate`] turns them into an immutable
//! [`ScraperConfig`] or fails with a [`ConfigError`] naming the offending key.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

const PREFIX: &str = "otel.";

/// Service URL of the remote management endpoint
pub const SERVICE_URL: &str = "otel.jmx.service.url";
/// Path to a custom mapping catalog document
pub const CUSTOM_SCRAPING_CONFIG: &str = "otel.jmx.custom.jmx.scraping.config";
/// Comma-separated list of target systems
pub const TARGET_SYSTEM: &str = "otel.jmx.target.system";
/// Poll interval in milliseconds
pub const INTERVAL_MILLISECONDS: &str = "otel.jmx.interval.milliseconds";
/// Exporter type (logging, prometheus, otlp)
pub const METRICS_EXPORTER_TYPE: &str = "otel.metrics.exporter";
/// OTLP exporter endpoint
pub const OTLP_ENDPOINT: &str = "otel.exporter.otlp.endpoint";
/// Prometheus exporter bind host
pub const PROMETHEUS_HOST: &str = "otel.exporter.prometheus.host";
/// Prometheus exporter bind port
pub const PROMETHEUS_PORT: &str = "otel.exporter.prometheus.port";
/// Whether the registry lookup uses an encrypted transport
pub const REGISTRY_SSL: &str = "otel.jmx.remote.registry.ssl";
/// Remote username
pub const JMX_USERNAME: &str = "otel.jmx.username";
/// Remote password
pub const JMX_PASSWORD: &str = "otel.jmx.password";
/// SASL profile name
pub const JMX_REMOTE_PROFILE: &str = "otel.jmx.remote.profile";
/// SASL realm
pub const JMX_REALM: &str = "otel.jmx.realm";
/// Call-level timeout for remote reads, in milliseconds
pub const CALL_TIMEOUT_MILLISECONDS: &str = "otel.jmx.remote.timeout.milliseconds";
/// PEM CA certificate trusted by the encrypted transport
pub const TLS_CA_CERTIFICATE: &str = "otel.jmx.remote.tls.ca.certificate";

/// Interval used when none (or 0) is configured
pub const DEFAULT_INTERVAL_MS: u64 = 10_000;
/// Call timeout used when none (or 0) is configured
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;

const DEFAULT_EXPORTER: &str = "logging";
const DEFAULT_PROMETHEUS_HOST: &str = "0.0.0.0";
const DEFAULT_PROMETHEUS_PORT: u16 = 9464;

/// Target systems with a built-in mapping catalog
pub const AVAILABLE_TARGET_SYSTEMS: &[&str] = &[
    "activemq",
    "cassandra",
    "hbase",
    "hadoop",
    "jetty",
    "jvm",
    "kafka",
    "kafka-consumer",
    "kafka-producer",
    "solr",
    "tomcat",
    "wildfly",
];

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error reading the properties document
    #[error("Failed to read config properties from {origin}: {source}")]
    ReadError {
        origin: String,
        #[source]
        source: std::io::Error,
    },

    /// A required key (or one of a set of keys) is missing or blank
    #[error("{key} must be specified.")]
    Missing { key: String },

    /// A value could not be parsed into the expected type
    #[error("Failed to parse {key}: '{value}' is not a valid {expected}")]
    ParseError {
        key: String,
        value: String,
        expected: &'static str,
    },

    /// Target systems outside of the allow-list
    #[error(
        "otel.jmx.target.system must specify targets from [{}], unknown: [{}]",
        .allowed.join(", "),
        .unknown.join(", ")
    )]
    UnknownTargetSystems {
        unknown: Vec<String>,
        allowed: Vec<String>,
    },

    /// Configuration validation error
    #[error("Invalid configuration: {key} {reason}")]
    ValidationError { key: String, reason: String },

    /// The configured exporter cannot be built by this binary
    #[error("Unsupported exporter '{0}' in otel.metrics.exporter")]
    UnsupportedExporter(String),
}

/// Flat key/value property set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    /// Create an empty property set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document in Java `.properties` syntax
    ///
    /// Supports `key=value`, `key: value` and `key value` separators,
    /// `#`/`!` comment lines, trailing-backslash line continuations and the
    /// usual escapes (`\t`, `\n`, `\uXXXX`, ...).
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        let mut logical = String::new();

        for raw in text.lines() {
            let line = raw.trim_start();
            if logical.is_empty()
                && (line.is_empty() || line.starts_with('#') || line.starts_with('!'))
            {
                continue;
            }

            let trailing = line.chars().rev().take_while(|c| *c == '\\').count();
            if trailing % 2 == 1 {
                logical.push_str(&line[..line.len() - 1]);
                continue;
            }

            logical.push_str(line);
            let (key, value) = split_entry(&logical);
            entries.insert(key, value);
            logical.clear();
        }

        if !logical.is_empty() {
            let (key, value) = split_entry(&logical);
            entries.insert(key, value);
        }

        Self { entries }
    }

    /// Load properties from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            origin: format!("'{}'", path.display()),
            source,
        })?;
        Ok(Self::parse(&contents))
    }

    /// Load properties from any reader (used for stdin)
    pub fn from_reader<R: Read>(mut reader: R, origin: &str) -> Result<Self, ConfigError> {
        let mut contents = String::new();
        reader
            .read_to_string(&mut contents)
            .map_err(|source| ConfigError::ReadError {
                origin: origin.to_string(),
                source,
            })?;
        Ok(Self::parse(&contents))
    }

    /// Set a property, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Get a property value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Overlay `other` on top of this set; values from `other` win
    pub fn merge(&mut self, other: Properties) {
        self.entries.extend(other.entries);
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys under the `otel.` prefix that this crate does not recognize
    pub fn unrecognized_keys(&self) -> Vec<&str> {
        const KNOWN: &[&str] = &[
            SERVICE_URL,
            CUSTOM_SCRAPING_CONFIG,
            TARGET_SYSTEM,
            INTERVAL_MILLISECONDS,
            METRICS_EXPORTER_TYPE,
            OTLP_ENDPOINT,
            PROMETHEUS_HOST,
            PROMETHEUS_PORT,
            REGISTRY_SSL,
            JMX_USERNAME,
            JMX_PASSWORD,
            JMX_REMOTE_PROFILE,
            JMX_REALM,
            CALL_TIMEOUT_MILLISECONDS,
            TLS_CA_CERTIFICATE,
        ];
        self.entries
            .keys()
            .map(String::as_str)
            .filter(|k| k.starts_with(PREFIX) && !KNOWN.contains(k))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Split a logical line into key and value at the first unescaped separator
fn split_entry(line: &str) -> (String, String) {
    const SEPARATORS: [char; 3] = [' ', '\t', '\x0c'];

    let mut key_end = line.len();
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' | ' ' | '\t' | '\x0c' => {
                key_end = i;
                break;
            }
            _ => {}
        }
    }

    let mut rest = line[key_end..].trim_start_matches(SEPARATORS);
    if let Some(stripped) = rest.strip_prefix(['=', ':']) {
        rest = stripped.trim_start_matches(SEPARATORS);
    }

    (unescape(&line[..key_end]), unescape(rest))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

/// Recognized keys extracted from a [`Properties`] set, not yet validated
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    pub service_url: Option<String>,
    pub custom_scraping_config: Option<String>,
    /// Lowercased and trimmed target system list, still comma-separated
    pub target_system: String,
    pub interval_ms: i64,
    pub metrics_exporter: String,
    pub otlp_endpoint: Option<String>,
    pub prometheus_host: String,
    pub prometheus_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub remote_profile: Option<String>,
    pub realm: Option<String>,
    pub registry_ssl: bool,
    pub call_timeout_ms: i64,
    pub tls_ca_certificate: Option<String>,
}

impl RawConfig {
    /// Extract the recognized keys, parsing numeric and boolean values
    ///
    /// # Errors
    /// Returns `ConfigError::ParseError` when a numeric or boolean value is malformed.
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let owned = |key: &str| props.get(key).map(str::to_string);

        Ok(Self {
            service_url: owned(SERVICE_URL),
            custom_scraping_config: owned(CUSTOM_SCRAPING_CONFIG),
            target_system: props
                .get(TARGET_SYSTEM)
                .unwrap_or_default()
                .to_lowercase()
                .trim()
                .to_string(),
            interval_ms: parse_int(props, INTERVAL_MILLISECONDS, DEFAULT_INTERVAL_MS as i64)?,
            metrics_exporter: props
                .get(METRICS_EXPORTER_TYPE)
                .unwrap_or(DEFAULT_EXPORTER)
                .trim()
                .to_lowercase(),
            otlp_endpoint: owned(OTLP_ENDPOINT),
            prometheus_host: props
                .get(PROMETHEUS_HOST)
                .unwrap_or(DEFAULT_PROMETHEUS_HOST)
                .trim()
                .to_string(),
            prometheus_port: parse_port(props, PROMETHEUS_PORT, DEFAULT_PROMETHEUS_PORT)?,
            username: owned(JMX_USERNAME),
            password: owned(JMX_PASSWORD),
            remote_profile: owned(JMX_REMOTE_PROFILE),
            realm: owned(JMX_REALM),
            registry_ssl: parse_bool(props, REGISTRY_SSL)?,
            call_timeout_ms: parse_int(
                props,
                CALL_TIMEOUT_MILLISECONDS,
                DEFAULT_CALL_TIMEOUT_MS as i64,
            )?,
            tls_ca_certificate: owned(TLS_CA_CERTIFICATE),
        })
    }

    /// Validate and normalize into a [`ScraperConfig`]
    ///
    /// Rules are applied in order and the first failure wins:
    /// 1. service URL present and non-blank
    /// 2. custom mapping document or target system list present
    /// 3. every target system in [`AVAILABLE_TARGET_SYSTEMS`]
    /// 4. OTLP endpoint present when the exporter is `otlp`
    /// 5. poll interval `>= 0` (0 means [`DEFAULT_INTERVAL_MS`])
    /// 6. call timeout `>= 0` (0 means [`DEFAULT_CALL_TIMEOUT_MS`])
    pub fn validate(self) -> Result<ScraperConfig, ConfigError> {
        if is_blank(self.service_url.as_deref()) {
            return Err(ConfigError::Missing {
                key: SERVICE_URL.to_string(),
            });
        }

        if is_blank(self.custom_scraping_config.as_deref()) && self.target_system.is_empty() {
            return Err(ConfigError::Missing {
                key: format!("{} or {}", CUSTOM_SCRAPING_CONFIG, TARGET_SYSTEM),
            });
        }

        let target_systems = split_target_systems(&self.target_system);
        let unknown: Vec<String> = target_systems
            .iter()
            .filter(|t| !AVAILABLE_TARGET_SYSTEMS.contains(&t.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ConfigError::UnknownTargetSystems {
                unknown,
                allowed: AVAILABLE_TARGET_SYSTEMS
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            });
        }

        if self.metrics_exporter.eq_ignore_ascii_case("otlp")
            && is_blank(self.otlp_endpoint.as_deref())
        {
            return Err(ConfigError::ValidationError {
                key: OTLP_ENDPOINT.to_string(),
                reason: "must be specified for otlp format.".to_string(),
            });
        }

        let interval_ms = normalize_millis(
            self.interval_ms,
            INTERVAL_MILLISECONDS,
            DEFAULT_INTERVAL_MS,
        )?;
        let call_timeout_ms = normalize_millis(
            self.call_timeout_ms,
            CALL_TIMEOUT_MILLISECONDS,
            DEFAULT_CALL_TIMEOUT_MS,
        )?;

        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        Ok(ScraperConfig {
            service_url: self.service_url.unwrap_or_default().trim().to_string(),
            target_systems,
            custom_scraping_config: non_blank(self.custom_scraping_config)
                .map(|p| PathBuf::from(p.trim())),
            interval_ms,
            exporter: ExporterConfig {
                exporter_type: self.metrics_exporter,
                otlp_endpoint: non_blank(self.otlp_endpoint),
                prometheus_host: self.prometheus_host,
                prometheus_port: self.prometheus_port,
            },
            connection: ConnectionSettings {
                username: non_blank(self.username),
                password: self.password,
                remote_profile: non_blank(self.remote_profile),
                realm: non_blank(self.realm),
                registry_ssl: self.registry_ssl,
                call_timeout_ms,
                tls_ca_certificate: non_blank(self.tls_ca_certificate).map(PathBuf::from),
            },
        })
    }
}

fn split_target_systems(raw: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for target in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !targets.iter().any(|t| t == target) {
            targets.push(target.to_string());
        }
    }
    targets
}

fn normalize_millis(value: i64, key: &str, default: u64) -> Result<u64, ConfigError> {
    match value {
        v if v < 0 => Err(ConfigError::ValidationError {
            key: key.to_string(),
            reason: "must be positive.".to_string(),
        }),
        0 => Ok(default),
        v => Ok(v as u64),
    }
}

fn parse_int(props: &Properties, key: &str, default: i64) -> Result<i64, ConfigError> {
    match props.get(key).map(str::trim) {
        None | Some("") => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::ParseError {
            key: key.to_string(),
            value: v.to_string(),
            expected: "integer",
        }),
    }
}

fn parse_port(props: &Properties, key: &str, default: u16) -> Result<u16, ConfigError> {
    match props.get(key).map(str::trim) {
        None | Some("") => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::ParseError {
            key: key.to_string(),
            value: v.to_string(),
            expected: "port number",
        }),
    }
}

fn parse_bool(props: &Properties, key: &str) -> Result<bool, ConfigError> {
    match props.get(key).map(|v| v.trim().to_lowercase()).as_deref() {
        None | Some("") => Ok(false),
        Some("true") | Some("yes") | Some("1") => Ok(true),
        Some("false") | Some("no") | Some("0") => Ok(false),
        Some(other) => Err(ConfigError::ParseError {
            key: key.to_string(),
            value: other.to_string(),
            expected: "boolean",
        }),
    }
}

/// Validated, immutable scraper configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScraperConfig {
    /// Service URL of the remote management endpoint
    pub service_url: String,
    /// Target systems in the order given, deduplicated
    pub target_systems: Vec<String>,
    /// Optional custom mapping catalog, merged after the target systems
    pub custom_scraping_config: Option<PathBuf>,
    /// Poll interval in milliseconds, never 0
    pub interval_ms: u64,
    /// Exporter settings
    pub exporter: ExporterConfig,
    /// Connection settings
    pub connection: ConnectionSettings,
}

/// Exporter settings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExporterConfig {
    /// Lowercased exporter type
    pub exporter_type: String,
    pub otlp_endpoint: Option<String>,
    pub prometheus_host: String,
    pub prometheus_port: u16,
}

/// Settings for the remote connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSettings {
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub remote_profile: Option<String>,
    pub realm: Option<String>,
    pub registry_ssl: bool,
    /// Call-level timeout in milliseconds, never 0
    pub call_timeout_ms: u64,
    pub tls_ca_certificate: Option<PathBuf>,
}

impl ScraperConfig {
    /// Extract and validate a configuration from a property set
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        RawConfig::from_properties(props)?.validate()
    }

    /// Poll interval
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Call-level timeout for remote operations
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.call_timeout_ms)
    }
}
