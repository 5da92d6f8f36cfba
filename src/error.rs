//! Error types for the JMX scraper
//!
//! Startup errors ([`ConfigError`](crate::config::ConfigError),
//! [`MappingLoadError`]) abort the process before scheduling begins.
//! Steady-state errors ([`ConnectionError`], [`ReadError`]) are contained
//! within a single tick. [`UnsupportedCapability`] is never raised; it is
//! logged once and the affected feature degrades.

use thiserror::Error;

/// Errors raised while establishing a session
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// HTTP client initialization failed
    #[error("Failed to initialize HTTP client for {endpoint}: {source}")]
    ClientInit {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint could not be reached
    #[error("Unable to connect to {endpoint}: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The connection attempt did not complete within the call timeout
    #[error("Unable to connect to {endpoint}: timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// The endpoint answered with an unexpected HTTP status
    #[error("Unable to connect to {endpoint}: HTTP status {status}")]
    HttpStatus { endpoint: String, status: u16 },

    /// The endpoint rejected the supplied credentials
    #[error("Authentication failed for {endpoint}")]
    AuthenticationFailed { endpoint: String },

    /// A challenge callback could not be answered
    #[error("Unsupported authentication callback '{callback}' for {endpoint}")]
    UnsupportedCallback { endpoint: String, callback: String },

    /// The endpoint did not answer like a Jolokia agent
    #[error("Unexpected agent response from {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },

    /// Encrypted registry mode was requested but is not available
    #[error("Encrypted registry transport is not supported by this build (endpoint {endpoint})")]
    UnsupportedTransport { endpoint: String },

    /// The configured CA certificate could not be loaded
    #[error("Failed to load CA certificate '{path}': {reason}")]
    Certificate { path: String, reason: String },
}

impl ConnectionError {
    /// Whether this error is fatal at connect time rather than retried next tick
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::UnsupportedTransport { .. } | ConnectionError::Certificate { .. }
        )
    }
}

/// Errors raised while reading attributes from a live session
#[derive(Error, Debug)]
pub enum ReadError {
    /// The request failed on the wire
    #[error("Read from {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The read did not complete within the call timeout
    #[error("Read from {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// The endpoint answered with a non-success HTTP status
    #[error("Read from {endpoint} returned HTTP status {status}")]
    HttpStatus { endpoint: String, status: u16 },

    /// The response body could not be decoded
    #[error("Read from {endpoint} returned an undecodable body: {reason}")]
    Parse { endpoint: String, reason: String },
}

impl ReadError {
    /// Endpoint the failed read was issued against
    pub fn endpoint(&self) -> &str {
        match self {
            ReadError::Transport { endpoint, .. }
            | ReadError::Timeout { endpoint, .. }
            | ReadError::HttpStatus { endpoint, .. }
            | ReadError::Parse { endpoint, .. } => endpoint,
        }
    }
}

/// Errors raised while loading mapping catalogs
#[derive(Error, Debug)]
pub enum MappingLoadError {
    /// No built-in catalog exists for the target system
    #[error("No mapping catalog for target system '{0}'")]
    UnknownTargetSystem(String),

    /// The custom catalog document could not be read
    #[error("Failed to read mapping document '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The catalog document is malformed
    #[error("Malformed mapping catalog '{origin}': {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// An object-name pattern is invalid
    #[error("Invalid object name pattern '{pattern}' in '{origin}': {reason}")]
    InvalidPattern {
        origin: String,
        pattern: String,
        reason: String,
    },

    /// A label extraction rule is not understood
    #[error("Invalid label rule '{rule}' for label '{label}' in '{origin}'")]
    InvalidLabelRule {
        origin: String,
        label: String,
        rule: String,
    },

    /// An attribute path is empty or malformed
    #[error("Invalid attribute '{attribute}' in '{origin}'")]
    InvalidAttribute { origin: String, attribute: String },

    /// Two mappings resolve to the same metric name
    #[error("Duplicate metric name '{metric}' defined in '{first}' and '{second}'")]
    DuplicateMetric {
        metric: String,
        first: String,
        second: String,
    },
}

/// A platform capability that is not available in this environment
///
/// Never propagated as a failure. Callers log it once and degrade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{capability} unsupported in current environment: {reason}")]
pub struct UnsupportedCapability {
    pub capability: &'static str,
    pub reason: String,
}

/// Scheduler lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// `start()` was called in a state other than idle
    #[error("Scheduler cannot start from state {0}")]
    InvalidState(String),
}

/// Application error type
#[derive(Error, Debug)]
pub enum ScraperError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Mapping load error
    #[error("Mapping load error: {0}")]
    MappingLoad(#[from] MappingLoadError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl ScraperError {
    /// Whether the error belongs to the startup phase (bad configuration or catalogs)
    pub fn is_startup(&self) -> bool {
        match self {
            ScraperError::Config(_) | ScraperError::MappingLoad(_) => true,
            ScraperError::Connection(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Result type alias for scraper errors
pub type ScraperResult<T> = Result<T, ScraperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_transport_is_fatal() {
        let err = ConnectionError::UnsupportedTransport {
            endpoint: "localhost:9999".to_string(),
        };
        assert!(err.is_fatal());
        assert!(ScraperError::from(err).is_startup());

        let err = ConnectionError::HttpStatus {
            endpoint: "localhost:9999".to_string(),
            status: 503,
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_read_error_endpoint() {
        let err = ReadError::HttpStatus {
            endpoint: "localhost:9999".to_string(),
            status: 500,
        };
        assert_eq!(err.endpoint(), "localhost:9999");
        assert!(err.to_string().contains("localhost:9999"));
    }

    #[test]
    fn test_capability_message() {
        let gap = UnsupportedCapability {
            capability: "SASL",
            reason: "feature disabled".to_string(),
        };
        assert_eq!(
            gap.to_string(),
            "SASL unsupported in current environment: feature disabled"
        );
    }
}
