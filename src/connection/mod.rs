//! Remote management connection
//!
//! Builds a [`ConnectionDescriptor`] from validated configuration and turns it
//! into a live [`Session`] against a Jolokia agent.
//!
//! # Example
//!
//! ```ignore
//! use jmx_scraper::connection::ConnectionBuilder;
//!
//! let builder = ConnectionBuilder::from_config(&config)?;
//! let session = builder.connect().await?;
//! let results = session.read(&requests).await?;
//! ```

mod client;
mod parser;
pub mod sasl;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::ClientBuilder;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ConfigError, ScraperConfig, SERVICE_URL};
use crate::error::{ConnectionError, ReadError};

pub use client::{ClientError, JolokiaClient, ReadRequest};
pub use parser::{
    is_pattern, parse_bulk_response, parse_version_response, AgentInfo, AttributeValue,
    JolokiaResponse, ReadResults, RequestInfo,
};
pub use sasl::{Callback, Challenge, SaslCallbackHandler};

/// Context path of the agent when the service URL does not name one
pub const DEFAULT_CONTEXT_PATH: &str = "/jolokia";

const DEFAULT_HOST: &str = "localhost";

/// Host, port and path of the remote endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
    pub context_path: String,
    /// The URL itself asked for an encrypted transport (`https://`)
    pub tls: bool,
}

impl ServiceAddress {
    /// Parse a service URL
    ///
    /// Accepted forms:
    /// - `host:port`
    /// - `service:jmx:rmi:///jndi/rmi://host:port/jmxrmi`
    /// - `http://host:port/path` or `https://host:port/path`
    pub fn parse(service_url: &str) -> Result<Self, ConfigError> {
        let service_url = service_url.trim();
        let invalid = |reason: &str| ConfigError::ValidationError {
            key: SERVICE_URL.to_string(),
            reason: format!("'{}' is not a valid service URL: {}", service_url, reason),
        };

        if let Some(rest) = service_url.strip_prefix("service:jmx:") {
            let (_, registry) = rest
                .split_once("rmi://")
                .and_then(|(_, tail)| tail.split_once("rmi://"))
                .ok_or_else(|| invalid("expected service:jmx:rmi:///jndi/rmi://host:port/..."))?;
            let authority = registry.split('/').next().unwrap_or_default();
            if !has_port(authority) {
                return Err(invalid("missing port"));
            }
            let authority = if authority.starts_with(':') {
                format!("{}{}", DEFAULT_HOST, authority)
            } else {
                authority.to_string()
            };
            return Self::from_url(&format!("http://{}", authority), false, &invalid);
        }

        if service_url.contains("://") {
            let tls = service_url.starts_with("https://");
            if !tls && !service_url.starts_with("http://") {
                return Err(invalid("unsupported scheme"));
            }
            return Self::from_url(service_url, tls, &invalid);
        }

        if !has_port(service_url) {
            return Err(invalid("missing port"));
        }
        Self::from_url(&format!("http://{}", service_url), false, &invalid)
    }

    fn from_url(
        raw: &str,
        tls: bool,
        invalid: &dyn Fn(&str) -> ConfigError,
    ) -> Result<Self, ConfigError> {
        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => DEFAULT_HOST.to_string(),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid("missing port"))?;

        let path = url.path().trim_end_matches('/');
        let context_path = if path.is_empty() {
            DEFAULT_CONTEXT_PATH.to_string()
        } else {
            path.to_string()
        };

        Ok(Self {
            host,
            port,
            context_path,
            tls,
        })
    }
}

fn has_port(authority: &str) -> bool {
    authority
        .rsplit_once(':')
        .map(|(_, port)| !port.is_empty())
        .unwrap_or(false)
}

/// Username and password, attached only when both are present
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Immutable description of the remote endpoint and how to authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    address: ServiceAddress,
    username: Option<String>,
    password: Option<String>,
    profile: Option<String>,
    realm: Option<String>,
    registry_ssl: bool,
}

impl ConnectionDescriptor {
    /// Build a descriptor from a parsed address and named connection fields
    pub fn new(address: ServiceAddress, fields: DescriptorFields) -> Self {
        let registry_ssl = fields.registry_ssl || address.tls;
        Self {
            address,
            username: fields.username,
            password: fields.password,
            profile: fields.profile,
            realm: fields.realm,
            registry_ssl,
        }
    }

    /// Build a descriptor from validated configuration
    pub fn from_config(config: &ScraperConfig) -> Result<Self, ConfigError> {
        let address = ServiceAddress::parse(&config.service_url)?;
        let conn = &config.connection;
        Ok(Self::new(
            address,
            DescriptorFields {
                username: conn.username.clone(),
                password: conn.password.clone(),
                profile: conn.remote_profile.clone(),
                realm: conn.realm.clone(),
                registry_ssl: conn.registry_ssl,
            },
        ))
    }

    pub fn host(&self) -> &str {
        &self.address.host
    }

    pub fn port(&self) -> u16 {
        self.address.port
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    pub fn registry_ssl(&self) -> bool {
        self.registry_ssl
    }

    /// `host:port`, used in diagnostics
    pub fn address(&self) -> String {
        format!("{}:{}", self.address.host, self.address.port)
    }

    /// Transport strategy for this descriptor
    pub fn transport(&self) -> RegistryTransport {
        if self.registry_ssl {
            RegistryTransport::Encrypted
        } else {
            RegistryTransport::Plain
        }
    }

    /// Full agent URL
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.transport().scheme(),
            self.address.host,
            self.address.port,
            self.address.context_path
        )
    }

    /// Credentials, when both username and password are configured
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// Named fields used to build a [`ConnectionDescriptor`]
#[derive(Debug, Clone, Default)]
pub struct DescriptorFields {
    pub username: Option<String>,
    pub password: Option<String>,
    pub profile: Option<String>,
    pub realm: Option<String>,
    pub registry_ssl: bool,
}

/// How the agent is reached
///
/// The plain and encrypted paths use different client setup, so each is its
/// own strategy. The encrypted one is only available with the `tls` feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryTransport {
    Plain,
    Encrypted,
}

impl RegistryTransport {
    pub fn scheme(&self) -> &'static str {
        match self {
            RegistryTransport::Plain => "http",
            RegistryTransport::Encrypted => "https",
        }
    }

    /// Apply the strategy to an HTTP client builder
    ///
    /// # Errors
    /// `UnsupportedTransport` when the encrypted path is requested in a build
    /// without TLS, `Certificate` when the CA file cannot be used.
    pub fn configure(
        &self,
        builder: ClientBuilder,
        ca_certificate: Option<&Path>,
        endpoint: &str,
    ) -> Result<ClientBuilder, ConnectionError> {
        match self {
            RegistryTransport::Plain => Ok(builder),
            RegistryTransport::Encrypted => configure_encrypted(builder, ca_certificate, endpoint),
        }
    }
}

#[cfg(feature = "tls")]
fn configure_encrypted(
    builder: ClientBuilder,
    ca_certificate: Option<&Path>,
    _endpoint: &str,
) -> Result<ClientBuilder, ConnectionError> {
    let mut builder = builder.https_only(true);
    if let Some(path) = ca_certificate {
        let cert_error = |reason: String| ConnectionError::Certificate {
            path: path.display().to_string(),
            reason,
        };
        let pem = std::fs::read(path).map_err(|e| cert_error(e.to_string()))?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| cert_error(e.to_string()))?;
        builder = builder.add_root_certificate(cert);
    }
    Ok(builder)
}

#[cfg(not(feature = "tls"))]
fn configure_encrypted(
    _builder: ClientBuilder,
    _ca_certificate: Option<&Path>,
    endpoint: &str,
) -> Result<ClientBuilder, ConnectionError> {
    Err(ConnectionError::UnsupportedTransport {
        endpoint: endpoint.to_string(),
    })
}

/// Everything attached to a connection attempt besides the address
#[derive(Debug, Clone, Default)]
pub struct ConnectionEnvironment {
    pub credentials: Option<Credentials>,
    pub profile: Option<String>,
    pub sasl_handler: Option<SaslCallbackHandler>,
}

/// Turns a [`ConnectionDescriptor`] into connected sessions
#[derive(Debug)]
pub struct ConnectionBuilder {
    descriptor: ConnectionDescriptor,
    call_timeout: Duration,
    ca_certificate: Option<PathBuf>,
    sasl_gap_logged: AtomicBool,
}

impl ConnectionBuilder {
    pub fn new(descriptor: ConnectionDescriptor, call_timeout: Duration) -> Self {
        Self {
            descriptor,
            call_timeout,
            ca_certificate: None,
            sasl_gap_logged: AtomicBool::new(false),
        }
    }

    /// Build from validated configuration
    pub fn from_config(config: &ScraperConfig) -> Result<Self, ConfigError> {
        let builder = Self::new(ConnectionDescriptor::from_config(config)?, config.call_timeout());
        Ok(match &config.connection.tls_ca_certificate {
            Some(path) => builder.with_ca_certificate(path.clone()),
            None => builder,
        })
    }

    /// Trust an additional PEM CA certificate on the encrypted transport
    pub fn with_ca_certificate(mut self, path: PathBuf) -> Self {
        self.ca_certificate = Some(path);
        self
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Assemble credentials, profile and SASL callback support
    ///
    /// A missing SASL capability is logged once and otherwise ignored.
    pub fn environment(&self) -> ConnectionEnvironment {
        let mut env = ConnectionEnvironment {
            credentials: self.descriptor.credentials(),
            profile: self.descriptor.profile.clone(),
            sasl_handler: None,
        };

        if env.profile.is_some() {
            match sasl::capability() {
                Ok(()) => {
                    env.sasl_handler = Some(SaslCallbackHandler::new(
                        self.descriptor.username.clone(),
                        self.descriptor.password.clone(),
                        self.descriptor.realm.clone(),
                    ));
                }
                Err(gap) => {
                    if !self.sasl_gap_logged.swap(true, Ordering::Relaxed) {
                        warn!(error = %gap, "Connecting without SASL callback support");
                    }
                }
            }
        }

        env
    }

    /// Build the HTTP client without touching the network
    ///
    /// Surfaces transport and certificate problems at startup.
    pub fn preflight(&self) -> Result<JolokiaClient, ConnectionError> {
        let endpoint = self.descriptor.address();
        let builder = self.descriptor.transport().configure(
            JolokiaClient::builder(self.call_timeout),
            self.ca_certificate.as_deref(),
            &endpoint,
        )?;
        let client = builder
            .build()
            .map_err(|source| ConnectionError::ClientInit {
                endpoint: endpoint.clone(),
                source,
            })?;
        Ok(JolokiaClient::from_client(
            client,
            &self.descriptor.endpoint_url(),
            self.call_timeout,
        ))
    }

    /// Connect and check that a Jolokia agent answers
    ///
    /// # Errors
    /// Any failure is wrapped with the resolved `host:port` for diagnostics.
    pub async fn connect(&self) -> Result<Session, ConnectionError> {
        let endpoint = self.descriptor.address();
        let env = self.environment();
        let mut client = self.preflight()?;
        if let Some(credentials) = &env.credentials {
            client = client.with_auth(&credentials.username, &credentials.password);
        }

        debug!(
            endpoint = %endpoint,
            url = %client.base_url(),
            profile = ?env.profile,
            "Connecting to remote management endpoint"
        );

        let agent = match client.version().await {
            Ok(agent) => agent,
            Err(ClientError::Unauthorized { challenge }) => {
                let Some(handler) = &env.sasl_handler else {
                    return Err(ConnectionError::AuthenticationFailed { endpoint });
                };
                let (username, password) =
                    answer_challenge(handler, challenge.as_deref(), &endpoint)?;
                client = client.with_auth(&username, &password);
                client
                    .version()
                    .await
                    .map_err(|e| self.connect_error(e, &endpoint))?
            }
            Err(e) => return Err(self.connect_error(e, &endpoint)),
        };

        info!(
            endpoint = %endpoint,
            agent = %agent.agent,
            "Connected to remote management endpoint"
        );

        Ok(Session {
            client,
            endpoint,
            agent,
        })
    }

    fn connect_error(&self, err: ClientError, endpoint: &str) -> ConnectionError {
        let endpoint = endpoint.to_string();
        match err {
            ClientError::Request(source) => ConnectionError::Unreachable { endpoint, source },
            ClientError::Timeout => ConnectionError::Timeout {
                endpoint,
                timeout_ms: self.call_timeout.as_millis() as u64,
            },
            ClientError::Status(status) => ConnectionError::HttpStatus { endpoint, status },
            ClientError::Unauthorized { .. } => ConnectionError::AuthenticationFailed { endpoint },
            ClientError::Body(reason) => ConnectionError::Protocol { endpoint, reason },
        }
    }
}

/// Run the SASL callbacks for a `401` challenge and pull out Basic credentials
///
/// The realm callback is still answered so the handler sees the full
/// exchange, but HTTP Basic has no field to carry a realm back to the agent:
/// the resolved value is only logged and never changes the credentials.
fn answer_challenge(
    handler: &SaslCallbackHandler,
    challenge: Option<&str>,
    endpoint: &str,
) -> Result<(String, String), ConnectionError> {
    let challenge = Challenge::parse(challenge.unwrap_or("Basic"));
    let mut callbacks = challenge.callbacks();
    handler
        .handle(&mut callbacks)
        .map_err(|callback| ConnectionError::UnsupportedCallback {
            endpoint: endpoint.to_string(),
            callback,
        })?;

    let mut username = None;
    let mut password = None;
    for callback in callbacks {
        match callback {
            Callback::Name(name) => username = name,
            Callback::Password(secret) => password = secret,
            Callback::Realm { text, .. } => {
                debug!(endpoint = %endpoint, realm = ?text, "Realm not sent with Basic credentials")
            }
            Callback::Other(_) => {}
        }
    }

    match (username, password) {
        (Some(username), Some(password)) => Ok((username, password)),
        _ => Err(ConnectionError::AuthenticationFailed {
            endpoint: endpoint.to_string(),
        }),
    }
}

/// An open handle to a remote attribute-access endpoint
pub struct Session {
    client: JolokiaClient,
    endpoint: String,
    agent: AgentInfo,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("agent", &self.agent)
            .finish()
    }
}

impl Session {
    /// `host:port` of the remote endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Agent information captured at connect time
    pub fn agent(&self) -> &AgentInfo {
        &self.agent
    }

    /// Read the requested attributes in one round trip
    ///
    /// # Errors
    /// Transport failures, timeouts, HTTP errors and undecodable bodies. Objects
    /// or attributes missing on the target are not errors; they are simply
    /// absent from the results.
    pub async fn read(&self, requests: &[ReadRequest]) -> Result<ReadResults, ReadError> {
        let endpoint = self.endpoint.clone();
        let responses = self.client.read_bulk(requests).await.map_err(|e| match e {
            ClientError::Request(source) => ReadError::Transport { endpoint, source },
            ClientError::Timeout => ReadError::Timeout {
                endpoint,
                timeout_ms: self.client.timeout().as_millis() as u64,
            },
            ClientError::Status(status) => ReadError::HttpStatus { endpoint, status },
            ClientError::Unauthorized { .. } => ReadError::HttpStatus {
                endpoint,
                status: 401,
            },
            ClientError::Body(reason) => ReadError::Parse { endpoint, reason },
        })?;

        Ok(ReadResults::from_responses(responses))
    }

    /// Close the session, dropping its pooled connections
    pub fn close(self) {
        debug!(endpoint = %self.endpoint, "Closing session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(url: &str) -> ConnectionDescriptor {
        ConnectionDescriptor::new(ServiceAddress::parse(url).unwrap(), DescriptorFields::default())
    }

    #[test]
    fn test_parse_host_port() {
        let address = ServiceAddress::parse("localhost:9999").unwrap();
        assert_eq!(address.host, "localhost");
        assert_eq!(address.port, 9999);
        assert_eq!(address.context_path, "/jolokia");
        assert!(!address.tls);
    }

    #[test]
    fn test_parse_jmx_service_url() {
        let address =
            ServiceAddress::parse("service:jmx:rmi:///jndi/rmi://app-host:1099/jmxrmi").unwrap();
        assert_eq!(address.host, "app-host");
        assert_eq!(address.port, 1099);

        let address = ServiceAddress::parse("service:jmx:rmi:///jndi/rmi://:1099/jmxrmi").unwrap();
        assert_eq!(address.host, "localhost");
    }

    #[test]
    fn test_parse_http_url() {
        let address = ServiceAddress::parse("https://app-host:8443/agent/").unwrap();
        assert_eq!(address.port, 8443);
        assert_eq!(address.context_path, "/agent");
        assert!(address.tls);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ServiceAddress::parse("localhost").is_err());
        assert!(ServiceAddress::parse("ftp://host:21").is_err());
        assert!(ServiceAddress::parse("service:jmx:jmxmp://host:1").is_err());
        let err = ServiceAddress::parse("host:notaport").unwrap_err();
        assert!(err.to_string().contains(SERVICE_URL));
    }

    #[test]
    fn test_endpoint_url_follows_transport() {
        assert_eq!(
            descriptor("localhost:9999").endpoint_url(),
            "http://localhost:9999/jolokia"
        );

        let encrypted = ConnectionDescriptor::new(
            ServiceAddress::parse("localhost:9999").unwrap(),
            DescriptorFields {
                registry_ssl: true,
                ..Default::default()
            },
        );
        assert_eq!(encrypted.transport(), RegistryTransport::Encrypted);
        assert_eq!(encrypted.endpoint_url(), "https://localhost:9999/jolokia");
    }

    #[test]
    fn test_credentials_need_both_parts() {
        let only_user = ConnectionDescriptor::new(
            ServiceAddress::parse("localhost:9999").unwrap(),
            DescriptorFields {
                username: Some("admin".to_string()),
                ..Default::default()
            },
        );
        assert!(only_user.credentials().is_none());

        let both = ConnectionDescriptor::new(
            ServiceAddress::parse("localhost:9999").unwrap(),
            DescriptorFields {
                username: Some("admin".to_string()),
                password: Some("secret".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(both.credentials().unwrap().username, "admin");
        assert!(!format!("{:?}", both.credentials()).contains("secret"));
    }

    #[test]
    fn test_environment_attaches_sasl_handler_for_profile() {
        let builder = ConnectionBuilder::new(
            ConnectionDescriptor::new(
                ServiceAddress::parse("localhost:9999").unwrap(),
                DescriptorFields {
                    username: Some("admin".to_string()),
                    password: Some("secret".to_string()),
                    profile: Some("SASL/PLAIN".to_string()),
                    realm: Some("corp".to_string()),
                    ..Default::default()
                },
            ),
            Duration::from_secs(1),
        );
        let env = builder.environment();
        assert_eq!(env.profile.as_deref(), Some("SASL/PLAIN"));
        assert_eq!(env.sasl_handler.is_some(), cfg!(feature = "sasl"));

        let plain = ConnectionBuilder::new(descriptor("localhost:9999"), Duration::from_secs(1));
        assert!(plain.environment().sasl_handler.is_none());
    }

    #[test]
    fn test_encrypted_transport_availability() {
        let builder = ConnectionBuilder::new(
            ConnectionDescriptor::new(
                ServiceAddress::parse("localhost:9999").unwrap(),
                DescriptorFields {
                    registry_ssl: true,
                    ..Default::default()
                },
            ),
            Duration::from_secs(1),
        );
        let result = builder.preflight();
        if cfg!(feature = "tls") {
            assert!(result.is_ok());
        } else {
            assert!(matches!(
                result,
                Err(ConnectionError::UnsupportedTransport { .. })
            ));
        }
    }

    #[test]
    fn test_answer_challenge() {
        let handler = SaslCallbackHandler::new(Some("u".to_string()), Some("p".to_string()), None);
        let (user, pass) =
            answer_challenge(&handler, Some(r#"Basic realm="jolokia""#), "h:1").unwrap();
        assert_eq!((user.as_str(), pass.as_str()), ("u", "p"));

        let err = answer_challenge(&handler, Some("Negotiate"), "h:1").unwrap_err();
        assert!(matches!(err, ConnectionError::UnsupportedCallback { .. }));

        // a configured realm that differs from the offered one does not alter Basic credentials
        let with_realm = SaslCallbackHandler::new(
            Some("u".to_string()),
            Some("p".to_string()),
            Some("corp".to_string()),
        );
        let answer =
            answer_challenge(&with_realm, Some(r#"Basic realm="jolokia""#), "h:1").unwrap();
        assert_eq!(answer, ("u".to_string(), "p".to_string()));

        let anonymous = SaslCallbackHandler::default();
        assert!(matches!(
            answer_challenge(&anonymous, None, "h:1"),
            Err(ConnectionError::AuthenticationFailed { .. })
        ));
    }
}
