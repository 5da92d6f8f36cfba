//! SASL-style challenge handling
//!
//! When a remote profile is configured, the connection environment carries a
//! [`SaslCallbackHandler`]. If the agent answers a version request with `401`, the
//! challenge is turned into a set of [`Callback`]s that the handler fills in
//! with the configured username, password and realm.

use std::fmt;

use crate::error::UnsupportedCapability;

/// Check whether SASL callback support is available in this build
///
/// # Errors
/// Returns [`UnsupportedCapability`] when the crate was built without the
/// `sasl` feature. Callers log it and connect without callback support.
pub fn capability() -> Result<(), UnsupportedCapability> {
    if cfg!(feature = "sasl") {
        Ok(())
    } else {
        Err(UnsupportedCapability {
            capability: "SASL",
            reason: "built without the `sasl` feature".to_string(),
        })
    }
}

/// A single request for information during a challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    /// Authentication identity
    Name(Option<String>),
    /// Secret for the identity
    Password(Option<String>),
    /// Realm, with the value offered by the server if any
    Realm {
        offered: Option<String>,
        text: Option<String>,
    },
    /// Anything the handler does not know how to answer
    Other(String),
}

/// Answers challenge callbacks from the configured credentials
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SaslCallbackHandler {
    username: Option<String>,
    password: Option<String>,
    realm: Option<String>,
}

impl fmt::Debug for SaslCallbackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslCallbackHandler")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("realm", &self.realm)
            .finish()
    }
}

impl SaslCallbackHandler {
    /// Create a handler for the given identity
    pub fn new(username: Option<String>, password: Option<String>, realm: Option<String>) -> Self {
        Self {
            username,
            password,
            realm,
        }
    }

    /// Fill in every callback
    ///
    /// The configured realm wins over the one offered by the server.
    ///
    /// # Errors
    /// Returns the name of the first callback that cannot be answered.
    pub fn handle(&self, callbacks: &mut [Callback]) -> Result<(), String> {
        for callback in callbacks.iter_mut() {
            match callback {
                Callback::Name(name) => *name = self.username.clone(),
                Callback::Password(password) => *password = self.password.clone(),
                Callback::Realm { offered, text } => {
                    *text = self.realm.clone().or_else(|| offered.clone());
                }
                Callback::Other(kind) => return Err(kind.clone()),
            }
        }
        Ok(())
    }
}

/// Parsed `WWW-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub realm: Option<String>,
}

impl Challenge {
    /// Parse a header value such as `Basic realm="jolokia"`
    pub fn parse(header: &str) -> Self {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));

        let realm = params.split(',').find_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("realm")
                .then(|| value.trim().trim_matches('"').to_string())
        });

        Self {
            scheme: scheme.to_string(),
            realm,
        }
    }

    /// Callbacks the handler must answer for this challenge
    pub fn callbacks(&self) -> Vec<Callback> {
        let mut callbacks = vec![Callback::Name(None), Callback::Password(None)];
        callbacks.push(Callback::Realm {
            offered: self.realm.clone(),
            text: None,
        });
        if !self.scheme.eq_ignore_ascii_case("basic") {
            callbacks.push(Callback::Other(format!("{} challenge", self.scheme)));
        }
        callbacks
    }
}
