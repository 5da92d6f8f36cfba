//! MBean ObjectName parsing and glob patterns
//!
//! Patterns follow the JMX conventions: `*` and `?` are allowed in the domain
//! and in property values, and a trailing `*` in the property list lets the
//! candidate carry extra key properties.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Serialize, Serializer};

/// A concrete ObjectName split into domain and key properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectName {
    pub domain: String,
    pub properties: BTreeMap<String, String>,
}

impl ObjectName {
    /// Parse `domain:key=value,...`
    ///
    /// Returns `None` when there is no domain separator or a property is not a
    /// `key=value` pair.
    pub fn parse(name: &str) -> Option<Self> {
        let (domain, props) = name.split_once(':')?;
        let mut properties = BTreeMap::new();
        for prop in split_properties(props) {
            let (key, value) = prop.split_once('=')?;
            properties.insert(key.trim().to_string(), value.to_string());
        }
        Some(Self {
            domain: domain.to_string(),
            properties,
        })
    }

    /// Value of a key property
    pub fn key_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Split a property list on commas that are outside quoted values
fn split_properties(props: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in props.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&props[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&props[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

/// Translate a JMX glob to an anchored regex
fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c => pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}

/// Compiled ObjectName pattern
#[derive(Clone)]
pub struct ObjectNamePattern {
    source: String,
    domain: Regex,
    properties: Vec<(String, Regex)>,
    property_wildcard: bool,
}

impl ObjectNamePattern {
    /// Compile a pattern such as `java.lang:type=GarbageCollector,name=*`
    ///
    /// # Errors
    /// Returns a human-readable reason when the pattern is malformed.
    pub fn compile(source: &str) -> Result<Self, String> {
        let (domain, props) = source
            .split_once(':')
            .ok_or_else(|| "missing ':' between domain and key properties".to_string())?;

        let domain = glob_to_regex(domain).map_err(|e| e.to_string())?;
        let mut properties = Vec::new();
        let mut property_wildcard = false;

        for prop in split_properties(props) {
            let prop = prop.trim();
            if prop == "*" {
                property_wildcard = true;
                continue;
            }
            let (key, value) = prop
                .split_once('=')
                .ok_or_else(|| format!("key property '{}' is not key=value", prop))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("empty key in '{}'", prop));
            }
            let value = glob_to_regex(value).map_err(|e| e.to_string())?;
            properties.push((key.to_string(), value));
        }

        if properties.is_empty() && !property_wildcard {
            return Err("no key properties".to_string());
        }

        Ok(Self {
            source: source.to_string(),
            domain,
            properties,
            property_wildcard,
        })
    }

    /// Pattern text as written in the catalog
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether this pattern matches a concrete object name
    pub fn matches(&self, name: &ObjectName) -> bool {
        if !self.domain.is_match(&name.domain) {
            return false;
        }
        if !self.property_wildcard && name.properties.len() != self.properties.len() {
            return false;
        }
        self.properties.iter().all(|(key, value)| {
            name.key_property(key)
                .map(|v| value.is_match(v))
                .unwrap_or(false)
        })
    }
}

impl PartialEq for ObjectNamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for ObjectNamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectNamePattern").field(&self.source).finish()
    }
}

impl fmt::Display for ObjectNamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for ObjectNamePattern {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.source)
    }
}
