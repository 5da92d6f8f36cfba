//! Jolokia JSON 응답 파서
//!
//! Parses Jolokia bulk responses and normalizes them into [`ReadResults`],
//! a map of concrete object names to their attribute values.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Single entry of a Jolokia (bulk) response
#[derive(Debug, Clone, Deserialize)]
pub struct JolokiaResponse {
    /// Echo of the request
    #[serde(default)]
    pub request: RequestInfo,
    /// Response value, absent on errors
    #[serde(default)]
    pub value: Option<Value>,
    /// Per-request status (200 on success)
    pub status: u16,
    /// Timestamp (Unix epoch seconds)
    #[serde(default)]
    pub timestamp: u64,
    /// Error message (on failure)
    #[serde(default)]
    pub error: Option<String>,
    /// Error type (on failure)
    #[serde(default)]
    pub error_type: Option<String>,
}

/// Request echo contained in a response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestInfo {
    /// MBean ObjectName or pattern
    #[serde(default)]
    pub mbean: Option<String>,
    /// Requested attribute(s), single string or array
    #[serde(default)]
    pub attribute: Option<Value>,
    /// Request type
    #[serde(rename = "type", default)]
    pub request_type: Option<String>,
}

/// Agent information returned by a `version` request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AgentInfo {
    /// Agent version
    pub agent: String,
    /// Protocol version
    pub protocol: Option<String>,
}

/// Prefix of the value the agent substitutes for a failed attribute read
const FAULT_PREFIX: &str = "ERROR: ";

/// Individual attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    /// Composite data, keyed by item name
    Object(BTreeMap<String, AttributeValue>),
    /// Arrays and tabular data
    Array(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Numeric view of the value
    ///
    /// Strings are parsed when they hold a number. Booleans map to 1/0.
    ///
    /// # Precision Warning
    /// Integers above 2^53 lose precision when converted to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(i) => Some(*i as f64),
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::String(s) => s.trim().parse().ok(),
            AttributeValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// String view of a scalar value, used for label values
    pub fn as_label(&self) -> Option<String> {
        match self {
            AttributeValue::String(_) if self.is_fault() => None,
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Integer(i) => Some(i.to_string()),
            AttributeValue::Float(f) => Some(f.to_string()),
            AttributeValue::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Whether this is the placeholder the agent returns for an unreadable
    /// attribute when `ignoreErrors` is set
    pub fn is_fault(&self) -> bool {
        matches!(self, AttributeValue::String(s) if s.starts_with(FAULT_PREFIX))
    }

    /// Navigate into a composite item or array element
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        match self {
            AttributeValue::Object(map) => map.get(key),
            AttributeValue::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }
}

impl From<Value> for AttributeValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Integer(i),
                None => AttributeValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => AttributeValue::String(s),
            Value::Array(arr) => {
                AttributeValue::Array(arr.into_iter().map(AttributeValue::from).collect())
            }
            Value::Object(map) => AttributeValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, AttributeValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Bulk 응답 파싱
pub fn parse_bulk_response(json: &str) -> Result<Vec<JolokiaResponse>, serde_json::Error> {
    serde_json::from_str(json)
}

/// Parse the response of a `version` request
pub fn parse_version_response(json: &str) -> Result<AgentInfo, String> {
    let response: JolokiaResponse = serde_json::from_str(json).map_err(|e| e.to_string())?;
    if response.status != 200 {
        return Err(format!(
            "status {}: {}",
            response.status,
            response.error.unwrap_or_default()
        ));
    }

    let value = response.value.ok_or("missing value")?;
    let agent = value
        .get("agent")
        .and_then(Value::as_str)
        .ok_or("missing agent version")?
        .to_string();
    let protocol = value
        .get("protocol")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(AgentInfo { agent, protocol })
}

/// Whether an object name contains wildcards
pub fn is_pattern(object_name: &str) -> bool {
    object_name.contains('*') || object_name.contains('?')
}

/// Attribute values of every management object seen in one poll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResults {
    beans: BTreeMap<String, BTreeMap<String, AttributeValue>>,
}

impl ReadResults {
    /// Create an empty result set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attribute value
    pub fn insert(
        &mut self,
        object_name: impl Into<String>,
        attribute: impl Into<String>,
        value: AttributeValue,
    ) {
        self.beans
            .entry(object_name.into())
            .or_default()
            .insert(attribute.into(), value);
    }

    /// Record a value from a response, dropping fault placeholders
    fn insert_read(&mut self, object_name: impl Into<String>, attribute: String, value: Value) {
        let value = AttributeValue::from(value);
        if value.is_fault() {
            debug!(attribute = %attribute, fault = ?value, "Skipping unreadable attribute");
            return;
        }
        self.insert(object_name, attribute, value);
    }

    /// Iterate over object names and their attributes
    pub fn beans(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, AttributeValue>)> {
        self.beans.iter().map(|(name, attrs)| (name.as_str(), attrs))
    }

    /// Look up one attribute
    pub fn attribute(&self, object_name: &str, attribute: &str) -> Option<&AttributeValue> {
        self.beans.get(object_name)?.get(attribute)
    }

    /// Number of distinct management objects
    pub fn len(&self) -> usize {
        self.beans.len()
    }

    /// Whether nothing was read
    pub fn is_empty(&self) -> bool {
        self.beans.is_empty()
    }

    /// Normalize Jolokia responses
    ///
    /// Entries with a non-200 status are skipped: the object or attribute is
    /// simply absent on this target. So are single attributes the agent could
    /// not read, which arrive as `"ERROR: ..."` strings next to their readable
    /// siblings. Pattern reads contribute one entry per matched object name.
    pub fn from_responses(responses: Vec<JolokiaResponse>) -> Self {
        let mut results = Self::new();

        for response in responses {
            let Some(mbean) = response.request.mbean else {
                continue;
            };

            if response.status != 200 {
                debug!(
                    mbean = %mbean,
                    status = response.status,
                    error = ?response.error,
                    "Skipping unavailable MBean"
                );
                continue;
            }

            let Some(value) = response.value else {
                continue;
            };
            let attributes = requested_attributes(response.request.attribute.as_ref());

            if is_pattern(&mbean) {
                if let Value::Object(matches) = value {
                    for (object_name, attrs) in matches {
                        if let Value::Object(attrs) = attrs {
                            for (attribute, v) in attrs {
                                results.insert_read(object_name.clone(), attribute, v);
                            }
                        }
                    }
                }
                continue;
            }

            match (attributes.as_slice(), value) {
                ([single], Value::Object(map)) if map.len() == 1 && map.contains_key(single) => {
                    for (attribute, v) in map {
                        results.insert_read(mbean.clone(), attribute, v);
                    }
                }
                ([single], value) => results.insert_read(mbean.clone(), single.clone(), value),
                (_, Value::Object(map)) => {
                    for (attribute, v) in map {
                        results.insert_read(mbean.clone(), attribute, v);
                    }
                }
                _ => {}
            }
        }

        results
    }
}

fn requested_attributes(attribute: Option<&Value>) -> Vec<String> {
    match attribute {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => vec![],
    }
}
