//! Attribute mapping registry
//!
//! Declarative mapping from MBean attributes to metric definitions, loaded once
//! at startup from the built-in catalogs of the selected target systems and an
//! optional custom document. Read-only afterwards.
//!
//! # Example
//!
//! ```ignore
//! use jmx_scraper::mapping::MappingRegistry;
//!
//! let registry = MappingRegistry::resolve(&["jvm".to_string()], None)?;
//! let requests = registry.attributes_to_read();
//! let observations = registry.match_against_read_results(&results, SystemTime::now());
//! ```

pub mod catalog;
pub mod object_name;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::Path;
use std::time::SystemTime;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use crate::connection::{AttributeValue, ReadRequest, ReadResults};
use crate::emitter::MetricObservation;
use crate::error::MappingLoadError;

pub use object_name::{ObjectName, ObjectNamePattern};

/// Metric kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MetricKind {
    /// Value that can go up and down
    #[default]
    Gauge,
    /// Monotonic counter
    Counter,
    /// Non-monotonic counter
    UpDownCounter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::UpDownCounter => "updowncounter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MetricKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MetricKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_lowercase().as_str() {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            "updowncounter" => Ok(MetricKind::UpDownCounter),
            other => Err(serde::de::Error::custom(format!(
                "unknown metric type '{}', expected one of: gauge, counter, updowncounter",
                other
            ))),
        }
    }
}

static LABEL_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(param|beanattr|const)\((.*)\)\s*$").expect("invalid label rule regex")
});

/// Where a label value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelSource {
    /// ObjectName key property
    Param(String),
    /// Companion attribute on the same bean
    BeanAttr(String),
    /// Fixed value
    Const(String),
}

impl LabelSource {
    /// Parse `param(x)`, `beanattr(x)` or `const(x)`
    pub fn parse(rule: &str) -> Option<Self> {
        let caps = LABEL_RULE.captures(rule)?;
        let arg = caps.get(2)?.as_str().trim().to_string();
        match caps.get(1)?.as_str() {
            "param" if !arg.is_empty() => Some(LabelSource::Param(arg)),
            "beanattr" if !arg.is_empty() => Some(LabelSource::BeanAttr(arg)),
            "const" => Some(LabelSource::Const(arg)),
            _ => None,
        }
    }
}

impl fmt::Display for LabelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelSource::Param(key) => write!(f, "param({})", key),
            LabelSource::BeanAttr(attr) => write!(f, "beanattr({})", attr),
            LabelSource::Const(value) => write!(f, "const({})", value),
        }
    }
}

impl Serialize for LabelSource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// One label extraction rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelRule {
    pub name: String,
    pub source: LabelSource,
}

/// One attribute-to-metric mapping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeMapping {
    /// Object-name pattern of the source beans
    pub pattern: ObjectNamePattern,
    /// Source attribute
    pub attribute: String,
    /// Composite item or array index inside the attribute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_key: Option<String>,
    /// Target metric name, unique within a registry
    pub metric: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: MetricKind,
    pub labels: Vec<LabelRule>,
    /// Catalog the mapping was loaded from
    pub origin: String,
    /// Position of the defining rule within its catalog
    #[serde(skip)]
    pub rule_index: usize,
}

impl AttributeMapping {
    /// Same rule and attribute, differing at most in the bean pattern
    ///
    /// A `beans:` rule yields one mapping per pattern, all sharing a metric.
    fn same_definition(&self, other: &AttributeMapping) -> bool {
        self.origin == other.origin
            && self.rule_index == other.rule_index
            && self.attribute == other.attribute
            && self.sub_key == other.sub_key
    }

    fn extract(
        &self,
        name: &ObjectName,
        attrs: &BTreeMap<String, AttributeValue>,
        timestamp: SystemTime,
    ) -> Option<MetricObservation> {
        let mut value = attrs.get(&self.attribute)?;
        if let Some(key) = &self.sub_key {
            value = value.get(key)?;
        }
        let value = value.as_f64()?;

        let mut labels = BTreeMap::new();
        for rule in &self.labels {
            let label = match &rule.source {
                LabelSource::Param(key) => name.key_property(key).map(str::to_string),
                LabelSource::BeanAttr(attr) => attrs.get(attr).and_then(AttributeValue::as_label),
                LabelSource::Const(v) => Some(v.clone()),
            };
            if let Some(label) = label {
                labels.insert(rule.name.clone(), label);
            }
        }

        Some(MetricObservation {
            name: self.metric.clone(),
            kind: self.kind,
            value,
            labels,
            timestamp,
            unit: self.unit.clone(),
            description: self.description.clone(),
        })
    }
}

/// Merged, immutable set of attribute mappings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingRegistry {
    mappings: Vec<AttributeMapping>,
}

impl MappingRegistry {
    /// Load the catalogs of the given target systems, in order, then the
    /// custom document if any
    ///
    /// # Errors
    /// Unknown target systems, unreadable or malformed documents, and metric
    /// names defined more than once across the merged set.
    pub fn resolve(
        target_systems: &[String],
        custom_document: Option<&Path>,
    ) -> Result<Self, MappingLoadError> {
        let mut documents = Vec::with_capacity(target_systems.len() + 1);
        for system in target_systems {
            let text = catalog::builtin(system)
                .ok_or_else(|| MappingLoadError::UnknownTargetSystem(system.clone()))?;
            documents.push((format!("builtin:{}", system), text.to_string()));
        }

        if let Some(path) = custom_document {
            let text = std::fs::read_to_string(path).map_err(|source| MappingLoadError::Io {
                path: path.display().to_string(),
                source,
            })?;
            documents.push((path.display().to_string(), text));
        }

        let registry = Self::from_documents(documents)?;
        info!(
            mappings = registry.len(),
            targets = ?target_systems,
            custom = ?custom_document,
            "Loaded attribute mappings"
        );
        Ok(registry)
    }

    /// Merge already-read documents given as `(origin, text)` pairs
    pub fn from_documents<I>(documents: I) -> Result<Self, MappingLoadError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut registry = Self::default();
        for (origin, text) in documents {
            registry.extend(catalog::parse(&text, &origin)?)?;
        }
        Ok(registry)
    }

    /// Build directly from mappings, enforcing unique metric names
    pub fn from_mappings(mappings: Vec<AttributeMapping>) -> Result<Self, MappingLoadError> {
        let mut registry = Self::default();
        registry.extend(mappings)?;
        Ok(registry)
    }

    fn extend(&mut self, mappings: Vec<AttributeMapping>) -> Result<(), MappingLoadError> {
        let merged: HashMap<&str, &str> = self
            .mappings
            .iter()
            .map(|m| (m.metric.as_str(), m.origin.as_str()))
            .collect();
        let mut batch: HashMap<&str, &AttributeMapping> = HashMap::new();
        for mapping in &mappings {
            let clash = match merged.get(mapping.metric.as_str()) {
                Some(first) => Some(*first),
                None => match batch.insert(&mapping.metric, mapping) {
                    Some(first) if !first.same_definition(mapping) => Some(first.origin.as_str()),
                    _ => None,
                },
            };
            if let Some(first) = clash {
                return Err(MappingLoadError::DuplicateMetric {
                    metric: mapping.metric.clone(),
                    first: first.to_string(),
                    second: mapping.origin.clone(),
                });
            }
        }
        self.mappings.extend(mappings);
        Ok(())
    }

    pub fn mappings(&self) -> &[AttributeMapping] {
        &self.mappings
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Read plan: one request per distinct object-name pattern
    ///
    /// Includes companion attributes referenced by `beanattr()` label rules.
    pub fn attributes_to_read(&self) -> Vec<ReadRequest> {
        let mut plan: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for mapping in &self.mappings {
            let attributes = plan.entry(mapping.pattern.as_str()).or_default();
            attributes.insert(&mapping.attribute);
            for rule in &mapping.labels {
                if let LabelSource::BeanAttr(attr) = &rule.source {
                    attributes.insert(attr);
                }
            }
        }

        plan.into_iter()
            .map(|(pattern, attrs)| {
                ReadRequest::new(pattern, attrs.into_iter().map(str::to_string).collect())
            })
            .collect()
    }

    /// Convert read results into observations
    ///
    /// Objects or attributes absent from the results, and values that are not
    /// numeric, produce nothing.
    pub fn match_against_read_results(
        &self,
        results: &ReadResults,
        timestamp: SystemTime,
    ) -> Vec<MetricObservation> {
        let beans: Vec<_> = results
            .beans()
            .filter_map(|(name, attrs)| ObjectName::parse(name).map(|parsed| (parsed, attrs)))
            .collect();

        let mut observations = Vec::new();
        for mapping in &self.mappings {
            for (name, attrs) in &beans {
                if !mapping.pattern.matches(name) {
                    continue;
                }
                match mapping.extract(name, attrs, timestamp) {
                    Some(observation) => observations.push(observation),
                    None => debug!(
                        metric = %mapping.metric,
                        attribute = %mapping.attribute,
                        "Attribute unavailable"
                    ),
                }
            }
        }
        observations
    }
}
