//! Catalog documents
//!
//! Catalogs are YAML documents in the rule layout:
//!
//! ```yaml
//! rules:
//!   - bean: java.lang:type=GarbageCollector,name=*
//!     prefix: jvm.gc.
//!     metricAttribute:
//!       name: param(name)
//!     mapping:
//!       CollectionCount:
//!         metric: collections.count
//!         type: counter
//!         unit: "{collections}"
//!         desc: Total number of collections
//! ```
//!
//! Built-in catalogs for every supported target system are embedded in the
//! binary.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::object_name::ObjectNamePattern;
use super::{AttributeMapping, LabelRule, LabelSource, MetricKind};
use crate::error::MappingLoadError;

/// 내장 카탈로그 (target system -> YAML)
static BUILTIN_CATALOGS: &[(&str, &str)] = &[
    ("activemq", include_str!("catalogs/activemq.yaml")),
    ("cassandra", include_str!("catalogs/cassandra.yaml")),
    ("hbase", include_str!("catalogs/hbase.yaml")),
    ("hadoop", include_str!("catalogs/hadoop.yaml")),
    ("jetty", include_str!("catalogs/jetty.yaml")),
    ("jvm", include_str!("catalogs/jvm.yaml")),
    ("kafka", include_str!("catalogs/kafka.yaml")),
    ("kafka-consumer", include_str!("catalogs/kafka-consumer.yaml")),
    ("kafka-producer", include_str!("catalogs/kafka-producer.yaml")),
    ("solr", include_str!("catalogs/solr.yaml")),
    ("tomcat", include_str!("catalogs/tomcat.yaml")),
    ("wildfly", include_str!("catalogs/wildfly.yaml")),
];

/// Built-in catalog text for a target system
pub fn builtin(target_system: &str) -> Option<&'static str> {
    BUILTIN_CATALOGS
        .iter()
        .find(|(name, _)| *name == target_system)
        .map(|(_, text)| *text)
}

/// Names of all embedded catalogs
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTIN_CATALOGS.iter().map(|(name, _)| *name)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    #[serde(default)]
    rules: Vec<RuleDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDocument {
    #[serde(default)]
    bean: Option<String>,
    #[serde(default)]
    beans: Vec<String>,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(rename = "metricAttribute", default)]
    metric_attribute: BTreeMap<String, String>,
    mapping: BTreeMap<String, Option<MetricDocument>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MetricDocument {
    #[serde(default)]
    metric: Option<String>,
    #[serde(rename = "type", default)]
    kind: MetricKind,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    desc: Option<String>,
    #[serde(rename = "metricAttribute", default)]
    metric_attribute: BTreeMap<String, String>,
}

/// Parse a catalog document into attribute mappings
///
/// `origin` names the document in errors (`builtin:jvm` or a file path).
pub fn parse(text: &str, origin: &str) -> Result<Vec<AttributeMapping>, MappingLoadError> {
    let document: CatalogDocument =
        serde_yaml::from_str(text).map_err(|source| MappingLoadError::Parse {
            origin: origin.to_string(),
            source,
        })?;

    let mut mappings = Vec::new();
    for (rule_index, rule) in document.rules.into_iter().enumerate() {
        let mut beans = rule.beans.clone();
        if let Some(bean) = &rule.bean {
            beans.insert(0, bean.clone());
        }
        if beans.is_empty() {
            return Err(MappingLoadError::InvalidPattern {
                origin: origin.to_string(),
                pattern: String::new(),
                reason: "rule has no bean".to_string(),
            });
        }

        for bean in &beans {
            let pattern =
                ObjectNamePattern::compile(bean).map_err(|reason| MappingLoadError::InvalidPattern {
                    origin: origin.to_string(),
                    pattern: bean.clone(),
                    reason,
                })?;

            for (attribute_path, metric) in &rule.mapping {
                let metric = metric.as_ref();
                let (attribute, sub_key) = split_attribute(attribute_path).ok_or_else(|| {
                    MappingLoadError::InvalidAttribute {
                        origin: origin.to_string(),
                        attribute: attribute_path.clone(),
                    }
                })?;

                let base = metric
                    .and_then(|m| m.metric.clone())
                    .unwrap_or_else(|| attribute_path.clone());
                let name = format!("{}{}", rule.prefix.as_deref().unwrap_or(""), base);

                // metric-level rules override rule-level ones with the same label
                let mut rules = rule.metric_attribute.clone();
                if let Some(m) = metric {
                    rules.extend(m.metric_attribute.clone());
                }
                let labels = rules
                    .into_iter()
                    .map(|(label, rule)| parse_label_rule(&label, &rule, origin))
                    .collect::<Result<Vec<_>, _>>()?;

                mappings.push(AttributeMapping {
                    pattern: pattern.clone(),
                    attribute: attribute.to_string(),
                    sub_key: sub_key.map(str::to_string),
                    metric: name,
                    unit: metric.and_then(|m| m.unit.clone()),
                    description: metric.and_then(|m| m.desc.clone()),
                    kind: metric.map(|m| m.kind).unwrap_or_default(),
                    labels,
                    origin: origin.to_string(),
                    rule_index,
                });
            }
        }
    }

    Ok(mappings)
}

/// `Attr` or `Attr.key`
fn split_attribute(path: &str) -> Option<(&str, Option<&str>)> {
    let (attribute, sub_key) = match path.split_once('.') {
        Some((attribute, key)) => (attribute, Some(key)),
        None => (path, None),
    };
    if attribute.trim().is_empty() || sub_key.is_some_and(|k| k.trim().is_empty()) {
        return None;
    }
    Some((attribute, sub_key))
}

fn parse_label_rule(label: &str, rule: &str, origin: &str) -> Result<LabelRule, MappingLoadError> {
    let invalid = || MappingLoadError::InvalidLabelRule {
        origin: origin.to_string(),
        label: label.to_string(),
        rule: rule.to_string(),
    };
    if label.trim().is_empty() {
        return Err(invalid());
    }
    let source = LabelSource::parse(rule).ok_or_else(invalid)?;
    Ok(LabelRule {
        name: label.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AVAILABLE_TARGET_SYSTEMS;

    #[test]
    fn test_every_target_system_has_catalog() {
        for system in AVAILABLE_TARGET_SYSTEMS {
            let text = builtin(system).unwrap_or_else(|| panic!("no catalog for {}", system));
            let mappings = parse(text, system).unwrap();
            assert!(!mappings.is_empty(), "{} catalog is empty", system);
        }
        assert_eq!(builtin_names().count(), AVAILABLE_TARGET_SYSTEMS.len());
        assert!(builtin("websphere").is_none());
    }

    #[test]
    fn test_parse_rule() {
        let yaml = r#"
rules:
  - bean: java.lang:type=GarbageCollector,name=*
    prefix: jvm.gc.
    metricAttribute:
      name: param(name)
    mapping:
      CollectionCount:
        metric: collections.count
        type: counter
        unit: "{collections}"
        desc: Total number of collections
      LastGcInfo.duration:
"#;
        let mappings = parse(yaml, "test").unwrap();
        assert_eq!(mappings.len(), 2);

        let count = mappings
            .iter()
            .find(|m| m.metric == "jvm.gc.collections.count")
            .unwrap();
        assert_eq!(count.kind, MetricKind::Counter);
        assert_eq!(count.unit.as_deref(), Some("{collections}"));
        assert_eq!(count.labels[0].source, LabelSource::Param("name".to_string()));

        let duration = mappings
            .iter()
            .find(|m| m.metric == "jvm.gc.LastGcInfo.duration")
            .unwrap();
        assert_eq!(duration.attribute, "LastGcInfo");
        assert_eq!(duration.sub_key.as_deref(), Some("duration"));
        assert_eq!(duration.kind, MetricKind::Gauge);
    }

    #[test]
    fn test_metric_level_labels_override() {
        let yaml = r#"
rules:
  - beans: ["a:type=X", "a:type=Y"]
    metricAttribute:
      kind: const(rule)
    mapping:
      Value:
        metric: a.value
        metricAttribute:
          kind: const(metric)
"#;
        let mappings = parse(yaml, "test").unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].labels.len(), 1);
        assert_eq!(mappings[0].labels[0].source, LabelSource::Const("metric".to_string()));
    }

    #[test]
    fn test_parse_errors() {
        let bad_label = concat!(
            "rules:\n  - bean: a:type=X\n",
            "    metricAttribute:\n      x: lookup(y)\n",
            "    mapping:\n      V:\n",
        );
        assert!(matches!(
            parse(bad_label, "t"),
            Err(MappingLoadError::InvalidLabelRule { .. })
        ));

        let bad_pattern = "rules:\n  - bean: nodomain\n    mapping:\n      V:\n";
        assert!(matches!(
            parse(bad_pattern, "t"),
            Err(MappingLoadError::InvalidPattern { .. })
        ));

        let bad_attribute = "rules:\n  - bean: a:type=X\n    mapping:\n      \"V.\":\n";
        assert!(matches!(
            parse(bad_attribute, "t"),
            Err(MappingLoadError::InvalidAttribute { .. })
        ));

        let bad_kind =
            "rules:\n  - bean: a:type=X\n    mapping:\n      V:\n        type: histogram\n";
        assert!(matches!(parse(bad_kind, "t"), Err(MappingLoadError::Parse { .. })));

        assert!(matches!(parse("rules: [", "t"), Err(MappingLoadError::Parse { .. })));
    }
}
