use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::allow_list::{MASK_FIELDS, METRIC_ALLOW_LIST, VALUE_FIELDS};
use super::dictionary::{AlgorithmDictionary, AlgorithmInfo, AlgorithmSnapshot};
use super::{humanize, snake_case, value_as_f64, value_as_non_empty_string, Metric};

/// Algorithm family block carried by current-generation results.
pub const MODERN_FAMILY: &str = "face_skin_metrics_3";

const LINES_WRINKLES_ID: &str = "lines_wrinkles";
const LINES_WRINKLES_LABEL: &str = "Lines & Wrinkles";
const LINES_WRINKLES_SOURCES: &[&str] = &["lines_wrinkles", "wrinkles", "lines"];

/// One result row of the legacy (per-algorithm) response generation.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyEntry<'a> {
    pub version_id: Option<String>,
    pub result: Option<&'a Value>,
    pub raw: &'a Value,
}

impl<'a> LegacyEntry<'a> {
    fn from_value(raw: &'a Value) -> Self {
        let obj = raw.as_object();
        let version_id = obj
            .and_then(|obj| {
                obj.get("algorithm_version_id").or_else(|| {
                    obj.get("algorithm_version")
                        .and_then(Value::as_object)
                        .and_then(|version| version.get("id"))
                })
            })
            .and_then(id_text);
        Self {
            version_id,
            result: obj.and_then(|obj| obj.get("result")),
            raw,
        }
    }
}

/// Vendor results, classified once at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorPayload<'a> {
    Modern { parameters: &'a Map<String, Value> },
    Legacy { entries: Vec<LegacyEntry<'a>> },
}

impl<'a> VendorPayload<'a> {
    /// Modern when the first raw result carries the parameter block, legacy
    /// otherwise. Array rows inside a legacy result are flattened.
    pub fn classify(raw_results: &'a [Value]) -> Self {
        if let Some(parameters) = raw_results.first().and_then(modern_parameters) {
            return Self::Modern { parameters };
        }
        let entries = raw_results
            .iter()
            .flat_map(|row| match row {
                Value::Array(rows) => rows.iter().collect::<Vec<&Value>>(),
                other => vec![other],
            })
            .filter(|row| row.is_object())
            .map(LegacyEntry::from_value)
            .collect();
        Self::Legacy { entries }
    }
}

fn modern_parameters(raw: &Value) -> Option<&Map<String, Value>> {
    raw.get(MODERN_FAMILY)
        .and_then(|block| block.get("parameters"))
        .and_then(Value::as_object)
}

/// Maps raw vendor results of either generation onto the internal metric list.
///
/// Normalization is deterministic: the same payload always yields the same
/// list. Metric ids are unique; on collision the first metric wins.
#[derive(Debug, Clone)]
pub struct MetricNormalizer {
    dictionary: Arc<AlgorithmDictionary>,
}

impl MetricNormalizer {
    pub fn new(dictionary: Arc<AlgorithmDictionary>) -> Self {
        Self { dictionary }
    }

    pub fn without_dictionary() -> Self {
        Self::new(Arc::new(AlgorithmDictionary::empty()))
    }

    pub fn dictionary(&self) -> &AlgorithmDictionary {
        &self.dictionary
    }

    pub fn normalize(&self, raw_results: &[Value]) -> Vec<Metric> {
        let payload = VendorPayload::classify(raw_results);
        // Modern payloads never touch the dictionary.
        let table = match &payload {
            VendorPayload::Modern { .. } => AlgorithmSnapshot::default(),
            VendorPayload::Legacy { entries } if entries.is_empty() => AlgorithmSnapshot::default(),
            VendorPayload::Legacy { .. } => self.dictionary.snapshot(),
        };

        let mut metrics: IndexMap<String, Metric> = IndexMap::new();
        let primary = match &payload {
            VendorPayload::Modern { parameters } => normalize_modern(parameters),
            VendorPayload::Legacy { entries } => normalize_legacy(entries, &table),
        };
        for metric in primary {
            metrics.entry(metric.id.clone()).or_insert(metric);
        }

        // Kept alongside `lines`; the two can come from different computations.
        if let Some(extra) = derive_lines_wrinkles(&payload, &table) {
            metrics.entry(extra.id.clone()).or_insert(extra);
        }
        metrics.into_values().collect()
    }
}

fn normalize_legacy(entries: &[LegacyEntry<'_>], table: &AlgorithmSnapshot) -> Vec<Metric> {
    entries
        .iter()
        .filter_map(|entry| {
            let version_id = entry.version_id.as_deref()?;
            Some(legacy_metric(entry, version_id, table.get(version_id)))
        })
        .collect()
}

fn normalize_modern(parameters: &Map<String, Value>) -> Vec<Metric> {
    METRIC_ALLOW_LIST
        .iter()
        .filter_map(|mapping| {
            let parameter = parameters.get(mapping.vendor_key).filter(|v| !v.is_null())?;
            Some(modern_metric(mapping.id, mapping.label, parameter))
        })
        .collect()
}

fn modern_metric(id: &str, label: &str, parameter: &Value) -> Metric {
    let value = value_as_f64(Some(parameter))
        .or_else(|| {
            VALUE_FIELDS
                .iter()
                .find_map(|field| value_as_f64(parameter.get(*field)))
        })
        .unwrap_or(0.0);
    let tag = value_as_non_empty_string(parameter.get("tag")).or_else(|| {
        parameter
            .get("tag")
            .and_then(|tag| value_as_non_empty_string(tag.get("name")))
    });
    let mask_url = MASK_FIELDS
        .iter()
        .find_map(|field| value_as_non_empty_string(parameter.get(*field)));

    Metric {
        id: id.to_string(),
        label: label.to_string(),
        value,
        tech_name: None,
        family_name: Some(MODERN_FAMILY.to_string()),
        tag,
        mask_url,
        raw: parameter.clone(),
    }
}

fn legacy_metric(entry: &LegacyEntry<'_>, version_id: &str, info: Option<&AlgorithmInfo>) -> Metric {
    let tech_name = info.and_then(|info| info.tech_name.clone());
    let family_name = info.and_then(|info| info.family_name.clone());
    let id = tech_name
        .as_deref()
        .map(snake_case)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("algorithm_{}", snake_case(version_id)));
    let label = family_name
        .clone()
        .or_else(|| tech_name.as_deref().map(humanize))
        .unwrap_or_else(|| format!("Algorithm {version_id}"));

    Metric {
        id,
        label,
        value: legacy_value(entry.result),
        tech_name,
        family_name,
        tag: None,
        mask_url: None,
        raw: entry.raw.clone(),
    }
}

fn legacy_value(result: Option<&Value>) -> f64 {
    value_as_f64(result)
        .or_else(|| result.and_then(|result| value_as_f64(result.get("score"))))
        .or_else(|| {
            result
                .and_then(|result| result.get("main_metric"))
                .and_then(|main| value_as_f64(main.get("score")))
        })
        .unwrap_or(0.0)
}

/// Builds the additive `lines_wrinkles` metric from the same payload.
///
/// Modern payloads use the first present of `lines_wrinkles`, `wrinkles`,
/// `lines`; legacy payloads use the first entry whose algorithm name mentions
/// lines or wrinkles.
pub fn derive_lines_wrinkles(
    payload: &VendorPayload<'_>,
    table: &AlgorithmSnapshot,
) -> Option<Metric> {
    match payload {
        VendorPayload::Modern { parameters } => LINES_WRINKLES_SOURCES.iter().find_map(|key| {
            parameters
                .get(*key)
                .filter(|value| !value.is_null())
                .map(|parameter| modern_metric(LINES_WRINKLES_ID, LINES_WRINKLES_LABEL, parameter))
        }),
        VendorPayload::Legacy { entries } => entries.iter().find_map(|entry| {
            let version_id = entry.version_id.as_deref()?;
            let info = table.get(version_id)?;
            let name = info.tech_name.as_deref()?.to_ascii_lowercase();
            if !(name.contains("lines") || name.contains("wrinkle")) {
                return None;
            }
            let mut metric = legacy_metric(entry, version_id, Some(info));
            metric.id = LINES_WRINKLES_ID.to_string();
            metric.label = LINES_WRINKLES_LABEL.to_string();
            Some(metric)
        }),
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.trim().is_empty() => Some(id.trim().to_string()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
