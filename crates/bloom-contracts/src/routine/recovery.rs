use serde_json::{Map, Value};

use super::{
    RoutineDocument, RoutineSection, RoutineStep, MAX_CONCERNS, MIN_CONCERNS, SECTION_IDS,
};
use crate::metrics::{snake_case, value_as_non_empty_string};

/// How the returned document was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySource {
    /// The whole text parsed as one JSON object.
    Direct,
    /// A prefix ending at the last `}` parsed.
    Repaired,
    /// Nothing parsed; the hardcoded default was used.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredRoutine {
    pub document: RoutineDocument,
    pub source: RecoverySource,
}

/// Turns generator output into a schema-valid routine. Never fails.
///
/// `known_metric_ids` are the ids the caller can map back to its metrics;
/// concerns outside that set are dropped. An empty set accepts any id.
pub fn recover_routine(text: &str, known_metric_ids: &[String]) -> RecoveredRoutine {
    let fallback = RoutineDocument::fallback();
    let raw = strip_code_fence(text);

    if let Some(object) = parse_object(&raw) {
        return RecoveredRoutine {
            document: coerce_document(&object, known_metric_ids, &fallback),
            source: RecoverySource::Direct,
        };
    }

    for candidate in repair_candidates(&raw) {
        if let Some(object) = parse_object(candidate) {
            return RecoveredRoutine {
                document: coerce_document(&object, known_metric_ids, &fallback),
                source: RecoverySource::Repaired,
            };
        }
    }

    RecoveredRoutine {
        document: fallback,
        source: RecoverySource::Fallback,
    }
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Prefix up to the last `}` (drops trailing commentary), then the same span
/// starting at the first `{` (drops leading commentary too).
fn repair_candidates(raw: &str) -> Vec<&str> {
    let Some(end) = raw.rfind('}') else {
        return Vec::new();
    };
    let mut candidates = vec![&raw[..=end]];
    if let Some(start) = raw.find('{') {
        if start > 0 && start < end {
            candidates.push(&raw[start..=end]);
        }
    }
    candidates
}

fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = trimmed.trim_start_matches('`').trim_end();
    if let Some(stripped) = body.strip_suffix("```") {
        body = stripped;
    }
    let body = body.trim();
    if let Some(rest) = body
        .get(..4)
        .filter(|prefix| prefix.eq_ignore_ascii_case("json"))
        .and_then(|_| body.get(4..))
    {
        return rest.trim().to_string();
    }
    body.to_string()
}

fn coerce_document(
    candidate: &Map<String, Value>,
    known_metric_ids: &[String],
    fallback: &RoutineDocument,
) -> RoutineDocument {
    let summary = value_as_non_empty_string(candidate.get("summary"))
        .unwrap_or_else(|| fallback.summary.clone());
    let disclaimer = value_as_non_empty_string(candidate.get("disclaimer"))
        .unwrap_or_else(|| fallback.disclaimer.clone());
    let main_concerns = coerce_concerns(
        candidate
            .get("mainConcerns")
            .or_else(|| candidate.get("main_concerns")),
        known_metric_ids,
        fallback,
    );
    let candidate_sections = candidate
        .get("sections")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let sections = fallback
        .sections
        .iter()
        .enumerate()
        .map(|(idx, fallback_section)| {
            find_section(candidate_sections, idx)
                .map(|section| coerce_section(section, fallback_section))
                .unwrap_or_else(|| fallback_section.clone())
        })
        .collect();

    RoutineDocument {
        summary,
        main_concerns,
        sections,
        disclaimer,
    }
}

fn coerce_concerns(
    value: Option<&Value>,
    known_metric_ids: &[String],
    fallback: &RoutineDocument,
) -> Vec<String> {
    let is_known =
        |id: &str| known_metric_ids.is_empty() || known_metric_ids.iter().any(|known| known == id);
    let mut concerns: Vec<String> = Vec::new();

    for row in value.and_then(Value::as_array).into_iter().flatten() {
        if let Some(text) = row.as_str() {
            let id = snake_case(text);
            if is_known(&id) {
                push_concern(&mut concerns, id);
            }
        }
    }

    // Too few usable concerns: top up from the caller's ids, then the default.
    for id in known_metric_ids.iter().chain(fallback.main_concerns.iter()) {
        if concerns.len() >= MIN_CONCERNS {
            break;
        }
        push_concern(&mut concerns, id.clone());
    }
    concerns
}

fn push_concern(concerns: &mut Vec<String>, id: String) {
    if !id.is_empty() && concerns.len() < MAX_CONCERNS && !concerns.contains(&id) {
        concerns.push(id);
    }
}

fn find_section(candidates: &[Value], idx: usize) -> Option<&Map<String, Value>> {
    let wanted = SECTION_IDS[idx];
    candidates
        .iter()
        .filter_map(Value::as_object)
        .find(|section| {
            section
                .get("id")
                .and_then(Value::as_str)
                .map(|id| id.trim().eq_ignore_ascii_case(wanted))
                .unwrap_or(false)
        })
        .or_else(|| {
            candidates
                .get(idx)
                .and_then(Value::as_object)
                .filter(|section| section.get("id").is_none())
        })
}

fn coerce_section(candidate: &Map<String, Value>, fallback: &RoutineSection) -> RoutineSection {
    let steps: Vec<RoutineStep> = candidate
        .get("steps")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(coerce_step)
        .collect();
    RoutineSection {
        id: fallback.id.clone(),
        title: value_as_non_empty_string(candidate.get("title"))
            .unwrap_or_else(|| fallback.title.clone()),
        steps: if steps.is_empty() {
            fallback.steps.clone()
        } else {
            steps
        },
    }
}

fn coerce_step(value: &Value) -> Option<RoutineStep> {
    if let Some(text) = value.as_str().map(str::trim).filter(|text| !text.is_empty()) {
        return Some(RoutineStep {
            name: text.to_string(),
            instruction: text.to_string(),
            targets: Vec::new(),
        });
    }
    let obj = value.as_object()?;
    let name = value_as_non_empty_string(obj.get("name"))
        .or_else(|| value_as_non_empty_string(obj.get("title")))?;
    let instruction = value_as_non_empty_string(obj.get("instruction"))
        .or_else(|| value_as_non_empty_string(obj.get("description")))
        .unwrap_or_else(|| name.clone());
    let targets = obj
        .get("targets")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(snake_case)
        .filter(|id| !id.is_empty())
        .collect();
    Some(RoutineStep {
        name,
        instruction,
        targets,
    })
}
