mod recovery;

use serde::{Deserialize, Serialize};

use crate::metrics::Metric;

pub use recovery::{recover_routine, RecoveredRoutine, RecoverySource};

pub const SECTION_IDS: [&str; 3] = ["morning", "evening", "weekly"];
pub const MIN_CONCERNS: usize = 2;
pub const MAX_CONCERNS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineStep {
    pub name: String,
    pub instruction: String,
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineSection {
    pub id: String,
    pub title: String,
    pub steps: Vec<RoutineStep>,
}

/// Skincare routine derived from a scan. Always has exactly three sections
/// (`morning`, `evening`, `weekly`) and two to four main concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineDocument {
    pub summary: String,
    pub main_concerns: Vec<String>,
    pub sections: Vec<RoutineSection>,
    pub disclaimer: String,
}

impl RoutineDocument {
    /// The safe default returned whenever generated text cannot be used.
    pub fn fallback() -> Self {
        Self {
            summary: "Your scan shows a few areas worth a steady, gentle routine. Focus on \
                      consistent cleansing, hydration and daily sun protection, and reassess \
                      after a few weeks."
                .to_string(),
            main_concerns: vec!["acne".to_string(), "pores".to_string(), "redness".to_string()],
            sections: vec![
                RoutineSection {
                    id: "morning".to_string(),
                    title: "Morning".to_string(),
                    steps: vec![
                        step(
                            "Gentle cleanser",
                            "Wash with a low-foaming, fragrance-free cleanser and lukewarm water.",
                            &["acne", "pores"],
                        ),
                        step(
                            "Soothing moisturizer",
                            "Apply a lightweight moisturizer with niacinamide or ceramides.",
                            &["redness"],
                        ),
                        step(
                            "Broad-spectrum sunscreen",
                            "Finish with SPF 30 or higher and reapply when outdoors.",
                            &["redness", "pigmentation"],
                        ),
                    ],
                },
                RoutineSection {
                    id: "evening".to_string(),
                    title: "Evening".to_string(),
                    steps: vec![
                        step(
                            "Double cleanse",
                            "Remove sunscreen and makeup first, then follow with the gentle cleanser.",
                            &["pores"],
                        ),
                        step(
                            "Targeted treatment",
                            "Use a salicylic acid or azelaic acid serum on affected areas.",
                            &["acne", "redness"],
                        ),
                        step(
                            "Barrier moisturizer",
                            "Seal in hydration with a richer, non-comedogenic moisturizer.",
                            &[],
                        ),
                    ],
                },
                RoutineSection {
                    id: "weekly".to_string(),
                    title: "Weekly".to_string(),
                    steps: vec![
                        step(
                            "Mild exfoliation",
                            "Exfoliate once or twice a week with a gentle chemical exfoliant.",
                            &["pores"],
                        ),
                        step(
                            "Calming mask",
                            "Use a hydrating, calming mask after exfoliation days.",
                            &["redness"],
                        ),
                    ],
                },
            ],
            disclaimer: "This routine is general skincare guidance generated from an automated \
                         scan and is not medical advice. Consult a dermatologist for persistent \
                         or severe skin concerns."
                .to_string(),
        }
    }

    /// Checks the structural invariants callers rely on.
    pub fn is_schema_valid(&self) -> bool {
        let sections_ok = self.sections.len() == SECTION_IDS.len()
            && self
                .sections
                .iter()
                .zip(SECTION_IDS.iter())
                .all(|(section, id)| section.id == *id);
        let concerns_ok = (MIN_CONCERNS..=MAX_CONCERNS).contains(&self.main_concerns.len());
        sections_ok
            && concerns_ok
            && !self.summary.trim().is_empty()
            && !self.disclaimer.trim().is_empty()
    }

    pub fn section(&self, id: &str) -> Option<&RoutineSection> {
        self.sections.iter().find(|section| section.id == id)
    }
}

fn step(name: &str, instruction: &str, targets: &[&str]) -> RoutineStep {
    RoutineStep {
        name: name.to_string(),
        instruction: instruction.to_string(),
        targets: targets.iter().map(|item| (*item).to_string()).collect(),
    }
}

/// Input of the routine recommendation entry point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineRequest {
    #[serde(default)]
    pub skin_metrics: Option<Vec<Metric>>,
    #[serde(default)]
    pub overall_health: Option<f64>,
}

impl RoutineRequest {
    pub fn metric_ids(&self) -> Vec<String> {
        self.skin_metrics
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|metric| metric.id.clone())
            .collect()
    }
}
