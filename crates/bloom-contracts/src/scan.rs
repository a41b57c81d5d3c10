use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_SUBJECT_NAME: &str = "Bloom Web User";

/// Vendor-side handles for one scan, assigned stage by stage by the upload
/// pipeline and used by the poller to find the batch again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanIdentifiers {
    pub company_id: String,
    pub dataset_id: String,
    pub subject_id: String,
    pub batch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    #[serde(default)]
    pub base64_image: Option<String>,
    #[serde(default)]
    pub subject_name: Option<String>,
}

impl ScanRequest {
    pub fn new(base64_image: impl Into<String>) -> Self {
        Self {
            base64_image: Some(base64_image.into()),
            subject_name: None,
        }
    }

    pub fn with_subject_name(mut self, name: impl Into<String>) -> Self {
        self.subject_name = Some(name.into());
        self
    }

    /// Caller-supplied subject name; blank names count as absent.
    pub fn subject_name(&self) -> Option<&str> {
        self.subject_name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Name sent to the vendor when creating the subject.
    pub fn display_name(&self) -> &str {
        self.subject_name().unwrap_or(DEFAULT_SUBJECT_NAME)
    }

    /// Encoded image, if one was supplied and is not blank.
    pub fn image(&self) -> Option<&str> {
        self.base64_image
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub ids: ScanIdentifiers,
    pub raw_results: Value,
}

impl ScanOutcome {
    /// Raw results as the list shape the normalizer consumes.
    pub fn raw_result_list(&self) -> Vec<Value> {
        match &self.raw_results {
            Value::Array(rows) => rows.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }
}
