use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_CLIENT_CLOSED: u16 = 499;
pub const STATUS_INTERNAL: u16 = 500;
pub const STATUS_GATEWAY_TIMEOUT: u16 = 504;

/// Everything that can end a scan or a routine request.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("configuration error: missing {}", .missing.join(", "))]
    Configuration { missing: Vec<String> },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("http client setup failed")]
    ClientSetup(#[source] reqwest::Error),

    #[error("vendor request failed ({status})")]
    Remote { status: u16, body: Value },

    #[error("transport failure calling {url}")]
    Transport {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("subject creation response carried no identifier")]
    SubjectCreation { body: Value },

    #[error("upload initialisation response missing {missing}")]
    UploadInit { missing: &'static str, body: Value },

    #[error("signed storage upload failed ({status})")]
    StorageUpload { status: u16, body: String },

    #[error("compute trigger failed ({status})")]
    ComputeTrigger { status: u16, body: Value },

    #[error("results not ready after {attempts} poll attempts")]
    ResultTimeout { attempts: u32 },

    #[error("scan cancelled")]
    Cancelled,
}

impl ScanError {
    /// HTTP-style status surfaced to callers.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => STATUS_BAD_REQUEST,
            Self::ResultTimeout { .. } => STATUS_GATEWAY_TIMEOUT,
            Self::Cancelled => STATUS_CLIENT_CLOSED,
            _ => STATUS_INTERNAL,
        }
    }

    /// Status reported by the vendor or storage, when the failure came from one.
    pub fn vendor_status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. }
            | Self::StorageUpload { status, .. }
            | Self::ComputeTrigger { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a fresh attempt of the same request may succeed: 5xx, 429 and
    /// transport failures. Nothing in the engine retries on this; it is for
    /// callers deciding on a top-level retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { status, .. } => *status >= 500 || *status == 429,
            Self::Transport { .. } => true,
            _ => false,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        let details = match self {
            Self::Configuration { missing } => Some(json!({ "missing": missing })),
            Self::Remote { status, body } | Self::ComputeTrigger { status, body } => {
                Some(json!({ "vendorStatus": status, "body": body }))
            }
            Self::StorageUpload { status, body } => {
                Some(json!({ "vendorStatus": status, "body": body }))
            }
            Self::Transport { url, source } => {
                Some(json!({ "url": url, "cause": source.to_string() }))
            }
            Self::ClientSetup(source) => Some(json!({ "cause": source.to_string() })),
            Self::SubjectCreation { body } => Some(json!({ "body": body })),
            Self::UploadInit { missing, body } => Some(json!({ "missing": missing, "body": body })),
            Self::ResultTimeout { attempts } => Some(json!({ "attempts": attempts })),
            Self::InvalidInput(_) | Self::Cancelled => None,
        };
        ApiError {
            status: self.status(),
            error: self.to_string(),
            details,
        }
    }
}

/// Caller-facing error object: serialises as `{error, details?}`; the status
/// travels alongside for the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{error} ({status})")]
pub struct ApiError {
    #[serde(skip)]
    pub status: u16,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_BAD_REQUEST,
            error: message.into(),
            details: None,
        }
    }
}

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        err.to_api_error()
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
