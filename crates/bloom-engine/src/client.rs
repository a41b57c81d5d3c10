use std::sync::Arc;

use serde_json::Value;

use crate::config::VendorConfig;
use crate::error::ScanError;
use crate::transport::{HttpReply, HttpRequest, HttpTransport, Method};

/// A successful vendor reply.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorResponse {
    pub status: u16,
    pub body: Value,
}

/// Authenticated access to the vendor REST API. Holds configuration and a
/// shared transport only, so clones are cheap and usable from any thread.
#[derive(Clone)]
pub struct InferenceClient {
    api_base: String,
    api_key: String,
    transport: Arc<dyn HttpTransport>,
}

impl InferenceClient {
    pub fn new(config: &VendorConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            transport,
        }
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str) -> Result<VendorResponse, ScanError> {
        self.request(Method::GET, path, None)
    }

    pub fn post(&self, path: &str, body: &Value) -> Result<VendorResponse, ScanError> {
        self.request(Method::POST, path, Some(body))
    }

    pub fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<VendorResponse, ScanError> {
        let url = self.url_for(path);
        let mut request = HttpRequest::new(method, url.clone())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body.to_string().into_bytes());
        }

        let reply = self
            .transport
            .send(request)
            .map_err(|source| ScanError::Transport { url, source })?;
        let status = reply.status;
        let body = parse_body(&reply);
        if !reply.is_success() {
            tracing::debug!(status, path, "vendor request rejected");
            return Err(ScanError::Remote { status, body });
        }
        Ok(VendorResponse { status, body })
    }
}

impl std::fmt::Debug for InferenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

/// JSON when the body is JSON, the raw text otherwise, `Null` when empty.
fn parse_body(reply: &HttpReply) -> Value {
    let text = reply.text();
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}
