use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
pub use reqwest::Method;
use serde_json::Value;

use crate::error::{BoxError, ScanError};

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body parsed as JSON, when it is JSON.
    pub fn json_body(&self) -> Option<Value> {
        self.body
            .as_deref()
            .and_then(|bytes| serde_json::from_slice(bytes).ok())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One HTTP exchange. The production implementation is [`ReqwestTransport`];
/// tests script replies without a network.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpReply, BoxError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ScanError> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(ScanError::ClientSetup)?;
        Ok(Self { http })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpReply, BoxError> {
        let mut builder = self.http.request(request.method, request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send()?;
        let status = response.status().as_u16();
        let body = response.bytes()?.to_vec();
        Ok(HttpReply { status, body })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{HttpReply, HttpRequest, Method};

    #[test]
    fn request_builder_collects_headers_and_body() {
        let request = HttpRequest::new(Method::POST, "https://vendor/api")
            .header("Content-Type", "application/json")
            .body(br#"{"app_args":{}}"#.to_vec());
        assert_eq!(request.header_value("content-type"), Some("application/json"));
        assert_eq!(request.json_body(), Some(json!({"app_args": {}})));
        assert!(HttpRequest::new(Method::GET, "x").json_body().is_none());
    }

    #[test]
    fn reply_success_range() {
        assert!(HttpReply::new(204, Vec::new()).is_success());
        assert!(!HttpReply::new(302, Vec::new()).is_success());
        assert_eq!(HttpReply::new(500, "boom").text(), "boom");
    }
}
