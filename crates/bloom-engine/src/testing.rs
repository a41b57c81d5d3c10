//! Scripted transport shared by the engine's unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;

use crate::config::VendorConfig;
use crate::error::BoxError;
use crate::transport::{HttpReply, HttpRequest, HttpTransport, Method};

type ScriptedReply = Result<HttpReply, String>;

struct Route {
    method: Method,
    url_fragment: String,
    replies: VecDeque<ScriptedReply>,
}

/// Replies are matched by method and URL substring, in registration order.
/// Each route hands out its queued replies in turn and then keeps repeating
/// the last one.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    log: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(self, method: Method, url_fragment: &str, status: u16, body: Value) -> Self {
        self.push(method, url_fragment, Ok(HttpReply::new(status, body.to_string())))
    }

    pub(crate) fn reply_text(self, method: Method, url_fragment: &str, status: u16, body: &str) -> Self {
        self.push(method, url_fragment, Ok(HttpReply::new(status, body)))
    }

    pub(crate) fn fail(self, method: Method, url_fragment: &str, message: &str) -> Self {
        self.push(method, url_fragment, Err(message.to_string()))
    }

    fn push(self, method: Method, url_fragment: &str, reply: ScriptedReply) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            match routes
                .iter_mut()
                .find(|route| route.method == method && route.url_fragment == url_fragment)
            {
                Some(route) => route.replies.push_back(reply),
                None => routes.push(Route {
                    method,
                    url_fragment: url_fragment.to_string(),
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub(crate) fn count(&self, method: &Method, url_fragment: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| &request.method == method && request.url.contains(url_fragment))
            .count()
    }
}

impl HttpTransport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpReply, BoxError> {
        if let Ok(mut log) = self.log.lock() {
            log.push(request.clone());
        }
        let mut routes = self
            .routes
            .lock()
            .map_err(|_| "scripted transport lock poisoned")?;
        let route = routes
            .iter_mut()
            .find(|route| route.method == request.method && request.url.contains(&route.url_fragment))
            .ok_or_else(|| format!("no scripted reply for {} {}", request.method, request.url))?;
        let reply = if route.replies.len() > 1 {
            route.replies.pop_front()
        } else {
            route.replies.front().cloned()
        };
        match reply {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(message.into()),
            None => Err(format!("scripted route exhausted for {}", request.url).into()),
        }
    }
}

pub(crate) fn vendor_config() -> VendorConfig {
    VendorConfig {
        api_base: "https://vendor.test".to_string(),
        api_key: "test-key".to_string(),
        company_id: "company-1".to_string(),
        dataset_id: "dataset-1".to_string(),
    }
}
