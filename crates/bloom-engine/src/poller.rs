use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bloom_contracts::events::{ScanEvent, ScanEventLog};
use bloom_contracts::metrics::MODERN_FAMILY;
use bloom_contracts::scan::ScanIdentifiers;
use serde_json::Value;

use crate::client::InferenceClient;
use crate::error::ScanError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 45;
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(2000);

const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub max_attempts: u32,
    /// Fixed gap between two attempts. No backoff.
    pub delay: Duration,
    /// Algorithm family whose completion flag ends polling.
    pub family: String,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_POLL_DELAY,
            family: MODERN_FAMILY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Polling { attempt: u32 },
    Complete(Value),
    TimedOut { attempts: u32 },
}

/// Cooperative cancellation flag shared between a scan and whoever may
/// abandon it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps in short slices; returns `false` as soon as the token is
    /// cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Waits for a triggered batch to finish computing.
pub struct ResultPoller<'a> {
    client: &'a InferenceClient,
    settings: &'a PollSettings,
    cancel: Option<&'a CancelToken>,
    events: Option<&'a ScanEventLog>,
}

impl<'a> ResultPoller<'a> {
    pub fn new(client: &'a InferenceClient, settings: &'a PollSettings) -> Self {
        Self {
            client,
            settings,
            cancel: None,
            events: None,
        }
    }

    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_events(mut self, events: Option<&'a ScanEventLog>) -> Self {
        self.events = events;
        self
    }

    /// Polls until the batch completes. Timing out is an error here.
    pub fn poll(&self, ids: &ScanIdentifiers) -> Result<Value, ScanError> {
        match self.run(ids)? {
            PollState::Complete(payload) => Ok(payload),
            PollState::TimedOut { attempts } => Err(ScanError::ResultTimeout { attempts }),
            PollState::Polling { attempt } => Err(ScanError::ResultTimeout { attempts: attempt }),
        }
    }

    /// Runs the loop to a terminal state (`Complete` or `TimedOut`).
    /// Vendor errors end the loop immediately.
    pub fn run(&self, ids: &ScanIdentifiers) -> Result<PollState, ScanError> {
        let max_attempts = self.settings.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            self.ensure_not_cancelled()?;
            if let PollState::Complete(payload) = self.check(ids, attempt)? {
                tracing::info!(batch_id = %ids.batch_id, attempt, "results ready");
                return Ok(PollState::Complete(payload));
            }
            if attempt < max_attempts {
                let keep_going = match self.cancel {
                    Some(cancel) => cancel.sleep(self.settings.delay),
                    None => {
                        thread::sleep(self.settings.delay);
                        true
                    }
                };
                if !keep_going {
                    return Err(ScanError::Cancelled);
                }
            }
        }
        tracing::warn!(batch_id = %ids.batch_id, max_attempts, "results polling timed out");
        Ok(PollState::TimedOut {
            attempts: max_attempts,
        })
    }

    /// One GET of the batch results.
    pub fn check(&self, ids: &ScanIdentifiers, attempt: u32) -> Result<PollState, ScanError> {
        let path = results_path(ids);
        let response = self.client.get(&path)?;
        let complete = is_batch_complete(&response.body, &self.settings.family);
        tracing::debug!(batch_id = %ids.batch_id, attempt, complete, "polled results");
        if let Some(events) = self.events {
            events.record(ScanEvent::PollAttempt { attempt, complete });
        }
        if complete {
            Ok(PollState::Complete(response.body))
        } else {
            Ok(PollState::Polling { attempt })
        }
    }

    fn ensure_not_cancelled(&self) -> Result<(), ScanError> {
        match self.cancel {
            Some(cancel) if cancel.is_cancelled() => Err(ScanError::Cancelled),
            _ => Ok(()),
        }
    }
}

pub(crate) fn results_path(ids: &ScanIdentifiers) -> String {
    format!(
        "/api/v3/companies/{}/batches/{}/results/",
        ids.company_id, ids.batch_id
    )
}

/// True when `family.all_algorithms_calculated` is `true`, on the payload
/// itself or on any element of an array payload.
pub fn is_batch_complete(payload: &Value, family: &str) -> bool {
    match payload {
        Value::Array(rows) => rows.iter().any(|row| is_batch_complete(row, family)),
        Value::Object(obj) => obj
            .get(family)
            .and_then(|block| block.get("all_algorithms_calculated"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use bloom_contracts::scan::ScanIdentifiers;
    use serde_json::json;

    use super::{is_batch_complete, CancelToken, PollSettings, PollState, ResultPoller};
    use crate::client::InferenceClient;
    use crate::error::ScanError;
    use crate::testing::{vendor_config, ScriptedTransport};
    use crate::transport::Method;

    fn ids() -> ScanIdentifiers {
        ScanIdentifiers {
            company_id: "company-1".to_string(),
            dataset_id: "dataset-1".to_string(),
            subject_id: "subject-1".to_string(),
            batch_id: "batch-1".to_string(),
            image_id: None,
        }
    }

    fn fast(max_attempts: u32) -> PollSettings {
        PollSettings {
            max_attempts,
            delay: Duration::from_millis(10),
            ..PollSettings::default()
        }
    }

    fn pending() -> serde_json::Value {
        json!({"face_skin_metrics_3": {"all_algorithms_calculated": false}})
    }

    #[test]
    fn completion_flag_detection() {
        assert!(is_batch_complete(
            &json!({"face_skin_metrics_3": {"all_algorithms_calculated": true}}),
            "face_skin_metrics_3"
        ));
        assert!(is_batch_complete(
            &json!([{"other": 1}, {"face_skin_metrics_3": {"all_algorithms_calculated": true}}]),
            "face_skin_metrics_3"
        ));
        assert!(!is_batch_complete(&pending(), "face_skin_metrics_3"));
        assert!(!is_batch_complete(
            &json!({"face_skin_metrics_3": {"all_algorithms_calculated": "true"}}),
            "face_skin_metrics_3"
        ));
        assert!(!is_batch_complete(&json!([]), "face_skin_metrics_3"));
    }

    #[test]
    fn completes_on_third_attempt() -> anyhow::Result<()> {
        let done = json!({"face_skin_metrics_3": {"all_algorithms_calculated": true, "parameters": {}}});
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::GET, "/batches/batch-1/results/", 200, pending())
                .reply(Method::GET, "/batches/batch-1/results/", 200, pending())
                .reply(Method::GET, "/batches/batch-1/results/", 200, done.clone()),
        );
        let client = InferenceClient::new(&vendor_config(), transport.clone());
        let settings = fast(5);

        let payload = ResultPoller::new(&client, &settings).poll(&ids())?;
        assert_eq!(payload, done);
        assert_eq!(transport.count(&Method::GET, "/results/"), 3);
        Ok(())
    }

    #[test]
    fn times_out_after_max_attempts() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::GET,
            "/results/",
            200,
            pending(),
        ));
        let client = InferenceClient::new(&vendor_config(), transport.clone());
        let settings = fast(3);

        let started = Instant::now();
        let state = ResultPoller::new(&client, &settings).run(&ids())?;
        let elapsed = started.elapsed();
        assert_eq!(state, PollState::TimedOut { attempts: 3 });
        // Two 10ms gaps between three attempts, none after the last.
        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
        assert_eq!(transport.count(&Method::GET, "/results/"), 3);

        match ResultPoller::new(&client, &settings).poll(&ids()) {
            Err(err @ ScanError::ResultTimeout { attempts: 3 }) => assert_eq!(err.status(), 504),
            other => panic!("unexpected: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn vendor_errors_end_polling_immediately() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(Method::GET, "/results/", 200, pending())
                .reply(Method::GET, "/results/", 404, json!({"detail": "Not found."})),
        );
        let client = InferenceClient::new(&vendor_config(), transport.clone());
        let settings = fast(10);

        match ResultPoller::new(&client, &settings).poll(&ids()) {
            Err(ScanError::Remote { status: 404, .. }) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(transport.count(&Method::GET, "/results/"), 2);
    }

    #[test]
    fn cancellation_stops_before_the_next_attempt() {
        let transport = Arc::new(ScriptedTransport::new().reply(
            Method::GET,
            "/results/",
            200,
            pending(),
        ));
        let client = InferenceClient::new(&vendor_config(), transport.clone());
        let settings = PollSettings {
            max_attempts: 100,
            delay: Duration::from_secs(5),
            ..PollSettings::default()
        };
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            remote.cancel();
        });

        let started = Instant::now();
        let outcome = ResultPoller::new(&client, &settings)
            .with_cancel(&cancel)
            .poll(&ids());
        let _ = canceller.join();

        assert!(matches!(outcome, Err(ScanError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(transport.count(&Method::GET, "/results/"), 1);
    }

    #[test]
    fn pre_cancelled_token_makes_no_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = InferenceClient::new(&vendor_config(), transport.clone());
        let settings = fast(3);
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = ResultPoller::new(&client, &settings)
            .with_cancel(&cancel)
            .poll(&ids());
        assert!(matches!(outcome, Err(ScanError::Cancelled)));
        assert!(transport.requests().is_empty());
    }
}
