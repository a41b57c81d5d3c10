use std::sync::Arc;

use bloom_contracts::events::{ScanEvent, ScanEventLog};
use bloom_contracts::metrics::{AlgorithmDictionary, Metric, MetricNormalizer};
use bloom_contracts::routine::{
    recover_routine, RecoveredRoutine, RecoverySource, RoutineDocument, RoutineRequest,
};
use bloom_contracts::scan::{ScanOutcome, ScanRequest};

use crate::client::InferenceClient;
use crate::config::BloomConfig;
use crate::dictionary::VendorAlgorithmSource;
use crate::error::{ApiError, ScanError};
use crate::generator::{build_routine_prompt, GeminiTextGenerator, TextGenerator};
use crate::pipeline::{ImagePayload, UploadPipeline};
use crate::poller::{CancelToken, PollSettings, ResultPoller};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Per-call knobs for a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions<'a> {
    pub cancel: Option<&'a CancelToken>,
    pub events: Option<&'a ScanEventLog>,
    /// Overrides the configured poll settings.
    pub poll: Option<PollSettings>,
}

/// The two caller-facing entry points: scan analysis and routine
/// recommendation. Shareable across threads; one scan runs sequentially on
/// the calling thread.
pub struct BloomService {
    config: BloomConfig,
    transport: Arc<dyn HttpTransport>,
    normalizer: MetricNormalizer,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl BloomService {
    pub fn from_env() -> Result<Self, ScanError> {
        let config = BloomConfig::from_env();
        let transport = ReqwestTransport::new(config.http_timeout)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn new(config: BloomConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let normalizer = match config.vendor() {
            Ok(vendor) => {
                let client = InferenceClient::new(vendor, Arc::clone(&transport));
                MetricNormalizer::new(Arc::new(AlgorithmDictionary::new(
                    VendorAlgorithmSource::new(client),
                )))
            }
            Err(_) => MetricNormalizer::without_dictionary(),
        };
        let generator = config.generator().ok().map(|generator| {
            Arc::new(GeminiTextGenerator::new(
                generator.clone(),
                Arc::clone(&transport),
            )) as Arc<dyn TextGenerator>
        });
        Self {
            config,
            transport,
            normalizer,
            generator,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_normalizer(mut self, normalizer: MetricNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &BloomConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &MetricNormalizer {
        &self.normalizer
    }

    pub fn analyze_scan(&self, request: &ScanRequest) -> Result<ScanOutcome, ApiError> {
        self.analyze_scan_with(request, ScanOptions::default())
    }

    pub fn analyze_scan_with_cancel(
        &self,
        request: &ScanRequest,
        cancel: &CancelToken,
    ) -> Result<ScanOutcome, ApiError> {
        self.analyze_scan_with(
            request,
            ScanOptions {
                cancel: Some(cancel),
                ..ScanOptions::default()
            },
        )
    }

    pub fn analyze_scan_with(
        &self,
        request: &ScanRequest,
        options: ScanOptions<'_>,
    ) -> Result<ScanOutcome, ApiError> {
        self.run_scan(request, &options).map_err(|err| {
            tracing::warn!(status = err.status(), "scan failed: {err}");
            if let Some(events) = options.events {
                events.record(ScanEvent::ScanFailed {
                    error: err.to_string(),
                    status: err.status(),
                    vendor_status: err.vendor_status(),
                });
            }
            ApiError::from(err)
        })
    }

    /// The scan with its typed error, for callers that want to branch on it.
    pub fn run_scan(
        &self,
        request: &ScanRequest,
        options: &ScanOptions<'_>,
    ) -> Result<ScanOutcome, ScanError> {
        let encoded = request
            .image()
            .ok_or_else(|| ScanError::InvalidInput("base64Image is required".to_string()))?;
        let image = ImagePayload::from_encoded(encoded)?;
        let vendor = self.config.vendor()?;
        if options.cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(ScanError::Cancelled);
        }

        tracing::info!(bytes = image.len(), "scan started");
        if let Some(events) = options.events {
            events.record(ScanEvent::ScanStarted {
                subject_name: request.display_name().to_string(),
                bytes: image.len(),
            });
        }

        let client = InferenceClient::new(vendor, Arc::clone(&self.transport));
        let ids = UploadPipeline::new(&client, vendor)
            .with_events(options.events)
            .run(&image, request.subject_name())?;

        let settings = options.poll.as_ref().unwrap_or(&self.config.poll);
        let mut poller = ResultPoller::new(&client, settings).with_events(options.events);
        if let Some(cancel) = options.cancel {
            poller = poller.with_cancel(cancel);
        }
        let raw_results = poller.poll(&ids)?;

        if let Some(events) = options.events {
            events.record(ScanEvent::ResultsReady {
                batch_id: ids.batch_id.clone(),
            });
        }
        Ok(ScanOutcome { ids, raw_results })
    }

    pub fn normalize(&self, outcome: &ScanOutcome) -> Vec<Metric> {
        self.normalizer.normalize(&outcome.raw_result_list())
    }

    pub fn recommend_routine(&self, request: &RoutineRequest) -> Result<RoutineDocument, ApiError> {
        self.draft_routine(request).map(|recovered| recovered.document)
    }

    /// Like [`recommend_routine`](Self::recommend_routine), keeping how the
    /// document was obtained.
    pub fn draft_routine(&self, request: &RoutineRequest) -> Result<RecoveredRoutine, ApiError> {
        if request.skin_metrics.as_deref().unwrap_or_default().is_empty() {
            return Err(ApiError::bad_request("skinMetrics are required"));
        }
        let generator = self.generator()?;
        let known_ids = request.metric_ids();
        let prompt = build_routine_prompt(request);

        let recovered = match generator.generate(&prompt) {
            Ok(text) => recover_routine(&text, &known_ids),
            Err(err) => {
                tracing::warn!(generator = generator.name(), "routine generation failed: {err:#}");
                RecoveredRoutine {
                    document: RoutineDocument::fallback(),
                    source: RecoverySource::Fallback,
                }
            }
        };
        match recovered.source {
            RecoverySource::Direct => {}
            RecoverySource::Repaired => tracing::info!("routine recovered from a partial response"),
            RecoverySource::Fallback => tracing::warn!("routine fell back to the default document"),
        }
        Ok(recovered)
    }

    fn generator(&self) -> Result<&Arc<dyn TextGenerator>, ScanError> {
        match &self.generator {
            Some(generator) => Ok(generator),
            None => Err(self
                .config
                .generator()
                .err()
                .unwrap_or_else(|| ScanError::Configuration {
                    missing: vec!["GEMINI_API_KEY".to_string()],
                })),
        }
    }
}

impl std::fmt::Debug for BloomService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomService")
            .field("config", &self.config)
            .field("generator", &self.generator.as_ref().map(|generator| generator.name()))
            .finish_non_exhaustive()
    }
}
