use std::env;
use std::time::Duration;

use crate::error::ScanError;
use crate::poller::PollSettings;

pub const DEFAULT_VENDOR_API_BASE: &str = "https://saas.haut.ai";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Credentials and tenancy for the skin-analysis vendor.
#[derive(Clone, PartialEq, Eq)]
pub struct VendorConfig {
    pub api_base: String,
    pub api_key: String,
    pub company_id: String,
    pub dataset_id: String,
}

impl VendorConfig {
    pub fn from_env() -> Result<Self, Vec<String>> {
        Self::from_lookup(&non_empty_env)
    }

    /// Reads `HAUT_*` settings; on failure returns every missing key.
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, Vec<String>> {
        let mut missing = Vec::new();
        let mut required = |key: &str| {
            let value = lookup(key);
            if value.is_none() {
                missing.push(key.to_string());
            }
            value.unwrap_or_default()
        };
        let api_key = required("HAUT_API_KEY");
        let company_id = required("HAUT_COMPANY_ID");
        let dataset_id = required("HAUT_DATASET_ID");
        if !missing.is_empty() {
            return Err(missing);
        }
        Ok(Self {
            api_base: api_base(lookup, "HAUT_API_BASE", DEFAULT_VENDOR_API_BASE),
            api_key,
            company_id,
            dataset_id,
        })
    }
}

impl std::fmt::Debug for VendorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &"<redacted>")
            .field("company_id", &self.company_id)
            .field("dataset_id", &self.dataset_id)
            .finish()
    }
}

/// Settings of the generative text model used for routines.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

impl GeneratorConfig {
    pub fn from_env() -> Result<Self, Vec<String>> {
        Self::from_lookup(&non_empty_env)
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self, Vec<String>> {
        let Some(api_key) = lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")) else {
            return Err(vec!["GEMINI_API_KEY".to_string()]);
        };
        Ok(Self {
            api_base: api_base(lookup, "GEMINI_API_BASE", DEFAULT_GEMINI_API_BASE),
            api_key,
            model: lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
        })
    }
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

/// Whole-process configuration. Missing credentials do not fail loading;
/// they are reported by [`vendor`](Self::vendor) / [`generator`](Self::generator)
/// at first use, and listed up front by [`missing`](Self::missing).
#[derive(Debug, Clone)]
pub struct BloomConfig {
    vendor: Result<VendorConfig, Vec<String>>,
    generator: Result<GeneratorConfig, Vec<String>>,
    pub poll: PollSettings,
    pub http_timeout: Duration,
}

impl BloomConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut poll = PollSettings::default();
        if let Some(max_attempts) = parse_number::<u32>(&lookup, "BLOOM_POLL_MAX_ATTEMPTS") {
            poll.max_attempts = max_attempts;
        }
        if let Some(delay_ms) = parse_number::<u64>(&lookup, "BLOOM_POLL_DELAY_MS") {
            poll.delay = Duration::from_millis(delay_ms);
        }
        let http_timeout = parse_number::<u64>(&lookup, "BLOOM_HTTP_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);

        Self {
            vendor: VendorConfig::from_lookup(&lookup),
            generator: GeneratorConfig::from_lookup(&lookup),
            poll,
            http_timeout,
        }
    }

    pub fn with_vendor(mut self, vendor: VendorConfig) -> Self {
        self.vendor = Ok(vendor);
        self
    }

    pub fn with_generator(mut self, generator: GeneratorConfig) -> Self {
        self.generator = Ok(generator);
        self
    }

    pub fn with_poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn vendor(&self) -> Result<&VendorConfig, ScanError> {
        self.vendor
            .as_ref()
            .map_err(|missing| ScanError::Configuration {
                missing: missing.clone(),
            })
    }

    pub fn generator(&self) -> Result<&GeneratorConfig, ScanError> {
        self.generator
            .as_ref()
            .map_err(|missing| ScanError::Configuration {
                missing: missing.clone(),
            })
    }

    /// Every required key that is currently unset.
    pub fn missing(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if let Err(keys) = &self.vendor {
            missing.extend(keys.iter().cloned());
        }
        if let Err(keys) = &self.generator {
            missing.extend(keys.iter().cloned());
        }
        missing
    }
}

impl Default for BloomConfig {
    /// Nothing configured; every credential is reported missing.
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn api_base(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
