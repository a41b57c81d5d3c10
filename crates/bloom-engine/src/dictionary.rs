use anyhow::Context;
use bloom_contracts::metrics::{AlgorithmInfo, AlgorithmSource};

use crate::client::InferenceClient;

pub const ALGORITHMS_PATH: &str = "/api/v1/dicts/algorithms/";

/// Reads the vendor's algorithm dictionary over the inference client.
#[derive(Debug, Clone)]
pub struct VendorAlgorithmSource {
    client: InferenceClient,
}

impl VendorAlgorithmSource {
    pub fn new(client: InferenceClient) -> Self {
        Self { client }
    }
}

impl AlgorithmSource for VendorAlgorithmSource {
    fn fetch(&self) -> anyhow::Result<Vec<AlgorithmInfo>> {
        let response = self
            .client
            .get(ALGORITHMS_PATH)
            .context("vendor algorithm dictionary request failed")?;
        let entries = AlgorithmInfo::list_from_payload(&response.body);
        tracing::debug!(entries = entries.len(), "algorithm dictionary fetched");
        Ok(entries)
    }
}
