pub mod client;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod poller;
pub mod service;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{InferenceClient, VendorResponse};
pub use config::{BloomConfig, GeneratorConfig, VendorConfig};
pub use error::{ApiError, ScanError};
pub use poller::{CancelToken, PollSettings, PollState};
pub use service::{BloomService, ScanOptions};
pub use transport::{HttpTransport, ReqwestTransport};
