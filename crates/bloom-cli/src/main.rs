use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bloom_contracts::events::ScanEventLog;
use bloom_contracts::metrics::Metric;
use bloom_contracts::routine::RoutineRequest;
use bloom_contracts::scan::ScanRequest;
use bloom_engine::{ApiError, BloomService, ScanOptions};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(name = "bloom", version, about = "Skin scan analysis and routine recommendations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload one face image, wait for the analysis and print normalized metrics.
    Scan(ScanArgs),
    /// Normalize a saved vendor results payload.
    Normalize(NormalizeArgs),
    /// Recommend a skincare routine from normalized metrics.
    Routine(RoutineArgs),
}

#[derive(Debug, Parser)]
struct ScanArgs {
    #[arg(long, required_unless_present = "base64_file", conflicts_with = "base64_file")]
    image: Option<PathBuf>,
    #[arg(long)]
    base64_file: Option<PathBuf>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    max_attempts: Option<u32>,
    #[arg(long)]
    delay_ms: Option<u64>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct NormalizeArgs {
    #[arg(long)]
    results: PathBuf,
}

#[derive(Debug, Parser)]
struct RoutineArgs {
    #[arg(long)]
    metrics: PathBuf,
    #[arg(long)]
    overall_health: Option<f64>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(output) => {
            println!("{output}");
            std::process::exit(0);
        }
        Err(err) => {
            tracing::error!("bloom failed: {err:#}");
            println!("{}", error_json(&err));
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<Value> {
    let cli = Cli::parse();
    let service = BloomService::from_env().map_err(ApiError::from)?;
    match cli.command {
        Command::Scan(args) => run_scan(&service, args),
        Command::Normalize(args) => run_normalize(&service, args),
        Command::Routine(args) => run_routine(&service, args),
    }
}

fn run_scan(service: &BloomService, args: ScanArgs) -> Result<Value> {
    let encoded = match (&args.image, &args.base64_file) {
        (Some(path), _) => image_data_uri(path)?,
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed reading base64 image {}", path.display()))?,
        (None, None) => String::new(),
    };
    let mut request = ScanRequest::new(encoded);
    if let Some(name) = args.name {
        request = request.with_subject_name(name);
    }

    let mut poll = service.config().poll.clone();
    if let Some(max_attempts) = args.max_attempts {
        poll.max_attempts = max_attempts;
    }
    if let Some(delay_ms) = args.delay_ms {
        poll.delay = Duration::from_millis(delay_ms);
    }
    let events = args.events.map(ScanEventLog::with_random_id);
    if let Some(events) = &events {
        tracing::info!(scan_id = events.scan_id(), path = %events.path().display(), "writing scan events");
    }

    let options = ScanOptions {
        events: events.as_ref(),
        poll: Some(poll),
        ..ScanOptions::default()
    };
    let outcome = service.analyze_scan_with(&request, options)?;
    let metrics = service.normalize(&outcome);
    Ok(json!({
        "ids": outcome.ids,
        "rawResults": outcome.raw_results,
        "metrics": metrics,
    }))
}

fn run_normalize(service: &BloomService, args: NormalizeArgs) -> Result<Value> {
    let payload = read_json(&args.results)?;
    let metrics = service.normalizer().normalize(&raw_results_from(payload));
    Ok(serde_json::to_value(metrics)?)
}

fn run_routine(service: &BloomService, args: RoutineArgs) -> Result<Value> {
    let payload = read_json(&args.metrics)?;
    let request = RoutineRequest {
        skin_metrics: Some(metrics_from(payload)?),
        overall_health: args.overall_health,
    };
    let document = service.recommend_routine(&request)?;
    Ok(serde_json::to_value(document)?)
}

/// Reads an image file and wraps it as a data URI, sniffing the mime type.
fn image_data_uri(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("failed reading image {}", path.display()))?;
    let mime = image::guess_format(&bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    tracing::debug!(bytes = bytes.len(), mime, "image loaded");
    Ok(format!("data:{mime};base64,{}", BASE64.encode(&bytes)))
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Accepts a bare results payload or the output of `bloom scan`.
fn raw_results_from(payload: Value) -> Vec<Value> {
    let payload = match payload {
        Value::Object(mut obj) if obj.contains_key("rawResults") => {
            obj.remove("rawResults").unwrap_or(Value::Null)
        }
        other => other,
    };
    match payload {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Accepts a metric array or the output of `bloom scan`.
fn metrics_from(payload: Value) -> Result<Vec<Metric>> {
    let payload = match payload {
        Value::Object(mut obj) if obj.contains_key("metrics") => {
            obj.remove("metrics").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(payload).context("metrics must be a list of {id, label, value}")
}

fn error_json(err: &anyhow::Error) -> Value {
    match err.downcast_ref::<ApiError>() {
        Some(api) => serde_json::to_value(api).unwrap_or_else(|_| json!({"error": api.error})),
        None => json!({ "error": format!("{err:#}") }),
    }
}
