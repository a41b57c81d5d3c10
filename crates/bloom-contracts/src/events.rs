use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One step of a scan worth auditing. Never carries image bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    ScanStarted {
        subject_name: String,
        bytes: usize,
    },
    SubjectCreated {
        subject_id: String,
    },
    UploadInitiated {
        batch_id: String,
        image_id: Option<String>,
    },
    ImageUploaded {
        bytes: usize,
        sha256: String,
    },
    ComputeTriggered {
        batch_id: String,
    },
    PollAttempt {
        attempt: u32,
        complete: bool,
    },
    ResultsReady {
        batch_id: String,
    },
    ScanFailed {
        error: String,
        status: u16,
        vendor_status: Option<u16>,
    },
}

impl ScanEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScanStarted { .. } => "scan_started",
            Self::SubjectCreated { .. } => "subject_created",
            Self::UploadInitiated { .. } => "upload_initiated",
            Self::ImageUploaded { .. } => "image_uploaded",
            Self::ComputeTriggered { .. } => "compute_triggered",
            Self::PollAttempt { .. } => "poll_attempt",
            Self::ResultsReady { .. } => "results_ready",
            Self::ScanFailed { .. } => "scan_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ResultsReady { .. } | Self::ScanFailed { .. })
    }
}

/// One line of the log. `scan_id`, `seq` and `ts` are stamped by the log
/// itself; callers only choose the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEventRecord {
    pub scan_id: String,
    pub seq: u64,
    pub ts: String,
    #[serde(flatten)]
    pub event: ScanEvent,
}

/// Append-only JSONL audit trail for one scan.
///
/// Lines are numbered from 0 in write order. The file is opened on the first
/// append; clones share the handle, so stages running on different threads
/// never interleave partial lines.
#[derive(Debug, Clone)]
pub struct ScanEventLog {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    scan_id: String,
    writer: Mutex<Writer>,
}

#[derive(Debug, Default)]
struct Writer {
    file: Option<File>,
    next_seq: u64,
}

impl ScanEventLog {
    pub fn new(path: impl Into<PathBuf>, scan_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                scan_id: scan_id.into(),
                writer: Mutex::new(Writer::default()),
            }),
        }
    }

    /// Opens a log under a fresh UUID v4 scan id.
    pub fn with_random_id(path: impl Into<PathBuf>) -> Self {
        Self::new(path, uuid::Uuid::new_v4().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn scan_id(&self) -> &str {
        &self.shared.scan_id
    }

    /// Appends one event. A sequence number is only consumed when the line
    /// reaches the file.
    pub fn append(&self, event: ScanEvent) -> anyhow::Result<ScanEventRecord> {
        let mut writer = self
            .shared
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("scan event log lock poisoned"))?;
        let record = ScanEventRecord {
            scan_id: self.shared.scan_id.clone(),
            seq: writer.next_seq,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if writer.file.is_none() {
            writer.file = Some(self.open()?);
        }
        if let Some(file) = writer.file.as_mut() {
            if let Err(err) = file.write_all(line.as_bytes()) {
                writer.file = None;
                return Err(err).with_context(|| {
                    format!("failed appending to {}", self.shared.path.display())
                });
            }
        }
        writer.next_seq += 1;
        Ok(record)
    }

    /// Like [`append`](Self::append), but a failure is only logged. The audit
    /// trail must never abort a scan.
    pub fn record(&self, event: ScanEvent) {
        let kind = event.kind();
        if let Err(err) = self.append(event) {
            tracing::warn!(
                event = kind,
                path = %self.shared.path.display(),
                "failed to append scan event: {err:#}"
            );
        }
    }

    fn open(&self) -> anyhow::Result<File> {
        let path = &self.shared.path;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed opening scan event log {}", path.display()))
    }
}

/// Reads a log back. Blank lines are skipped; any other malformed line is an
/// error naming its line number.
pub fn read_scan_events(path: &Path) -> anyhow::Result<Vec<ScanEventRecord>> {
    let file =
        File::open(path).with_context(|| format!("failed opening {}", path.display()))?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{} is not a scan event", path.display(), index + 1))?;
        records.push(record);
    }
    Ok(records)
}
