//! Run bundles: on-disk logging for matrix runs.
//!
//! A bundle is one directory per run holding:
//! - `meta.json` with run metadata
//! - `events.jsonl` with one structured lifecycle event per line
//!
//! Events open with `run_start` and close with `run_end`; everything between
//! (`setup`, `step`, `assertion`, `teardown`) carries the suite id and test
//! name in its payload.
//!
//! [`init_tracing`] and [`init_test_logging`] install the `tracing`
//! subscriber for binaries and tests respectively.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use ormtest_error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const LOG_SCHEMA_VERSION: u32 = 1;

pub const REQUIRED_BUNDLE_FILES: [&str; 2] = ["meta.json", "events.jsonl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    RunStart,
    Setup,
    Step,
    Assertion,
    Teardown,
    RunEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMeta {
    pub schema_version: u32,
    pub matrix: String,
    pub suites: usize,
    pub harness_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    pub kind: LifecycleEventKind,
    pub status: Option<RunStatus>,
    pub step: u64,
    pub message: String,
    pub payload: BTreeMap<String, Value>,
}

/// Open run bundle; events are appended as they are emitted.
#[derive(Debug)]
pub struct RunBundle {
    root: PathBuf,
    events_path: PathBuf,
    next_step: u64,
}

impl RunBundle {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn emit_event(
        &mut self,
        kind: LifecycleEventKind,
        message: impl Into<String>,
        payload: BTreeMap<String, Value>,
    ) -> Result<()> {
        let event = RunEvent {
            kind,
            status: None,
            step: self.next_step,
            message: message.into(),
            payload,
        };
        self.next_step = self.next_step.saturating_add(1);
        self.write_event_line(&event)
    }

    /// Write an auxiliary JSON file inside the bundle.
    pub fn write_artifact_json<T: Serialize>(
        &self,
        relative_path: &str,
        value: &T,
    ) -> Result<PathBuf> {
        let artifact_path = self.root.join(relative_path);
        if let Some(parent) = artifact_path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_json_file(&artifact_path, value)?;
        Ok(artifact_path)
    }

    pub fn finish(self, status: RunStatus) -> Result<PathBuf> {
        let event = RunEvent {
            kind: LifecycleEventKind::RunEnd,
            status: Some(status),
            step: self.next_step,
            message: "run_end".to_owned(),
            payload: BTreeMap::new(),
        };
        self.write_event_line(&event)?;
        info!(
            root = %self.root.display(),
            status = ?status,
            "run bundle finalized"
        );
        Ok(self.root)
    }

    fn write_event_line(&self, event: &RunEvent) -> Result<()> {
        let encoded = serde_json::to_string(event).map_err(|err| {
            HarnessError::serialization(format!("failed to serialize run event: {err}"))
        })?;
        let mut file = OpenOptions::new().append(true).open(&self.events_path)?;
        writeln!(file, "{encoded}")?;
        Ok(())
    }
}

/// Payload helper: string fields keyed by name.
#[must_use]
pub fn payload<'a>(fields: impl IntoIterator<Item = (&'a str, String)>) -> BTreeMap<String, Value> {
    fields
        .into_iter()
        .map(|(key, value)| (key.to_owned(), Value::String(value)))
        .collect()
}

/// Create `<base_dir>/<matrix>-run`, write `meta.json` and emit `run_start`.
pub fn init_run_bundle(base_dir: &Path, matrix: &str, suites: usize) -> Result<RunBundle> {
    if matrix.trim().is_empty() {
        return Err(HarnessError::internal("matrix name must be non-empty"));
    }

    let root = base_dir.join(format!("{}-run", sanitize_segment(matrix)));
    fs::create_dir_all(&root)?;

    let meta = BundleMeta {
        schema_version: LOG_SCHEMA_VERSION,
        matrix: matrix.to_owned(),
        suites,
        harness_version: env!("CARGO_PKG_VERSION").to_owned(),
    };
    write_json_file(&root.join("meta.json"), &meta)?;

    let events_path = root.join("events.jsonl");
    fs::write(&events_path, b"")?;

    let mut bundle = RunBundle {
        root,
        events_path,
        next_step: 0,
    };
    bundle.emit_event(
        LifecycleEventKind::RunStart,
        "run_start",
        payload([("matrix", matrix.to_owned())]),
    )?;

    info!(
        matrix,
        suites,
        root = %bundle.root.display(),
        "run bundle initialized"
    );
    Ok(bundle)
}

/// Install a compact stderr subscriber filtered by `RUST_LOG`, falling back
/// to `default_directive` when unset.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init()
        .map_err(|err| HarnessError::internal(format!("tracing init failed: {err}")))
}

/// Test-friendly subscriber; safe to call from every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer().with_target(false))
        .try_init();
}

pub fn validate_required_files(bundle_root: &Path) -> Result<()> {
    let missing: Vec<&str> = REQUIRED_BUNDLE_FILES
        .iter()
        .copied()
        .filter(|name| !bundle_root.join(name).is_file())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    error!(
        bundle = %bundle_root.display(),
        missing_count = missing.len(),
        "missing required run bundle files"
    );
    Err(HarnessError::internal(format!(
        "missing required bundle files: {}",
        missing.join(", ")
    )))
}

pub fn validate_bundle_meta(bundle_root: &Path) -> Result<BundleMeta> {
    let bytes = fs::read(bundle_root.join("meta.json"))?;
    let meta: BundleMeta = serde_json::from_slice(&bytes)
        .map_err(|err| HarnessError::serialization(format!("meta.json parse failure: {err}")))?;

    if meta.schema_version != LOG_SCHEMA_VERSION {
        warn!(
            expected = LOG_SCHEMA_VERSION,
            found = meta.schema_version,
            "bundle schema version mismatch"
        );
        return Err(HarnessError::internal(format!(
            "unsupported schema version: expected {LOG_SCHEMA_VERSION}, got {}",
            meta.schema_version
        )));
    }
    if meta.matrix.is_empty() {
        return Err(HarnessError::internal("meta.json must include a matrix name"));
    }
    Ok(meta)
}

pub fn validate_events_jsonl(bundle_root: &Path) -> Result<Vec<RunEvent>> {
    let contents = fs::read_to_string(bundle_root.join("events.jsonl"))?;
    let mut events = Vec::new();

    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            return Err(HarnessError::internal(format!(
                "events.jsonl has empty line at {}",
                line_no + 1
            )));
        }
        let event: RunEvent = serde_json::from_str(line).map_err(|err| {
            HarnessError::serialization(format!(
                "events.jsonl parse failure at line {}: {err}",
                line_no + 1
            ))
        })?;
        if event.message.is_empty() {
            return Err(HarnessError::internal(format!(
                "events.jsonl has empty message at line {}",
                line_no + 1
            )));
        }
        events.push(event);
    }

    if events.is_empty() {
        return Err(HarnessError::internal(
            "events.jsonl must contain at least one event",
        ));
    }
    Ok(events)
}

/// Check files, metadata and event framing of a finished bundle.
pub fn validate_bundle(bundle_root: &Path) -> Result<Vec<RunEvent>> {
    validate_required_files(bundle_root)?;
    validate_bundle_meta(bundle_root)?;
    let events = validate_events_jsonl(bundle_root)?;

    if events.first().map(|event| event.kind) != Some(LifecycleEventKind::RunStart) {
        return Err(HarnessError::internal(
            "events.jsonl must start with a run_start event",
        ));
    }
    if events.last().map(|event| event.kind) != Some(LifecycleEventKind::RunEnd) {
        return Err(HarnessError::internal(
            "events.jsonl must end with a run_end event",
        ));
    }
    Ok(events)
}

fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|err| HarnessError::serialization(format!("failed to serialize JSON: {err}")))?;
    fs::write(path, bytes)?;
    Ok(())
}

fn sanitize_segment(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
