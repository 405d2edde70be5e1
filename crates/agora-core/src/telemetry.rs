//! Telemetry recorder.
//!
//! Append-only tick log. Each [`TickRecord`] goes to the store, to an
//! optional JSONL file, and to live subscribers, in strictly increasing
//! tick order.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use agora_events::TickRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::store::Store;

/// Output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Tick records, one JSON object per line
    pub jsonl_path: Option<PathBuf>,
    /// Scheduler heartbeat, rewritten every tick
    pub heartbeat_path: Option<PathBuf>,
    /// Store snapshot, rewritten every tick by the daemon
    pub snapshot_path: Option<PathBuf>,
    /// Buffered records per live subscriber
    pub broadcast_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            jsonl_path: None,
            heartbeat_path: None,
            snapshot_path: None,
            broadcast_capacity: 256,
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("tick {tick_id} is not after the last recorded tick {last}")]
    OutOfOrder { tick_id: u64, last: u64 },
    #[error("telemetry store write failed: {0}")]
    Store(#[from] StoreError),
    #[error("telemetry I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("telemetry encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct TelemetryRecorder {
    store: Arc<dyn Store>,
    writer: Mutex<Option<BufWriter<File>>>,
    sender: broadcast::Sender<TickRecord>,
    last_tick: Mutex<Option<u64>>,
    record_count: AtomicU64,
}

impl TelemetryRecorder {
    pub fn new(store: Arc<dyn Store>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let last_tick = store.last_tick_id().ok().flatten();
        Self {
            store,
            writer: Mutex::new(None),
            sender,
            last_tick: Mutex::new(last_tick),
            record_count: AtomicU64::new(0),
        }
    }

    /// Also appends every record to `path`, keeping earlier lines.
    pub fn with_jsonl(self, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if let Ok(mut writer) = self.writer.lock() {
            *writer = Some(BufWriter::new(file));
        }
        Ok(self)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TickRecord> {
        self.sender.subscribe()
    }

    /// Records appended through this recorder.
    pub fn record_count(&self) -> u64 {
        self.record_count.load(Ordering::Relaxed)
    }

    pub fn last_tick_id(&self) -> Option<u64> {
        self.last_tick.lock().ok().and_then(|last| *last)
    }

    pub fn record(&self, record: &TickRecord) -> Result<(), TelemetryError> {
        let mut last = self
            .last_tick
            .lock()
            .map_err(|_| TelemetryError::Store(StoreError::Poisoned))?;
        if let Some(prev) = *last {
            if record.tick_id <= prev {
                return Err(TelemetryError::OutOfOrder {
                    tick_id: record.tick_id,
                    last: prev,
                });
            }
        }

        self.store.append_tick(record)?;
        *last = Some(record.tick_id);
        self.record_count.fetch_add(1, Ordering::Relaxed);

        let line = record.to_jsonl()?;
        if let Ok(mut writer) = self.writer.lock() {
            if let Some(writer) = writer.as_mut() {
                writeln!(writer, "{}", line)?;
                writer.flush()?;
            }
        }

        // no subscribers is fine
        let _ = self.sender.send(record.clone());
        Ok(())
    }

    pub fn flush(&self) -> std::io::Result<()> {
        if let Ok(mut writer) = self.writer.lock() {
            if let Some(writer) = writer.as_mut() {
                writer.flush()?;
            }
        }
        Ok(())
    }
}

impl Drop for TelemetryRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("failed to flush telemetry: {}", e);
        }
    }
}

/// Reads back a JSONL tick log, skipping blank lines.
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<TickRecord>, TelemetryError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(TickRecord::from_jsonl(&line)?);
    }
    Ok(records)
}
