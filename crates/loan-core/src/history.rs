//! Best-effort prediction history.
//!
//! The request path never touches storage. It hands a record to a bounded
//! queue (`HistorySink::try_submit`) and moves on; a dedicated
//! `history-writer` thread drains the queue into a `HistoryStore`. Delivery is
//! at-most-once: a full or closed queue drops the record, and anything still
//! queued on crash is lost.

use crate::schema::Label;
use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub identity: Option<String>,
    /// Raw request body as received.
    pub input: Map<String, Value>,
    pub label: Label,
    pub result: String,
    pub confidence: f64,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HistoryWriteFailure {
    #[error("history queue full")]
    QueueFull,
    #[error("history writer down")]
    WriterDown,
}

pub trait HistoryStore: Send + Sync {
    fn append(&self, rec: &HistoryRecord) -> anyhow::Result<()>;

    /// Records of one identity, newest first.
    fn list_for(&self, identity: &str) -> anyhow::Result<Vec<HistoryRecord>>;

    /// Most recent `limit` records across all identities, newest first.
    fn recent(&self, limit: usize) -> anyhow::Result<Vec<HistoryRecord>>;

    /// Drops every record of one identity. Returns how many were removed.
    fn clear_for(&self, identity: &str) -> anyhow::Result<usize>;
}

/// Newest first; among equal timestamps the later append wins.
fn newest_first(mut v: Vec<HistoryRecord>) -> Vec<HistoryRecord> {
    v.reverse();
    v.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
    v
}

#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(&self, rec: &HistoryRecord) -> anyhow::Result<()> {
        self.records.lock().push(rec.clone());
        Ok(())
    }

    fn list_for(&self, identity: &str) -> anyhow::Result<Vec<HistoryRecord>> {
        let v: Vec<HistoryRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.identity.as_deref() == Some(identity))
            .cloned()
            .collect();
        Ok(newest_first(v))
    }

    fn recent(&self, limit: usize) -> anyhow::Result<Vec<HistoryRecord>> {
        let v = self.records.lock().clone();
        let mut v = newest_first(v);
        v.truncate(limit);
        Ok(v)
    }

    fn clear_for(&self, identity: &str) -> anyhow::Result<usize> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.identity.as_deref() != Some(identity));
        Ok(before - records.len())
    }
}

/// One JSON object per line, appended under a process-local lock.
#[derive(Debug)]
pub struct JsonlHistoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlHistoryStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create history dir: {}", parent.display()))?;
            }
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Caller holds `self.lock`.
    fn read_text(&self) -> anyhow::Result<String> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(&self.path)
            .with_context(|| format!("read history: {}", self.path.display()))
    }

    fn read_all(&self) -> anyhow::Result<Vec<HistoryRecord>> {
        let s = {
            let _g = self.lock.lock();
            self.read_text()?
        };
        let mut out = Vec::new();
        for (lineno, line) in s.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(line) {
                Ok(r) => out.push(r),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), line = lineno + 1, err = %e, "skip malformed history line");
                }
            }
        }
        Ok(out)
    }
}

impl HistoryStore for JsonlHistoryStore {
    fn append(&self, rec: &HistoryRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(rec).context("serialize history record")?;
        line.push(b'\n');

        let _g = self.lock.lock();
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open history: {}", self.path.display()))?;
        f.write_all(&line)
            .with_context(|| format!("append history: {}", self.path.display()))?;
        Ok(())
    }

    fn list_for(&self, identity: &str) -> anyhow::Result<Vec<HistoryRecord>> {
        let v = self
            .read_all()?
            .into_iter()
            .filter(|r| r.identity.as_deref() == Some(identity))
            .collect();
        Ok(newest_first(v))
    }

    fn recent(&self, limit: usize) -> anyhow::Result<Vec<HistoryRecord>> {
        let mut v = newest_first(self.read_all()?);
        v.truncate(limit);
        Ok(v)
    }

    /// Rewrites the file without the identity's lines. Lines that do not parse
    /// are kept as they are.
    fn clear_for(&self, identity: &str) -> anyhow::Result<usize> {
        let _g = self.lock.lock();
        let s = self.read_text()?;
        let mut kept = String::with_capacity(s.len());
        let mut removed = 0usize;
        for line in s.lines() {
            let theirs = serde_json::from_str::<HistoryRecord>(line)
                .map(|r| r.identity.as_deref() == Some(identity))
                .unwrap_or(false);
            if theirs {
                removed += 1;
                continue;
            }
            kept.push_str(line);
            kept.push('\n');
        }
        if removed == 0 {
            return Ok(0);
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, kept.as_bytes())
            .with_context(|| format!("write history: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace history: {}", self.path.display()))?;
        Ok(removed)
    }
}

/// Cheap, cloneable producer side of the history queue.
#[derive(Debug, Clone)]
pub struct HistorySink {
    tx: mpsc::Sender<HistoryRecord>,
}

impl HistorySink {
    /// Never blocks. The caller logs the failure and carries on.
    pub fn try_submit(&self, rec: HistoryRecord) -> Result<(), HistoryWriteFailure> {
        match self.tx.try_send(rec) {
            Ok(()) => {
                metrics::counter!("history_enqueued_total").increment(1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(HistoryWriteFailure::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(HistoryWriteFailure::WriterDown),
        }
    }
}

/// Owns the `history-writer` thread.
pub struct HistoryWriter {
    sink: HistorySink,
    store: Arc<dyn HistoryStore>,
    handle: JoinHandle<()>,
}

impl HistoryWriter {
    pub fn spawn(store: Arc<dyn HistoryStore>, queue_cap: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(queue_cap > 0, "history queue_cap must be > 0");

        let (tx, mut rx) = mpsc::channel::<HistoryRecord>(queue_cap);
        let worker_store = Arc::clone(&store);

        let handle = thread::Builder::new()
            .name("history-writer".to_string())
            .spawn(move || {
                while let Some(rec) = rx.blocking_recv() {
                    if let Err(e) = worker_store.append(&rec) {
                        metrics::counter!("history_write_failed_total").increment(1);
                        tracing::warn!(id = %rec.id, err = %e, "history write failed");
                    }
                }
                tracing::debug!("history writer drained, exiting");
            })
            .context("spawn history writer")?;

        Ok(Self {
            sink: HistorySink { tx },
            store,
            handle,
        })
    }

    pub fn sink(&self) -> HistorySink {
        self.sink.clone()
    }

    pub fn store(&self) -> Arc<dyn HistoryStore> {
        Arc::clone(&self.store)
    }

    /// Waits for queued records to be written. Returns once every `HistorySink`
    /// clone has been dropped.
    pub fn shutdown(self) {
        let Self { sink, handle, .. } = self;
        drop(sink);
        if handle.join().is_err() {
            tracing::error!("history writer panicked");
        }
    }
}
