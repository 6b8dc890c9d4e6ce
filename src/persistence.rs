//! Persistence of adaptive state
//!
//! Storage itself is a collaborator behind the `Persistence` trait. Writes are
//! queued to a dedicated thread by `PersistenceWriter` so the request path
//! never waits on I/O. Failures are logged and never reach the caller of
//! `route`.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ResolverError, ResolverResult};
use crate::learning::AdaptiveSnapshot;
use crate::types::AdaptiveWeights;

const WRITER_QUEUE_CAPACITY: usize = 1024;

const THRESHOLDS_FILE: &str = "intent_thresholds.json";
const OCCURRENCES_FILE: &str = "occurrence_counters.json";
const WEIGHTS_FILE: &str = "adaptive_weights.json";

/// Durable storage for adaptive state
pub trait Persistence: Send + Sync {
    fn load_intent_thresholds(&self) -> ResolverResult<HashMap<String, f64>>;
    fn save_intent_thresholds(&self, thresholds: &HashMap<String, f64>) -> ResolverResult<()>;

    fn load_occurrence_counters(&self) -> ResolverResult<HashMap<String, u64>>;
    fn save_occurrence_counters(&self, counters: &HashMap<String, u64>) -> ResolverResult<()>;

    fn load_adaptive_weights(&self) -> ResolverResult<HashMap<String, AdaptiveWeights>>;
    fn save_adaptive_weights(&self, weights: &HashMap<String, AdaptiveWeights>) -> ResolverResult<()>;
}

/// Load everything, substituting an empty map for any part that fails.
pub fn load_snapshot(persistence: &dyn Persistence) -> AdaptiveSnapshot {
    AdaptiveSnapshot {
        thresholds: persistence.load_intent_thresholds().unwrap_or_else(|e| {
            warn!(error = %e, "could not load intent thresholds, using defaults");
            HashMap::new()
        }),
        occurrences: persistence.load_occurrence_counters().unwrap_or_else(|e| {
            warn!(error = %e, "could not load occurrence counters, starting from zero");
            HashMap::new()
        }),
        weights: persistence.load_adaptive_weights().unwrap_or_else(|e| {
            warn!(error = %e, "could not load adaptive weights, using defaults");
            HashMap::new()
        }),
    }
}

/// Save all three maps. Stops at the first failure.
pub fn save_snapshot(persistence: &dyn Persistence, snapshot: &AdaptiveSnapshot) -> ResolverResult<()> {
    persistence.save_intent_thresholds(&snapshot.thresholds)?;
    persistence.save_occurrence_counters(&snapshot.occurrences)?;
    persistence.save_adaptive_weights(&snapshot.weights)?;
    Ok(())
}

/// In-memory persistence, for tests and ephemeral hosts
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    state: Mutex<AdaptiveSnapshot>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: AdaptiveSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }

    /// Current stored state.
    pub fn stored(&self) -> AdaptiveSnapshot {
        self.state.lock().clone()
    }
}

impl Persistence for MemoryPersistence {
    fn load_intent_thresholds(&self) -> ResolverResult<HashMap<String, f64>> {
        Ok(self.state.lock().thresholds.clone())
    }

    fn save_intent_thresholds(&self, thresholds: &HashMap<String, f64>) -> ResolverResult<()> {
        self.state.lock().thresholds = thresholds.clone();
        Ok(())
    }

    fn load_occurrence_counters(&self) -> ResolverResult<HashMap<String, u64>> {
        Ok(self.state.lock().occurrences.clone())
    }

    fn save_occurrence_counters(&self, counters: &HashMap<String, u64>) -> ResolverResult<()> {
        self.state.lock().occurrences = counters.clone();
        Ok(())
    }

    fn load_adaptive_weights(&self) -> ResolverResult<HashMap<String, AdaptiveWeights>> {
        Ok(self.state.lock().weights.clone())
    }

    fn save_adaptive_weights(&self, weights: &HashMap<String, AdaptiveWeights>) -> ResolverResult<()> {
        self.state.lock().weights = weights.clone();
        Ok(())
    }
}

/// One JSON file per map inside a state directory
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    dir: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A missing file is an empty map, not an error.
    fn read_map<T: DeserializeOwned>(&self, name: &str) -> ResolverResult<HashMap<String, T>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| ResolverError::Persistence {
            reason: format!("reading {}: {e}", path.display()),
        })?;
        serde_json::from_str(&raw).map_err(|e| ResolverError::Persistence {
            reason: format!("parsing {}: {e}", path.display()),
        })
    }

    /// Write to a sibling temp file, then rename over the target.
    fn write_map<T: Serialize>(&self, name: &str, map: &HashMap<String, T>) -> ResolverResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let json = serde_json::to_string_pretty(map)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path).map_err(|e| ResolverError::Persistence {
            reason: format!("replacing {}: {e}", path.display()),
        })
    }
}

impl Persistence for JsonFilePersistence {
    fn load_intent_thresholds(&self) -> ResolverResult<HashMap<String, f64>> {
        self.read_map(THRESHOLDS_FILE)
    }

    fn save_intent_thresholds(&self, thresholds: &HashMap<String, f64>) -> ResolverResult<()> {
        self.write_map(THRESHOLDS_FILE, thresholds)
    }

    fn load_occurrence_counters(&self) -> ResolverResult<HashMap<String, u64>> {
        self.read_map(OCCURRENCES_FILE)
    }

    fn save_occurrence_counters(&self, counters: &HashMap<String, u64>) -> ResolverResult<()> {
        self.write_map(OCCURRENCES_FILE, counters)
    }

    fn load_adaptive_weights(&self) -> ResolverResult<HashMap<String, AdaptiveWeights>> {
        self.read_map(WEIGHTS_FILE)
    }

    fn save_adaptive_weights(&self, weights: &HashMap<String, AdaptiveWeights>) -> ResolverResult<()> {
        self.write_map(WEIGHTS_FILE, weights)
    }
}

enum WriterCommand {
    Save(AdaptiveSnapshot),
    Flush(Sender<()>),
}

/// Counters reported by `PersistenceWriter::shutdown`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub snapshots_written: u64,
    /// Snapshots superseded by a newer one before they were written.
    pub snapshots_coalesced: u64,
    pub failures: u64,
}

/// Queues snapshots to a dedicated writer thread
///
/// Only the newest queued snapshot is written; older ones are superseded.
/// Dropping the writer flushes what is queued and joins the thread.
pub struct PersistenceWriter {
    tx: Option<Sender<WriterCommand>>,
    handle: Option<JoinHandle<WriterStats>>,
}

impl PersistenceWriter {
    pub fn new(persistence: Arc<dyn Persistence>) -> ResolverResult<Self> {
        let (tx, rx) = bounded(WRITER_QUEUE_CAPACITY);
        let handle = std::thread::Builder::new()
            .name("resolver-persistence".to_string())
            .spawn(move || run_writer(persistence.as_ref(), rx))?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue a snapshot. Never blocks on I/O; a full queue drops the snapshot
    /// with a warning since a newer one will follow.
    pub fn send(&self, snapshot: AdaptiveSnapshot) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(WriterCommand::Save(snapshot)) {
            warn!(error = %e, "persistence queue rejected snapshot");
        }
    }

    /// Block until every snapshot queued so far has been written.
    pub fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(WriterCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Drain the queue, stop the thread and report what it did.
    pub fn shutdown(mut self) -> WriterStats {
        self.stop()
    }

    fn stop(&mut self) -> WriterStats {
        drop(self.tx.take());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                warn!("persistence writer thread panicked");
                WriterStats::default()
            }),
            None => WriterStats::default(),
        }
    }
}

impl Drop for PersistenceWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_writer(persistence: &dyn Persistence, rx: Receiver<WriterCommand>) -> WriterStats {
    let mut stats = WriterStats::default();
    let mut pending: Option<AdaptiveSnapshot> = None;

    while let Ok(command) = rx.recv() {
        let mut acks = Vec::new();
        let mut absorb = |command: WriterCommand, pending: &mut Option<AdaptiveSnapshot>, stats: &mut WriterStats| {
            match command {
                WriterCommand::Save(snapshot) => {
                    if pending.replace(snapshot).is_some() {
                        stats.snapshots_coalesced += 1;
                    }
                }
                WriterCommand::Flush(ack) => acks.push(ack),
            }
        };
        absorb(command, &mut pending, &mut stats);
        while let Ok(next) = rx.try_recv() {
            absorb(next, &mut pending, &mut stats);
        }

        if let Some(snapshot) = pending.take() {
            write_snapshot(persistence, &snapshot, &mut stats);
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }

    if let Some(snapshot) = pending.take() {
        write_snapshot(persistence, &snapshot, &mut stats);
    }
    debug!(written = stats.snapshots_written, failures = stats.failures, "persistence writer stopped");
    stats
}

fn write_snapshot(persistence: &dyn Persistence, snapshot: &AdaptiveSnapshot, stats: &mut WriterStats) {
    match save_snapshot(persistence, snapshot) {
        Ok(()) => stats.snapshots_written += 1,
        Err(e) => {
            stats.failures += 1;
            warn!(error = %e, "failed to persist adaptive state");
        }
    }
}
