//! Buffered, retrying delivery of log records to the active session.
//!
//! A `LogShipper` accepts records at any time and ships them to the first
//! session that started flushing. Shipping is single-flight: while one flush
//! is in progress further triggers return immediately. A failed flush leaves
//! the buffer untouched; records only leave the buffer once the session has
//! accepted them or they are written to disk. When the last session pauses,
//! the buffer is written to that session's recovery file and reloaded the next
//! time flushing starts from it.
//!
//! Flushing and writing the recovery file hold the same guard. A write asked
//! for while a flush is running happens once that flush settles, so a record
//! is never both shipped and left on disk.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use mdstudio_core::{AsyncValue, FailureKind, Result, SessionId};
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{config::ShipperConfig, record::Record, recovery};

/// Source recorded on the shipper's own records.
pub const NAMESPACE: &str = "mdstudio.logging.shipper";

/// A session able to receive shipped records.
pub trait LogSession: Send + Sync {
    fn id(&self) -> SessionId;

    /// Root directory of the component owning the session.
    fn component_root_path(&self) -> PathBuf;

    /// Deliver `records`; resolves once the collector accepted them.
    fn flush_logs(&self, records: Vec<Record>) -> AsyncValue<()>;
}

/// Records loaded from a recovery file that are not yet shipped or stored
/// elsewhere. The file is removed once `ids` is empty.
struct Recovered {
    root: PathBuf,
    ids: HashSet<u64>,
}

#[derive(Default)]
struct State {
    buffer: Vec<(u64, Record)>,
    next_id: u64,
    active_sessions: Vec<Arc<dyn LogSession>>,
    current_target: Option<Arc<dyn LogSession>>,
    last_root: Option<PathBuf>,
    recovered: Vec<Recovered>,
    deferred_persist: Option<PathBuf>,
}

impl State {
    fn tag(&mut self, records: Vec<Record>) -> Vec<(u64, Record)> {
        records
            .into_iter()
            .map(|record| {
                let id = self.next_id;
                self.next_id += 1;
                (id, record)
            })
            .collect()
    }

    fn snapshot(&self) -> (HashSet<u64>, Vec<Record>) {
        self.buffer
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .unzip()
    }

    /// Drop the records in `done` and return the recovery files they emptied.
    fn settle(&mut self, done: &HashSet<u64>) -> Vec<PathBuf> {
        self.buffer.retain(|(id, _)| !done.contains(id));
        let mut emptied = Vec::new();
        self.recovered.retain_mut(|recovered| {
            recovered.ids.retain(|id| !done.contains(id));
            if recovered.ids.is_empty() {
                emptied.push(recovered.root.clone());
                false
            } else {
                true
            }
        });
        emptied
    }
}

/// Holds the single-flight flag; clears it when dropped.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct LogShipper {
    config: ShipperConfig,
    state: Mutex<State>,
    flushing: AtomicBool,
}

impl LogShipper {
    /// Create a shipper. Its first record announces that collection started.
    #[must_use]
    pub fn new(config: ShipperConfig) -> Self {
        let shipper = Self {
            config,
            state: Mutex::default(),
            flushing: AtomicBool::new(false),
        };
        shipper.record(Record::info(NAMESPACE, "Collecting logs"));
        shipper
    }

    #[must_use]
    pub const fn config(&self) -> &ShipperConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record. Never blocks on I/O.
    pub fn record(&self, record: Record) {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        state.buffer.push((id, record));
    }

    /// Snapshot of the records waiting to be shipped.
    #[must_use]
    pub fn buffered(&self) -> Vec<Record> {
        self.state().snapshot().1
    }

    /// Session records are currently shipped to.
    #[must_use]
    pub fn target(&self) -> Option<SessionId> {
        self.state().current_target.as_ref().map(|session| session.id())
    }

    /// Register `session`. The first registered session becomes the target,
    /// and records left in its recovery file are queued ahead of newer ones.
    pub async fn start_flushing(&self, session: Arc<dyn LogSession>) {
        let root = session.component_root_path();
        let needs_target = self.state().current_target.is_none();
        let recovered = if needs_target {
            recovery::load(&root).await
        } else {
            Vec::new()
        };

        let recovered_count = recovered.len();
        {
            let mut state = self.state();
            if state.current_target.is_none() {
                let tagged = state.tag(recovered);
                if !tagged.is_empty() {
                    let ids = tagged.iter().map(|(id, _)| *id).collect();
                    state.recovered.push(Recovered {
                        root: root.clone(),
                        ids,
                    });
                }
                state.buffer.splice(0..0, tagged);
                state.last_root = Some(root);
                state.current_target = Some(Arc::clone(&session));
            }
            if !state.active_sessions.iter().any(|s| s.id() == session.id()) {
                state.active_sessions.push(Arc::clone(&session));
            }
        }
        tracing::debug!(session = %session.id(), recovered = recovered_count, "Started flushing");
    }

    /// Unregister a session. Flushing moves to the next remaining session; if
    /// none remains the buffer is written to the recovery file.
    pub async fn pause_flushing(&self, session_id: SessionId) {
        let persist_root = {
            let mut state = self.state();
            state.active_sessions.retain(|s| s.id() != session_id);
            if state.current_target.as_ref().is_some_and(|t| t.id() == session_id) {
                state.current_target = state.active_sessions.first().cloned();
                if let Some(next) = &state.current_target {
                    state.last_root = Some(next.component_root_path());
                }
            }
            if state.current_target.is_none() {
                state.last_root.clone()
            } else {
                None
            }
        };

        if let Some(root) = persist_root {
            self.persist(root).await;
        }
    }

    /// Ship the buffer to the target session.
    ///
    /// Small buffers are debounced first. Returns the number of records
    /// shipped, which is zero if nothing was due or another flush is running.
    ///
    /// # Errors
    /// Returns the last failure once the retry policy for it is exhausted.
    /// The buffer is left unchanged.
    pub async fn flush_logs(&self) -> Result<usize> {
        if self.flushing.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }
        let guard = FlushGuard(&self.flushing);
        let outcome = self.ship().await;
        self.release(guard).await;
        outcome
    }

    /// Write the buffer to the last target's recovery file.
    ///
    /// If a flush is running, the write happens when it settles.
    pub async fn shutdown(&self) {
        let root = self.state().last_root.clone();
        if let Some(root) = root {
            self.persist(root).await;
        }
    }

    /// Flush periodically on a background task.
    pub fn spawn_flusher(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.flush_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = self.flush_logs().await {
                    tracing::debug!("Periodic flush failed, retrying next period: {e}");
                }
            }
        })
    }

    async fn ship(&self) -> Result<usize> {
        let pending = {
            let state = self.state();
            if state.current_target.is_none() {
                return Ok(0);
            }
            state.buffer.len()
        };
        if pending == 0 {
            return Ok(0);
        }
        if pending < self.config.flush_threshold {
            tokio::time::sleep(self.config.debounce()).await;
        }

        let (target, (ids, snapshot)) = {
            let state = self.state();
            match &state.current_target {
                Some(target) => (Arc::clone(target), state.snapshot()),
                None => return Ok(0),
            }
        };
        if snapshot.is_empty() {
            return Ok(0);
        }

        let mut attempts = [0usize; 3];
        loop {
            let error = match target.flush_logs(snapshot.clone()).await {
                Ok(()) => break,
                Err(e) => e,
            };
            let kind = error.kind();
            let slot = match kind {
                FailureKind::Timeout => 0,
                FailureKind::Application => 1,
                FailureKind::Transport => 2,
                FailureKind::Logic | FailureKind::Refreshing | FailureKind::Unclassified => {
                    tracing::error!(session = %target.id(), "Failed to flush logs: {error}");
                    return Err(error);
                }
            };
            let Some(wait) = self.config.retry_wait(kind, attempts[slot]) else {
                tracing::warn!(session = %target.id(), "Giving up on log flush: {error}");
                return Err(error);
            };
            attempts[slot] += 1;
            tracing::warn!(
                session = %target.id(),
                retry_in_ms = wait.as_millis(),
                "Log flush failed: {error}"
            );
            tokio::time::sleep(wait).await;
        }

        let emptied = self.state().settle(&ids);
        for root in emptied {
            remove_recovery(&root).await;
        }
        Ok(ids.len())
    }

    /// Write the buffer to the recovery file under `root`, or leave it to the
    /// running flush.
    async fn persist(&self, root: PathBuf) {
        let guard = {
            let mut state = self.state();
            if self.flushing.swap(true, Ordering::AcqRel) {
                state.deferred_persist = Some(root);
                return;
            }
            FlushGuard(&self.flushing)
        };
        self.store(&root).await;
        self.release(guard).await;
    }

    /// Run writes deferred while the guard was held, then drop it. The flag is
    /// cleared under the state lock so no deferred write is missed.
    async fn release(&self, guard: FlushGuard<'_>) {
        loop {
            let root = {
                let mut state = self.state();
                match state.deferred_persist.take() {
                    Some(root) => root,
                    None => {
                        drop(guard);
                        return;
                    }
                }
            };
            self.store(&root).await;
        }
    }

    async fn store(&self, root: &Path) {
        let (ids, records, loaded) = {
            let state = self.state();
            let (ids, records) = state.snapshot();
            let loaded = state.recovered.iter().any(|r| r.root.as_path() == root);
            (ids, records, loaded)
        };
        if records.is_empty() {
            return;
        }
        // A file we never loaded holds records that are not in the buffer.
        let mut contents = if loaded {
            Vec::new()
        } else {
            recovery::load(root).await
        };
        contents.extend(records);
        if let Err(e) = recovery::store(root, &contents).await {
            tracing::warn!(root = %root.display(), "Could not store recovery file: {e}");
            return;
        }
        // Records now on disk under `root`; other files holding them are stale.
        let emptied = self.state().settle(&ids);
        for stale in emptied.into_iter().filter(|stale| stale.as_path() != root) {
            remove_recovery(&stale).await;
        }
    }
}

async fn remove_recovery(root: &Path) {
    if let Err(e) = recovery::remove(root).await {
        tracing::warn!(root = %root.display(), "Could not remove recovery file: {e}");
    }
}

impl std::fmt::Debug for LogShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("LogShipper")
            .field("buffered", &state.buffer.len())
            .field("sessions", &state.active_sessions.len())
            .field("target", &state.current_target.as_ref().map(|t| t.id()))
            .field("flushing", &self.flushing.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
