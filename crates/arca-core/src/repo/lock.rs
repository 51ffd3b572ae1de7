//! Advisory repository locks stored as backend objects under `locks/`.
//!
//! Any number of shared locks may coexist; an exclusive lock excludes every
//! other lock. Locks are refreshed by a background thread while held and
//! become stale once they have not been refreshed for `stale_after`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{RecvTimeoutError, Sender};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use arca_crypto::CryptoEngine;
use arca_storage::StorageBackend;
use arca_storage::paths::{LOCKS_DIR, lock_key, object_name};
use arca_types::error::{ArcaError, Result};

use super::format::{ObjectType, pack_object, unpack_object_expect};
use crate::config::LockTiming;
use crate::platform;

/// The persisted lock object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub time: DateTime<Utc>,
    pub exclusive: bool,
    pub hostname: String,
    pub username: String,
    pub pid: u32,
    pub lock_id: String,
}

impl LockRecord {
    fn kind(&self) -> &'static str {
        if self.exclusive { "exclusive" } else { "shared" }
    }

    fn describe(&self, now: DateTime<Utc>) -> String {
        let age = now.signed_duration_since(self.time).num_seconds();
        let age = if age < 0 {
            format!("{}s in the future", -age)
        } else {
            format!("{age}s ago")
        };
        format!(
            "{} lock {} held by {}@{} (pid {}), created {age}",
            self.kind(),
            &self.lock_id[..self.lock_id.len().min(16)],
            self.username,
            self.hostname,
            self.pid,
        )
    }
}

/// What reading one lock object produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockRead {
    /// Deleted between listing and reading.
    Vanished,
    /// A zero-length object, typically left behind by an interrupted upload.
    /// Treated exactly like a missing lock.
    Empty,
    Record(LockRecord),
}

fn new_lock_id() -> String {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn encode_record(record: &LockRecord, crypto: &dyn CryptoEngine) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(record)?;
    pack_object(ObjectType::Lock, record.lock_id.as_bytes(), &json, crypto)
}

/// Acquires and inspects repository locks for one process identity.
#[derive(Clone)]
pub struct LockManager {
    storage: Arc<dyn StorageBackend>,
    crypto: Arc<dyn CryptoEngine>,
    timing: LockTiming,
    hostname: String,
    username: String,
    pid: u32,
}

impl LockManager {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        crypto: Arc<dyn CryptoEngine>,
        timing: LockTiming,
    ) -> Self {
        Self {
            storage,
            crypto,
            timing,
            hostname: platform::hostname(),
            username: platform::username(),
            pid: platform::pid(),
        }
    }

    /// Act as a different host/process. Used to simulate concurrent
    /// processes in tests and by embedders that proxy for remote clients.
    pub fn with_identity(mut self, hostname: impl Into<String>, pid: u32) -> Self {
        self.hostname = hostname.into();
        self.pid = pid;
        self
    }

    pub fn timing(&self) -> &LockTiming {
        &self.timing
    }

    /// Read and classify one lock object.
    pub fn read_lock(&self, key: &str) -> Result<LockRead> {
        let Some(data) = self.storage.get(key)? else {
            return Ok(LockRead::Vanished);
        };
        if data.is_empty() {
            return Ok(LockRead::Empty);
        }
        let unreadable = |reason: String| ArcaError::UnreadableLock {
            key: key.to_string(),
            reason,
        };
        let lock_id = object_name(key);
        let json = unpack_object_expect(&data, ObjectType::Lock, lock_id.as_bytes(), &*self.crypto)
            .map_err(|e| unreadable(e.to_string()))?;
        let record: LockRecord =
            serde_json::from_slice(&json).map_err(|e| unreadable(format!("malformed record: {e}")))?;
        Ok(LockRead::Record(record))
    }

    /// Every readable lock in the repository, keyed by storage key.
    ///
    /// Empty and vanished objects are skipped. A non-empty lock that cannot
    /// be decrypted or parsed aborts the listing with `UnreadableLock`.
    pub fn list_locks(&self) -> Result<Vec<(String, LockRecord)>> {
        let mut locks = Vec::new();
        for key in self.storage.list(LOCKS_DIR)? {
            match self.read_lock(&key)? {
                LockRead::Record(record) => locks.push((key, record)),
                LockRead::Empty => debug!(key = %key, "ignoring empty lock object"),
                LockRead::Vanished => debug!(key = %key, "lock vanished while listing"),
            }
        }
        Ok(locks)
    }

    /// Whether `record` may be ignored for conflict purposes.
    ///
    /// A lock is stale when it has not been refreshed for longer than
    /// `stale_after` and there is no local evidence that its owner still
    /// runs. Locks dated in the future are never stale.
    pub fn is_stale(&self, record: &LockRecord, now: DateTime<Utc>) -> bool {
        let Ok(age) = now.signed_duration_since(record.time).to_std() else {
            return false;
        };
        if age <= self.timing.stale_after {
            return false;
        }
        !(record.hostname == self.hostname && platform::process_alive(record.pid))
    }

    fn conflicts(exclusive: bool, other: &LockRecord) -> bool {
        exclusive || other.exclusive
    }

    fn find_conflict(
        &self,
        exclusive: bool,
        own_key: Option<&str>,
    ) -> Result<Option<(String, LockRecord)>> {
        let now = Utc::now();
        for (key, record) in self.list_locks()? {
            if Some(key.as_str()) == own_key {
                continue;
            }
            if self.is_stale(&record, now) {
                debug!(key = %key, holder = %record.describe(now), "ignoring stale lock");
                continue;
            }
            if Self::conflicts(exclusive, &record) {
                return Ok(Some((key, record)));
            }
        }
        Ok(None)
    }

    /// Store a lock record under its own key. Returns the key.
    pub fn write_record(&self, record: &LockRecord) -> Result<String> {
        let key = lock_key(&record.lock_id);
        self.storage.put(&key, &encode_record(record, &*self.crypto)?)?;
        Ok(key)
    }

    /// Acquire a lock once.
    ///
    /// Fails with `Locked` if a live conflicting lock exists before or after
    /// writing our own. After a lost race the lock just written is removed
    /// again, so two racing processes may both fail but never both succeed.
    pub fn acquire(&self, exclusive: bool) -> Result<Lock> {
        if let Some((_, holder)) = self.find_conflict(exclusive, None)? {
            return Err(ArcaError::Locked(holder.describe(Utc::now())));
        }

        let record = LockRecord {
            time: Utc::now(),
            exclusive,
            hostname: self.hostname.clone(),
            username: self.username.clone(),
            pid: self.pid,
            lock_id: new_lock_id(),
        };
        let key = self.write_record(&record)?;

        let recheck = self.find_conflict(exclusive, Some(&key));
        let failure = match recheck {
            Ok(None) => None,
            Ok(Some((_, holder))) => Some(ArcaError::Locked(format!(
                "{} (lost acquisition race)",
                holder.describe(Utc::now())
            ))),
            Err(e) => Some(e),
        };
        if let Some(err) = failure {
            if let Err(e) = self.storage.delete(&key) {
                warn!(key = %key, error = %e, "failed to remove lock after failed acquisition");
            }
            return Err(err);
        }

        info!(key = %key, exclusive, "acquired repository lock");
        Lock::start(
            Arc::clone(&self.storage),
            Arc::clone(&self.crypto),
            self.timing,
            key,
            record,
        )
    }

    /// Acquire with exponential backoff and ±25% jitter while the repository
    /// is locked by someone else. Other errors are returned immediately.
    pub fn acquire_with_retry(&self, exclusive: bool) -> Result<Lock> {
        let attempts = self.timing.acquire_attempts.max(1);
        let base_ms = self.timing.acquire_retry_delay.as_millis() as u64;
        let mut attempt = 0;
        loop {
            match self.acquire(exclusive) {
                Err(ArcaError::Locked(holder)) if attempt + 1 < attempts => {
                    let delay = base_ms.saturating_mul(1 << attempt.min(5));
                    let jitter = rand::thread_rng().gen_range(0..=delay / 2);
                    let delay = (delay + jitter).saturating_sub(delay / 4).max(1);
                    debug!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        holder = %holder,
                        delay_ms = delay,
                        "lock contention, retrying"
                    );
                    std::thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Delete stale, readable locks. Unreadable and empty lock objects are
    /// left alone. Returns the number of locks removed.
    pub fn remove_stale_locks(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;
        for key in self.storage.list(LOCKS_DIR)? {
            match self.read_lock(&key) {
                Ok(LockRead::Record(record)) if self.is_stale(&record, now) => {
                    info!(key = %key, holder = %record.describe(now), "removing stale lock");
                    self.storage.delete(&key)?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e @ ArcaError::UnreadableLock { .. }) => {
                    warn!(error = %e, "leaving unreadable lock in place");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}

/// Forcibly remove every lock object, live or not. Manual recovery only;
/// needs no key material. Returns the number of locks removed.
pub fn break_locks(storage: &dyn StorageBackend) -> Result<usize> {
    let keys = storage.list(LOCKS_DIR)?;
    for key in &keys {
        storage.delete(key)?;
    }
    warn!(removed = keys.len(), "removed all repository locks");
    Ok(keys.len())
}

/// A held lock. Refreshed in the background until released or dropped.
pub struct Lock {
    key: String,
    lock_id: String,
    exclusive: bool,
    storage: Arc<dyn StorageBackend>,
    lost: Arc<AtomicBool>,
    stop: Option<Sender<()>>,
    refresher: Option<JoinHandle<()>>,
    released: bool,
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.key)
            .field("lock_id", &self.lock_id)
            .field("exclusive", &self.exclusive)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Lock {
    fn start(
        storage: Arc<dyn StorageBackend>,
        crypto: Arc<dyn CryptoEngine>,
        timing: LockTiming,
        key: String,
        record: LockRecord,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let lost = Arc::new(AtomicBool::new(false));

        let lock_id = record.lock_id.clone();
        let exclusive = record.exclusive;
        let spawned = {
            let storage = Arc::clone(&storage);
            let lost = Arc::clone(&lost);
            let key = key.clone();
            std::thread::Builder::new()
                .name("arca-lock-refresh".into())
                .spawn(move || {
                    refresh_loop(&*storage, &*crypto, &key, record, timing, &lost, &stop_rx)
                })
        };
        let refresher = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(del) = storage.delete(&key) {
                    warn!(key = %key, error = %del, "failed to remove lock after spawn failure");
                }
                return Err(ArcaError::Io(e));
            }
        };

        Ok(Self {
            key,
            lock_id,
            exclusive,
            storage,
            lost,
            stop: Some(stop_tx),
            refresher: Some(refresher),
            released: false,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Fails with `LockLost` once refreshing has given up.
    pub fn check(&self) -> Result<()> {
        if self.is_lost() {
            return Err(ArcaError::LockLost(self.key.clone()));
        }
        Ok(())
    }

    fn stop_refresh(&mut self) {
        // Dropping the sender disconnects the channel and wakes the thread.
        self.stop.take();
        if let Some(handle) = self.refresher.take() {
            if handle.join().is_err() {
                error!(key = %self.key, "lock refresh thread panicked");
            }
        }
    }

    /// Stop refreshing and delete the lock object. Idempotent.
    pub fn release(&mut self) -> Result<()> {
        self.stop_refresh();
        if self.released {
            return Ok(());
        }
        self.storage.delete(&self.key)?;
        self.released = true;
        info!(key = %self.key, "released repository lock");
        Ok(())
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(key = %self.key, error = %e, "failed to release lock on drop");
        }
    }
}

fn refresh_loop(
    storage: &dyn StorageBackend,
    crypto: &dyn CryptoEngine,
    key: &str,
    mut record: LockRecord,
    timing: LockTiming,
    lost: &AtomicBool,
    stop: &crossbeam_channel::Receiver<()>,
) {
    let mut failures: u32 = 0;
    let mut wait = timing.refresh_interval;
    loop {
        match stop.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }

        record.time = Utc::now();
        let written = encode_record(&record, crypto).and_then(|data| storage.put(key, &data));
        match written {
            Ok(()) => {
                failures = 0;
                wait = timing.refresh_interval;
                debug!(key = %key, "refreshed lock");
            }
            Err(e) => {
                failures += 1;
                if failures > timing.max_refresh_failures {
                    lost.store(true, Ordering::SeqCst);
                    error!(
                        key = %key,
                        failures,
                        error = %e,
                        "giving up on lock refresh; lock is considered lost"
                    );
                    return;
                }
                wait = timing
                    .acquire_retry_delay
                    .saturating_mul(1 << (failures - 1).min(5))
                    .min(timing.refresh_interval);
                warn!(
                    key = %key,
                    failures,
                    retry_in_ms = wait.as_millis() as u64,
                    error = %e,
                    "lock refresh failed"
                );
            }
        }
    }
}
