pub mod format;
pub mod keys;
pub mod lock;
pub mod pack;
pub mod session;

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Read;
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use arca_crypto::key::{EncryptedKey, MasterKey, key_storage_key, new_key_id};
use arca_crypto::{CryptoEngine, EncryptionMode, engine_for};
use arca_storage::paths::{CONFIG_KEY, KEYS_DIR, REPO_DIRS};
use arca_storage::{RetryingBackend, StorageBackend};
use arca_types::error::{ArcaError, Result, ResultExt};
use arca_types::{BlobHandle, BlobId, BlobType, PackId};

use crate::chunker::chunk_stream;
use crate::compress::Compression;
use crate::config::{ChunkerConfig, EngineConfig};
use crate::index::{self, Index, IndexFile, IndexPack, RebuildReport};
use crate::platform;

pub use self::lock::{Lock, LockManager, LockRead, LockRecord, break_locks};
pub use self::session::with_write_session;

use self::pack::{
    PackHeaderEntry, PackWriter, SealedPack, compute_data_pack_target, compute_tree_pack_target,
    decode_blob, encode_blob, read_blob_from_pack,
};

/// Repository format version written by `init`.
pub const REPO_VERSION: u32 = 1;

/// Persisted (unencrypted) at the `config` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub version: u32,
    /// 32 random bytes, hex-encoded.
    pub id: String,
    pub chunker: ChunkerConfig,
    pub min_pack_size: u32,
    pub max_pack_size: u32,
    pub encryption: EncryptionMode,
    pub created: DateTime<Utc>,
}

/// FIFO blob cache bounded by total weight in bytes.
/// Caches decrypted+decompressed blobs to avoid redundant storage reads.
struct BlobCache {
    entries: HashMap<BlobHandle, Vec<u8>>,
    order: VecDeque<BlobHandle>,
    current_bytes: usize,
    max_bytes: usize,
}

impl BlobCache {
    fn new(max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            current_bytes: 0,
            max_bytes,
        }
    }

    fn get(&self, handle: &BlobHandle) -> Option<&[u8]> {
        self.entries.get(handle).map(Vec::as_slice)
    }

    fn insert(&mut self, handle: BlobHandle, data: Vec<u8>) {
        let data_len = data.len();
        if data_len > self.max_bytes || self.entries.contains_key(&handle) {
            return;
        }
        while self.current_bytes + data_len > self.max_bytes {
            let Some(evicted) = self.order.pop_front() else {
                break;
            };
            if let Some(evicted_data) = self.entries.remove(&evicted) {
                self.current_bytes -= evicted_data.len();
            }
        }
        self.current_bytes += data_len;
        self.entries.insert(handle, data);
        self.order.push_back(handle);
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.current_bytes = 0;
    }
}

/// A sealed pack being uploaded by a background thread.
struct PendingUpload {
    pack_id: PackId,
    entries: Vec<PackHeaderEntry>,
    handle: JoinHandle<Result<()>>,
}

/// Counters for the blobs written through this handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub blobs_new: usize,
    pub blobs_deduplicated: usize,
    pub bytes_new: u64,
    pub packs_uploaded: usize,
}

/// A handle to an opened repository.
///
/// Owns the loaded index, the open pack writers and the held lock. Every
/// mutation requires a lock (`lock_shared` / `lock_exclusive`); reads only
/// need the index.
pub struct Repository {
    storage: Arc<dyn StorageBackend>,
    crypto: Arc<dyn CryptoEngine>,
    master_key: MasterKey,
    key_id: String,
    config: RepoConfig,
    engine: EngineConfig,
    compression: Compression,
    index: Option<Arc<Index>>,
    index_generation: u64,
    loaded_index_files: Vec<String>,
    /// Packs uploaded by this handle whose entries are not yet in an index file.
    pending_delta: Vec<IndexPack>,
    data_writer: PackWriter,
    tree_writer: PackWriter,
    uploads: VecDeque<PendingUpload>,
    uploading: HashSet<BlobHandle>,
    lock: Option<Lock>,
    lock_manager: LockManager,
    blob_cache: BlobCache,
    stats: WriteStats,
}

fn wrap_storage(storage: Arc<dyn StorageBackend>, engine: &EngineConfig) -> Arc<dyn StorageBackend> {
    Arc::new(RetryingBackend::new(storage, engine.retry.clone()))
}

impl Repository {
    /// Initialize a new repository and return it with an empty index loaded.
    pub fn init(
        storage: Arc<dyn StorageBackend>,
        engine: &EngineConfig,
        passphrase: &str,
    ) -> Result<Self> {
        engine.validate()?;
        let storage = wrap_storage(storage, engine);

        if storage.exists(CONFIG_KEY)? {
            return Err(ArcaError::RepoAlreadyExists(CONFIG_KEY.into()));
        }
        for dir in REPO_DIRS {
            storage.create_dir(dir)?;
        }

        let mut repo_id = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut repo_id);
        let config = RepoConfig {
            version: REPO_VERSION,
            id: hex::encode(repo_id),
            chunker: engine.chunker,
            min_pack_size: engine.packs.min_pack_size,
            max_pack_size: engine.packs.max_pack_size,
            encryption: engine.encryption,
            created: Utc::now(),
        };

        let master_key = MasterKey::generate();
        let crypto = engine_for(config.encryption, &master_key)?;

        // The key file goes first: a `config` object marks a usable repository.
        let key_id = new_key_id();
        let wrapped = master_key.to_encrypted(
            passphrase,
            &engine.kdf,
            &platform::hostname(),
            &platform::username(),
        )?;
        storage.put(&key_storage_key(&key_id), &wrapped.to_bytes()?)?;
        storage.put(CONFIG_KEY, &rmp_serde::to_vec_named(&config)?)?;

        info!(repo_id = %config.id, cipher = config.encryption.as_str(), "initialized repository");
        let mut repo = Self::assemble(storage, crypto, master_key, key_id, config, engine);
        repo.index = Some(Arc::new(Index::new()));
        Ok(repo)
    }

    /// Open an existing repository and load its index. When no index file
    /// exists but packs do, the index is rebuilt from the pack headers.
    pub fn open(
        storage: Arc<dyn StorageBackend>,
        engine: &EngineConfig,
        passphrase: &str,
    ) -> Result<Self> {
        let mut repo = Self::open_without_index(storage, engine, passphrase)?;
        repo.load_index()?;
        Ok(repo)
    }

    /// Open a repository without loading the index. Reads and writes fail
    /// with `IndexNotLoaded` until `load_index` is called.
    pub fn open_without_index(
        storage: Arc<dyn StorageBackend>,
        engine: &EngineConfig,
        passphrase: &str,
    ) -> Result<Self> {
        engine.validate()?;
        let storage = wrap_storage(storage, engine);

        let config_data = storage
            .get(CONFIG_KEY)?
            .ok_or_else(|| ArcaError::RepoNotFound(CONFIG_KEY.into()))?;
        let config: RepoConfig = rmp_serde::from_slice(&config_data)?;
        if config.version != REPO_VERSION {
            return Err(ArcaError::UnsupportedVersion(config.version));
        }
        config.chunker.validate()?;

        let (key_id, master_key) = unlock_master_key(storage.as_ref(), passphrase)?;
        let crypto = engine_for(config.encryption, &master_key)?;
        debug!(repo_id = %config.id, key_id = %key_id, "opened repository");
        Ok(Self::assemble(storage, crypto, master_key, key_id, config, engine))
    }

    fn assemble(
        storage: Arc<dyn StorageBackend>,
        crypto: Arc<dyn CryptoEngine>,
        master_key: MasterKey,
        key_id: String,
        config: RepoConfig,
        engine: &EngineConfig,
    ) -> Self {
        let lock_manager = LockManager::new(
            Arc::clone(&storage),
            Arc::clone(&crypto),
            engine.locks.timing(),
        );
        let data_target = config.min_pack_size as usize;
        let tree_target = compute_tree_pack_target(config.min_pack_size);
        Self {
            storage,
            crypto,
            master_key,
            key_id,
            compression: Compression::from_config(&engine.compression),
            index: None,
            index_generation: 0,
            loaded_index_files: Vec::new(),
            pending_delta: Vec::new(),
            data_writer: PackWriter::new(BlobType::Data, data_target),
            tree_writer: PackWriter::new(BlobType::Tree, tree_target),
            uploads: VecDeque::new(),
            uploading: HashSet::new(),
            lock: None,
            lock_manager,
            blob_cache: BlobCache::new(engine.blob_cache_bytes),
            stats: WriteStats::default(),
            config,
            engine: engine.clone(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoEngine> {
        &self.crypto
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    /// ID of the key file that unlocked this handle.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    /// The current index snapshot.
    pub fn index(&self) -> Result<&Arc<Index>> {
        self.index.as_ref().ok_or(ArcaError::IndexNotLoaded)
    }

    fn index_mut(&mut self) -> Result<&mut Index> {
        self.index
            .as_mut()
            .map(Arc::make_mut)
            .ok_or(ArcaError::IndexNotLoaded)
    }

    /// ID files loaded (or written) by this handle, superseded ones included.
    pub fn loaded_index_files(&self) -> &[String] {
        &self.loaded_index_files
    }

    pub fn index_generation(&self) -> u64 {
        self.index_generation
    }

    /// Load all persisted index files, replacing the in-memory index.
    ///
    /// Packs uploaded by this handle but not yet saved to an index file are
    /// kept. An empty index directory with packs present triggers a rebuild.
    pub fn load_index(&mut self) -> Result<()> {
        let loaded = index::load_index(self.storage.as_ref(), self.crypto.as_ref())?;
        if loaded.files.is_empty() && !index::list_packs(self.storage.as_ref())?.is_empty() {
            warn!("repository has packs but no index files; rebuilding index");
            self.rebuild_index(false)?;
            return Ok(());
        }
        let mut index = loaded.index;
        for pack in &self.pending_delta {
            index.add_pack(pack.pack_id, &pack.blobs);
        }
        self.index = Some(Arc::new(index));
        self.index_generation = loaded.max_generation;
        self.loaded_index_files = loaded.files;
        self.blob_cache.clear();
        self.refresh_pack_targets();
        Ok(())
    }

    /// Rebuild the index from the headers of every stored pack.
    ///
    /// With `persist`, the result is written as one index file that
    /// supersedes every existing index file, which are then deleted; this
    /// requires the exclusive lock. Without it only the in-memory index is
    /// replaced.
    pub fn rebuild_index(&mut self, persist: bool) -> Result<RebuildReport> {
        if persist {
            self.require_lock(true)?;
        }
        self.wait_all_uploads()?;

        // List index files before packs: any pack referenced by a listed
        // index file is already stored and will be scanned.
        let previous = index::list_index_files(self.storage.as_ref())?;
        let report = index::rebuild_index(self.storage.as_ref(), self.crypto.as_ref())?;

        if persist {
            self.install_full_index(report.index.clone(), &previous)?;
        } else {
            self.index = Some(Arc::new(report.index.clone()));
            self.blob_cache.clear();
            self.refresh_pack_targets();
        }
        Ok(report)
    }

    /// Persist `index` as one full index file superseding `previous`, delete
    /// those files and make `index` the in-memory index. Requires the
    /// exclusive lock. Returns the new file's ID.
    pub(crate) fn install_full_index(&mut self, index: Index, previous: &[String]) -> Result<String> {
        self.require_lock(true)?;
        let generation = self.index_generation.max(self.max_listed_generation(previous)?) + 1;
        let id = index::persist_full_index(
            self.storage.as_ref(),
            self.crypto.as_ref(),
            &index,
            generation,
            previous,
        )?;
        self.index_generation = generation;
        self.loaded_index_files = vec![id.clone()];
        self.pending_delta.clear();
        self.index = Some(Arc::new(index));
        self.blob_cache.clear();
        self.refresh_pack_targets();
        Ok(id)
    }

    fn max_listed_generation(&self, ids: &[String]) -> Result<u64> {
        let mut max = 0;
        for id in ids {
            if let Some(file) = index::read_index_file(self.storage.as_ref(), self.crypto.as_ref(), id)? {
                max = max.max(file.generation);
            }
        }
        Ok(max)
    }

    fn refresh_pack_targets(&mut self) {
        if let Some(index) = &self.index {
            let target = compute_data_pack_target(
                index.data_pack_count(),
                self.config.min_pack_size,
                self.config.max_pack_size,
            );
            self.data_writer.set_target_size(target);
        }
    }

    // ----- locking -----

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    pub fn lock_shared(&mut self) -> Result<()> {
        self.acquire_lock(false)
    }

    pub fn lock_exclusive(&mut self) -> Result<()> {
        self.acquire_lock(true)
    }

    fn acquire_lock(&mut self, exclusive: bool) -> Result<()> {
        if let Some(held) = &self.lock {
            held.check()?;
            if exclusive && !held.is_exclusive() {
                return Err(ArcaError::Other(
                    "cannot upgrade a shared lock to an exclusive lock; unlock first".into(),
                ));
            }
            return Ok(());
        }
        self.lock = Some(self.lock_manager.acquire_with_retry(exclusive)?);
        Ok(())
    }

    /// Release the held lock, if any. Unflushed writes stay buffered.
    pub fn unlock(&mut self) -> Result<()> {
        match self.lock.take() {
            Some(mut lock) => lock.release(),
            None => Ok(()),
        }
    }

    /// Fail unless a live lock of the required kind is held.
    pub(crate) fn require_lock(&self, exclusive: bool) -> Result<()> {
        let Some(lock) = &self.lock else {
            return Err(ArcaError::NotLocked(if exclusive {
                "exclusive"
            } else {
                "shared or exclusive"
            }));
        };
        lock.check()?;
        if exclusive && !lock.is_exclusive() {
            return Err(ArcaError::NotLocked("exclusive"));
        }
        Ok(())
    }

    fn lock_is_lost(&self) -> bool {
        self.lock.as_ref().is_some_and(Lock::is_lost)
    }

    // ----- write path -----

    fn writer(&self, blob_type: BlobType) -> &PackWriter {
        match blob_type {
            BlobType::Data => &self.data_writer,
            BlobType::Tree => &self.tree_writer,
        }
    }

    fn writer_mut(&mut self, blob_type: BlobType) -> &mut PackWriter {
        match blob_type {
            BlobType::Data => &mut self.data_writer,
            BlobType::Tree => &mut self.tree_writer,
        }
    }

    /// Whether a blob is stored, buffered or being uploaded.
    pub fn has_blob(&self, handle: &BlobHandle) -> Result<bool> {
        Ok(self.index()?.contains(handle)
            || self.writer(handle.blob_type).contains(&handle.id)
            || self.uploading.contains(handle))
    }

    /// Store a blob unless identical content of the same type already
    /// exists. Returns the blob ID and whether it was newly added.
    pub fn write_blob(&mut self, blob_type: BlobType, data: &[u8]) -> Result<(BlobId, bool)> {
        self.require_lock(false)?;
        let id = BlobId::compute(self.crypto.blob_id_key(), data);
        let handle = BlobHandle::new(id, blob_type);
        if self.has_blob(&handle)? {
            self.stats.blobs_deduplicated += 1;
            return Ok((id, false));
        }

        let uncompressed_length = u32::try_from(data.len())
            .map_err(|_| ArcaError::Other(format!("blob of {} bytes is too large", data.len())))?;
        let stored = encode_blob(&handle, data, self.compression, self.crypto.as_ref())?;
        self.buffer_stored_blob(handle, &stored, uncompressed_length)?;
        self.stats.blobs_new += 1;
        self.stats.bytes_new += data.len() as u64;
        Ok((id, true))
    }

    /// Add already encoded blob bytes to the matching pack writer, skipping
    /// the index check. Used when repacking live blobs out of old packs.
    pub(crate) fn buffer_stored_blob(
        &mut self,
        handle: BlobHandle,
        stored: &[u8],
        uncompressed_length: u32,
    ) -> Result<()> {
        let writer = self.writer_mut(handle.blob_type);
        if writer.contains(&handle.id) {
            return Ok(());
        }
        writer.add_blob(handle.id, stored, uncompressed_length)?;
        if writer.should_flush() {
            self.flush_writer(handle.blob_type)?;
        }
        Ok(())
    }

    /// Chunk a stream and store each chunk as a data blob. Returns the chunk
    /// IDs in stream order.
    pub fn save_file<R: Read>(&mut self, reader: R) -> Result<Vec<BlobId>> {
        self.require_lock(false)?;
        let chunker = self.config.chunker;
        let mut ids = Vec::new();
        for chunk in chunk_stream(reader, &chunker) {
            let chunk = chunk?;
            let (id, _) = self.write_blob(BlobType::Data, &chunk.data)?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Seal a writer and hand the pack to a background upload thread.
    /// Index entries are applied once the upload has been joined.
    fn flush_writer(&mut self, blob_type: BlobType) -> Result<()> {
        self.cap_uploads()?;

        let crypto = Arc::clone(&self.crypto);
        let SealedPack {
            pack_id,
            bytes,
            entries,
        } = self.writer_mut(blob_type).seal(crypto.as_ref())?;
        self.uploading.extend(entries.iter().map(PackHeaderEntry::handle));

        debug!(
            pack = %pack_id,
            pack_type = %blob_type,
            blobs = entries.len(),
            bytes = bytes.len(),
            "uploading pack"
        );
        let storage = Arc::clone(&self.storage);
        let key = pack_id.storage_key();
        let handle = std::thread::spawn(move || storage.put(&key, &bytes));
        self.uploads.push_back(PendingUpload {
            pack_id,
            entries,
            handle,
        });
        Ok(())
    }

    fn wait_one_upload(&mut self) -> Result<()> {
        let Some(upload) = self.uploads.pop_front() else {
            return Ok(());
        };
        for entry in &upload.entries {
            self.uploading.remove(&entry.handle());
        }
        let result = upload
            .handle
            .join()
            .map_err(|_| ArcaError::Other("pack upload thread panicked".into()))
            .and_then(|r| r);
        result.with_context(|| format!("uploading pack {}", upload.pack_id))?;

        self.index_mut()?.add_pack(upload.pack_id, &upload.entries);
        self.pending_delta.push(IndexPack {
            pack_id: upload.pack_id,
            blobs: upload.entries,
        });
        self.stats.packs_uploaded += 1;
        self.refresh_pack_targets();
        Ok(())
    }

    /// Join every upload; the first error is returned after all finished.
    fn wait_all_uploads(&mut self) -> Result<()> {
        let mut first_err = None;
        while !self.uploads.is_empty() {
            if let Err(e) = self.wait_one_upload() {
                warn!(error = %e, "pack upload failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn cap_uploads(&mut self) -> Result<()> {
        while self.uploads.len() >= self.engine.packs.max_in_flight_uploads.max(1) {
            self.wait_one_upload()?;
        }
        Ok(())
    }

    fn seal_open_writers(&mut self) -> Result<()> {
        if self.data_writer.has_pending() {
            self.flush_writer(BlobType::Data)?;
        }
        if self.tree_writer.has_pending() {
            self.flush_writer(BlobType::Tree)?;
        }
        Ok(())
    }

    /// Seal open packs, wait for every upload and write the index delta.
    pub fn flush(&mut self) -> Result<()> {
        self.require_lock(false)?;
        self.seal_open_writers()?;
        self.wait_all_uploads()?;
        self.save_index()
    }

    /// Best-effort cleanup after a failed locked session: packs that made
    /// it to storage get indexed unless the lock was lost meanwhile.
    pub fn flush_on_abort(&mut self) {
        if let Err(e) = self.seal_open_writers() {
            warn!(error = %e, "flush_on_abort: failed to seal open packs");
        }
        if let Err(e) = self.wait_all_uploads() {
            warn!(error = %e, "flush_on_abort: some pack uploads failed");
        }
        if self.lock.is_none() || self.lock_is_lost() {
            warn!(
                packs = self.pending_delta.len(),
                "flush_on_abort: lock not held, leaving uploaded packs for index rebuild"
            );
            return;
        }
        if let Err(e) = self.save_index() {
            warn!(error = %e, "flush_on_abort: failed to save index");
        }
    }

    /// Persist packs uploaded since the last save as a new index file.
    fn save_index(&mut self) -> Result<()> {
        if self.pending_delta.is_empty() {
            return Ok(());
        }
        let generation = self.index_generation + 1;
        let file = IndexFile {
            generation,
            supersedes: Vec::new(),
            packs: std::mem::take(&mut self.pending_delta),
        };
        match index::write_index_file(self.storage.as_ref(), self.crypto.as_ref(), &file) {
            Ok(id) => {
                self.index_generation = generation;
                self.loaded_index_files.push(id);
                Ok(())
            }
            Err(e) => {
                self.pending_delta = file.packs;
                Err(e)
            }
        }
    }

    // ----- read path -----

    /// Read a blob's plaintext. The content is verified against its ID.
    pub fn read_blob(&mut self, blob_type: BlobType, id: &BlobId) -> Result<Vec<u8>> {
        let handle = BlobHandle::new(*id, blob_type);
        if let Some(cached) = self.blob_cache.get(&handle) {
            return Ok(cached.to_vec());
        }
        if self.uploading.contains(&handle) {
            self.wait_all_uploads()?;
        }
        if let Some(plaintext) = self.read_buffered(&handle)? {
            return Ok(plaintext);
        }

        let plaintext = match self.read_indexed(&handle) {
            Err(e) if e.is_not_found() => {
                warn!(blob = %handle, error = %e, "pack missing, rebuilding index");
                self.rebuild_index(false)?;
                self.read_indexed(&handle).map_err(|retry_err| {
                    if retry_err.is_not_found()
                        || matches!(retry_err.root(), ArcaError::BlobNotFound(_))
                    {
                        ArcaError::IndexInconsistent(format!(
                            "blob {handle} is not readable after an index rebuild: {retry_err}"
                        ))
                    } else {
                        retry_err
                    }
                })?
            }
            other => other?,
        };
        self.blob_cache.insert(handle, plaintext.clone());
        Ok(plaintext)
    }

    fn read_buffered(&self, handle: &BlobHandle) -> Result<Option<Vec<u8>>> {
        let writer = self.writer(handle.blob_type);
        let Some((stored, uncompressed_length)) = writer.stored_blob(&handle.id) else {
            return Ok(None);
        };
        decode_blob(
            handle,
            stored,
            Some(uncompressed_length as usize),
            self.crypto.as_ref(),
        )
        .map(Some)
    }

    fn read_indexed(&self, handle: &BlobHandle) -> Result<Vec<u8>> {
        let entry = index::lookup(self.index()?, handle)?;
        let stored = read_blob_from_pack(
            self.storage.as_ref(),
            &entry.pack_id,
            entry.offset,
            entry.length,
        )
        .with_context(|| format!("reading blob {handle} from pack {}", entry.pack_id))?;
        decode_blob(
            handle,
            &stored,
            Some(entry.uncompressed_length as usize),
            self.crypto.as_ref(),
        )
        .with_context(|| format!("decoding blob {handle} from pack {}", entry.pack_id))
    }

    /// Concatenate the content of data blobs, e.g. the chunks of a file.
    pub fn load_file(&mut self, ids: &[BlobId]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for id in ids {
            out.extend_from_slice(&self.read_blob(BlobType::Data, id)?);
        }
        Ok(out)
    }
}

/// Try every key file until one opens with `passphrase`.
fn unlock_master_key(storage: &dyn StorageBackend, passphrase: &str) -> Result<(String, MasterKey)> {
    let mut key_files = storage.list(KEYS_DIR)?;
    key_files.sort();
    if key_files.is_empty() {
        return Err(ArcaError::InvalidFormat("repository has no key files".into()));
    }
    for key in &key_files {
        let Some(data) = storage.get(key)? else {
            continue;
        };
        let encrypted = match EncryptedKey::from_bytes(&data) {
            Ok(encrypted) => encrypted,
            Err(e) => {
                warn!(key = %key, error = %e, "skipping malformed key file");
                continue;
            }
        };
        match MasterKey::from_encrypted(&encrypted, passphrase) {
            Ok(master) => {
                let id = arca_storage::paths::object_name(key).to_string();
                return Ok((id, master));
            }
            Err(ArcaError::DecryptionFailed) => continue,
            Err(e) => warn!(key = %key, error = %e, "cannot use key file"),
        }
    }
    Err(ArcaError::WrongPassphrase)
}
