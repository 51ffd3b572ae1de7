use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arca_storage::{MemoryBackend, StorageBackend};
use arca_storage::paths::index_key;
use arca_types::{ArcaError, BlobHandle, BlobId, BlobType, SnapshotId};

use crate::check::check_index;
use crate::prune::{delete_packs, prune};
use crate::repo::{Repository, with_write_session};
use crate::snapshot::{Node, Snapshot, Tree};
use crate::testutil::{
    FaultyBackend, PASSPHRASE, memory_repo, open_repo, random_bytes, test_engine_config,
};

/// Store one file in its own snapshot. Returns the snapshot and chunk IDs.
fn backup(repo: &mut Repository, data: &[u8]) -> (SnapshotId, Vec<BlobId>) {
    with_write_session(repo, false, |repo| {
        let content = repo.save_file(Cursor::new(data.to_vec()))?;
        let root = repo.save_tree(&Tree::new(vec![Node::file(
            "file",
            data.len() as u64,
            content.clone(),
        )])?)?;
        let id = repo.save_snapshot(&Snapshot::new(vec!["/".into()], root))?;
        Ok((id, content))
    })
    .unwrap()
}

fn data_handles(ids: &[BlobId]) -> Vec<BlobHandle> {
    ids.iter().map(|id| BlobHandle::new(*id, BlobType::Data)).collect()
}

#[test]
fn prune_requires_exclusive_lock() {
    let (_storage, mut repo) = memory_repo();
    assert!(matches!(prune(&mut repo, false), Err(ArcaError::NotLocked(_))));
    repo.lock_shared().unwrap();
    assert!(matches!(
        prune(&mut repo, false),
        Err(ArcaError::NotLocked("exclusive"))
    ));
    repo.unlock().unwrap();
}

#[test]
fn nothing_to_do_on_fully_referenced_repository() {
    let (storage, mut repo) = memory_repo();
    backup(&mut repo, &random_bytes(20_000, 1));
    let keys_before = storage.list("").unwrap();

    let stats = with_write_session(&mut repo, true, |repo| prune(repo, false)).unwrap();
    assert_eq!(stats.snapshots, 1);
    assert_eq!(stats.blobs_unused, 0);
    assert_eq!(stats.packs_deleted + stats.packs_repacked, 0);
    assert_eq!(storage.list("").unwrap(), keys_before);
}

#[test]
fn unreferenced_packs_are_deleted() {
    let (storage, mut repo) = memory_repo();
    let (keep_id, keep_chunks) = backup(&mut repo, &random_bytes(30_000, 1));
    let (drop_id, drop_chunks) = backup(&mut repo, &random_bytes(30_000, 2));

    with_write_session(&mut repo, true, |repo| repo.delete_snapshot(&drop_id)).unwrap();
    let stats = with_write_session(&mut repo, true, |repo| prune(repo, false)).unwrap();
    assert_eq!(stats.snapshots, 1);
    assert!(stats.packs_deleted >= 1);
    assert_eq!(stats.blobs_unused, drop_chunks.len() + 1);

    let mut reopened = open_repo(storage.clone());
    let index = reopened.index().unwrap().clone();
    for handle in data_handles(&drop_chunks) {
        assert!(!index.contains(&handle));
    }
    for handle in data_handles(&keep_chunks) {
        assert!(index.contains(&handle));
    }
    assert_eq!(reopened.load_file(&keep_chunks).unwrap(), random_bytes(30_000, 1));
    assert!(reopened.load_snapshot(&keep_id).is_ok());
    assert_eq!(storage.count("index/"), 1);
    assert!(check_index(storage.as_ref(), &index).unwrap().is_clean());
}

#[test]
fn sparse_pack_is_repacked() {
    let (storage, mut repo) = memory_repo();
    // One small live blob and one large dead blob in the same pack.
    let (small, big) = with_write_session(&mut repo, false, |repo| {
        let (small, _) = repo.write_blob(BlobType::Data, &random_bytes(500, 1))?;
        let (big, _) = repo.write_blob(BlobType::Data, &random_bytes(4000, 2))?;
        Ok((small, big))
    })
    .unwrap();
    let old_pack = repo
        .index()
        .unwrap()
        .get(&BlobHandle::new(small, BlobType::Data))
        .unwrap()
        .pack_id;

    with_write_session(&mut repo, false, |repo| {
        let root = repo.save_tree(&Tree::new(vec![Node::file("small", 500, vec![small])])?)?;
        repo.save_snapshot(&Snapshot::new(vec!["/".into()], root))
    })
    .unwrap();

    let dry = with_write_session(&mut repo, true, |repo| prune(repo, true)).unwrap();
    assert_eq!(dry.packs_repacked, 1);
    assert!(storage.exists(&old_pack.storage_key()).unwrap());

    let stats = with_write_session(&mut repo, true, |repo| prune(repo, false)).unwrap();
    assert_eq!(stats, dry);
    assert_eq!(stats.blobs_repacked, 1);
    assert!(!storage.exists(&old_pack.storage_key()).unwrap());

    let mut reopened = open_repo(storage.clone());
    let entry = *reopened
        .index()
        .unwrap()
        .get(&BlobHandle::new(small, BlobType::Data))
        .unwrap();
    assert_ne!(entry.pack_id, old_pack);
    assert!(!reopened.index().unwrap().contains(&BlobHandle::new(big, BlobType::Data)));
    assert_eq!(
        reopened.read_blob(BlobType::Data, &small).unwrap(),
        random_bytes(500, 1)
    );
}

#[test]
fn dry_run_changes_nothing() {
    let (storage, mut repo) = memory_repo();
    backup(&mut repo, &random_bytes(10_000, 1));
    let (gone, _) = backup(&mut repo, &random_bytes(10_000, 2));
    with_write_session(&mut repo, true, |repo| repo.delete_snapshot(&gone)).unwrap();
    let keys_before = storage.list("").unwrap();

    let stats = with_write_session(&mut repo, true, |repo| prune(repo, true)).unwrap();
    assert!(stats.blobs_unused > 0);
    assert_eq!(storage.list("").unwrap(), keys_before);
}

#[test]
fn referenced_blob_missing_from_index_aborts() {
    let (storage, mut repo) = memory_repo();
    with_write_session(&mut repo, false, |repo| {
        let root = repo.save_tree(&Tree::new(vec![Node::file(
            "ghost",
            1,
            vec![BlobId([0x99; 32])],
        )])?)?;
        repo.save_snapshot(&Snapshot::new(vec!["/".into()], root))
    })
    .unwrap();
    let keys_before = storage.list("").unwrap();

    let err = with_write_session(&mut repo, true, |repo| prune(repo, false)).unwrap_err();
    assert!(matches!(err, ArcaError::IndexInconsistent(_)), "{err}");
    assert_eq!(storage.list("").unwrap(), keys_before);
}

#[test]
fn unindexed_packs_are_never_deleted() {
    let (storage, mut repo) = memory_repo();
    backup(&mut repo, &random_bytes(10_000, 1));
    let (gone, _) = backup(&mut repo, &random_bytes(10_000, 2));
    with_write_session(&mut repo, true, |repo| repo.delete_snapshot(&gone)).unwrap();

    // A pack written by a session that never got to save its index.
    let stray = {
        let mut other = open_repo(storage.clone());
        other.lock_shared().unwrap();
        let (id, _) = other.write_blob(BlobType::Data, b"stray blob").unwrap();
        other.flush().unwrap();
        let last = other.loaded_index_files().last().unwrap().clone();
        storage.delete(&index_key(&last)).unwrap();
        let pack = other
            .index()
            .unwrap()
            .get(&BlobHandle::new(id, BlobType::Data))
            .unwrap()
            .pack_id;
        other.unlock().unwrap();
        pack
    };

    with_write_session(&mut repo, true, |repo| prune(repo, false)).unwrap();
    assert!(storage.exists(&stray.storage_key()).unwrap());
}

#[test]
fn duplicate_packs_from_concurrent_sessions_are_deleted() {
    let (storage, mut first) = memory_repo();
    let mut second = open_repo(storage.clone());
    let data = random_bytes(40_000, 3);
    let (first_id, content) = backup(&mut first, &data);
    let (second_id, _) = backup(&mut second, &data);
    let packs_before = storage.count("packs/");

    let mut repo = open_repo(storage.clone());
    let report = check_index(storage.as_ref(), repo.index().unwrap()).unwrap();
    let duplicates = report.unindexed_packs.len();
    assert!(duplicates > 0);

    let stats = with_write_session(&mut repo, true, |repo| prune(repo, false)).unwrap();
    assert_eq!(stats.packs_deleted, duplicates);
    assert_eq!(stats.packs_repacked, 0);
    assert_eq!(storage.count("packs/"), packs_before - duplicates);

    let mut reopened = open_repo(storage.clone());
    let report = check_index(storage.as_ref(), reopened.index().unwrap()).unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert!(reopened.load_snapshot(&first_id).is_ok());
    assert!(reopened.load_snapshot(&second_id).is_ok());
    assert_eq!(reopened.load_file(&content).unwrap(), data);

    let again = with_write_session(&mut reopened, true, |repo| prune(repo, false)).unwrap();
    assert_eq!(again.packs_deleted, 0);
}

#[test]
fn pack_deletion_stops_once_lock_is_lost() {
    let memory = Arc::new(MemoryBackend::new());
    let faulty = Arc::new(FaultyBackend::new(memory.clone()));
    let mut config = test_engine_config();
    config.locks.refresh_interval_secs = 1;
    config.locks.max_refresh_failures = 0;
    let mut repo = Repository::init(faulty.clone(), &config, PASSPHRASE).unwrap();
    let (_, chunks) = backup(&mut repo, &random_bytes(5_000, 4));
    let pack = repo
        .index()
        .unwrap()
        .get(&BlobHandle::new(chunks[0], BlobType::Data))
        .unwrap()
        .pack_id;

    repo.lock_exclusive().unwrap();
    faulty.fail_puts_under("locks/");
    let deadline = Instant::now() + Duration::from_secs(10);
    while repo.require_lock(true).is_ok() {
        assert!(Instant::now() < deadline, "lock never marked lost");
        std::thread::sleep(Duration::from_millis(20));
    }

    let err = delete_packs(&repo, &[pack]).unwrap_err();
    assert!(matches!(err, ArcaError::LockLost(_)), "{err}");
    assert!(memory.exists(&pack.storage_key()).unwrap());

    faulty.heal();
    repo.unlock().unwrap();
}
