use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use arca_core::check::check_index;
use arca_core::config::{ChunkerConfig, EngineConfig, LockConfig, PackConfig};
use arca_core::prune::prune;
use arca_core::repo::{LockRecord, with_write_session};
use arca_core::snapshot::{Node, Snapshot, SnapshotFilter, Tree};
use arca_core::{ArcaError, Repository, StorageBackend};
use arca_crypto::key::KdfCost;
use arca_storage::LocalBackend;
use arca_types::{BlobId, SnapshotId};

const PASSPHRASE: &str = "lifecycle passphrase";

fn engine_config() -> EngineConfig {
    EngineConfig {
        chunker: ChunkerConfig {
            min_size: 512,
            avg_size: 2048,
            max_size: 8192,
        },
        packs: PackConfig {
            min_pack_size: 32 * 1024,
            max_pack_size: 128 * 1024,
            ..PackConfig::default()
        },
        locks: LockConfig {
            stale_after_secs: 60,
            refresh_interval_secs: 10,
            ..LockConfig::default()
        },
        kdf: KdfCost {
            time_cost: 1,
            memory_cost: 256,
            parallelism: 1,
        },
        ..EngineConfig::default()
    }
}

fn local_storage(dir: &tempfile::TempDir) -> Arc<dyn StorageBackend> {
    Arc::new(LocalBackend::new(dir.path()).unwrap())
}

fn payload(len: usize, seed: u64) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut buf);
    buf
}

/// Store `data` as `/docs/report.bin` and snapshot it.
fn backup(repo: &mut Repository, data: &[u8]) -> (SnapshotId, BlobId) {
    with_write_session(repo, false, |repo| {
        let content = repo.save_file(Cursor::new(data))?;
        let docs = repo.save_tree(&Tree::new(vec![Node::file(
            "report.bin",
            data.len() as u64,
            content,
        )])?)?;
        let root = repo.save_tree(&Tree::new(vec![Node::dir("docs", docs)])?)?;
        let id = repo.save_snapshot(&Snapshot::new(vec!["/docs".into()], root))?;
        Ok((id, root))
    })
    .unwrap()
}

#[test]
fn identical_content_is_stored_once_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let data = payload(40960, 7);

    let mut first = Repository::init(local_storage(&dir), &engine_config(), PASSPHRASE).unwrap();
    let (_, first_root) = backup(&mut first, &data);
    assert!(first.stats().blobs_new > 10);
    drop(first);

    let mut second = Repository::open(local_storage(&dir), &engine_config(), PASSPHRASE).unwrap();
    let (_, second_root) = backup(&mut second, &data);
    assert_eq!(first_root, second_root);
    assert_eq!(second.stats().blobs_new, 0);
    assert_eq!(second.stats().packs_uploaded, 0);

    let snapshots = second.list_snapshots(&SnapshotFilter::default()).unwrap();
    assert_eq!(snapshots.len(), 2);
}

#[test]
fn backup_prune_and_restore() {
    let dir = tempfile::tempdir().unwrap();
    let kept = payload(30_000, 1);
    let dropped = payload(30_000, 2);

    let mut repo = Repository::init(local_storage(&dir), &engine_config(), PASSPHRASE).unwrap();
    let (kept_id, _) = backup(&mut repo, &kept);
    let (dropped_id, _) = backup(&mut repo, &dropped);

    with_write_session(&mut repo, true, |repo| {
        repo.delete_snapshot(&dropped_id)?;
        prune(repo, false)
    })
    .unwrap();

    let mut reopened = Repository::open(local_storage(&dir), &engine_config(), PASSPHRASE).unwrap();
    let report = check_index(
        reopened.storage().as_ref(),
        reopened.index().unwrap(),
    )
    .unwrap();
    assert!(report.is_clean(), "{report:?}");

    let snapshot = reopened.load_snapshot(&kept_id).unwrap();
    let docs = reopened.load_tree(&snapshot.tree).unwrap();
    let subtree = docs.find("docs").unwrap().subtree.unwrap();
    let files = reopened.load_tree(&subtree).unwrap();
    let file = files.find("report.bin").unwrap();
    assert_eq!(reopened.load_file(&file.content).unwrap(), kept);

    assert!(matches!(
        reopened.load_snapshot(&dropped_id),
        Err(ArcaError::SnapshotNotFound(_))
    ));
}

#[test]
fn exclusive_lock_blocks_second_handle() {
    let dir = tempfile::tempdir().unwrap();
    let mut a = Repository::init(local_storage(&dir), &engine_config(), PASSPHRASE).unwrap();
    let mut b = Repository::open(local_storage(&dir), &engine_config(), PASSPHRASE).unwrap();

    a.lock_exclusive().unwrap();
    let err = b.lock_shared().unwrap_err();
    assert!(matches!(err, ArcaError::Locked(_)), "{err}");

    a.unlock().unwrap();
    b.lock_exclusive().unwrap();
    b.unlock().unwrap();
}

#[test]
fn stale_lock_from_crashed_process_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let mut repo = Repository::init(local_storage(&dir), &engine_config(), PASSPHRASE).unwrap();

    let stale_after = Duration::from_secs(engine_config().locks.stale_after_secs);
    let age = chrono::Duration::from_std(stale_after * 2).unwrap();
    let crashed = LockRecord {
        time: Utc::now() - age,
        exclusive: true,
        hostname: "crashed-host".into(),
        username: "backup".into(),
        pid: 1,
        lock_id: "ab".repeat(32),
    };
    let key = repo.lock_manager().write_record(&crashed).unwrap();

    repo.lock_exclusive().unwrap();
    assert_eq!(repo.lock_manager().remove_stale_locks().unwrap(), 1);
    assert!(!repo.storage().exists(&key).unwrap());
    repo.unlock().unwrap();
}
