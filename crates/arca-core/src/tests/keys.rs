use arca_types::{ArcaError, BlobType};

use crate::repo::{Repository, with_write_session};
use crate::testutil::{PASSPHRASE, memory_repo, open_repo, test_engine_config};

#[test]
fn added_key_opens_the_same_repository() {
    let (storage, mut repo) = memory_repo();
    let (id, _) = with_write_session(&mut repo, false, |repo| {
        repo.write_blob(BlobType::Data, b"shared content")
    })
    .unwrap();

    let new_id = repo.add_key("second passphrase").unwrap();
    let keys = repo.list_keys().unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys.iter().filter(|k| k.current).count(), 1);
    assert!(keys.iter().any(|k| k.id == new_id && !k.current));

    let mut other =
        Repository::open(storage.clone(), &test_engine_config(), "second passphrase").unwrap();
    assert_eq!(other.key_id(), new_id);
    assert_eq!(
        other.read_blob(BlobType::Data, &id).unwrap(),
        b"shared content"
    );
}

#[test]
fn remove_key_guards() {
    let (storage, mut repo) = memory_repo();
    let current = repo.key_id().to_string();
    let extra = repo.add_key("extra").unwrap();

    assert!(matches!(
        repo.remove_key(&extra),
        Err(ArcaError::NotLocked("exclusive"))
    ));

    repo.lock_exclusive().unwrap();
    assert!(repo.remove_key(&current).is_err());
    assert!(matches!(
        repo.remove_key("0000"),
        Err(ArcaError::NotFound(_))
    ));
    repo.remove_key(&extra).unwrap();
    repo.unlock().unwrap();

    assert_eq!(storage.count("keys/"), 1);
    let err = Repository::open(storage, &test_engine_config(), "extra")
        .err()
        .unwrap();
    assert!(matches!(err, ArcaError::WrongPassphrase), "{err}");
}

#[test]
fn change_passphrase_replaces_current_key() {
    let (storage, mut repo) = memory_repo();
    let old_id = repo.key_id().to_string();

    let new_id = with_write_session(&mut repo, true, |repo| {
        repo.change_passphrase("rotated passphrase")
    })
    .unwrap();
    assert_ne!(new_id, old_id);
    assert_eq!(repo.key_id(), new_id);

    let keys = repo.list_keys().unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].current);

    let err = Repository::open(storage.clone(), &test_engine_config(), PASSPHRASE)
        .err()
        .unwrap();
    assert!(matches!(err, ArcaError::WrongPassphrase), "{err}");
    Repository::open(storage, &test_engine_config(), "rotated passphrase").unwrap();
}

#[test]
fn key_metadata_is_listed() {
    let (storage, repo) = memory_repo();
    let keys = repo.list_keys().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].id, repo.key_id());

    let reopened = open_repo(storage);
    assert_eq!(reopened.list_keys().unwrap(), keys);
}
