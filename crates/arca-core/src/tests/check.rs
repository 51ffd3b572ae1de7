use arca_storage::StorageBackend;
use arca_types::BlobType;

use crate::check::check_index;
use crate::index::Index;
use crate::repo::with_write_session;
use crate::testutil::memory_repo;

#[test]
fn consistent_repository_is_clean() {
    let (storage, mut repo) = memory_repo();
    with_write_session(&mut repo, false, |repo| repo.write_blob(BlobType::Data, b"data"))
        .unwrap();
    let report = check_index(storage.as_ref(), repo.index().unwrap()).unwrap();
    assert!(report.is_clean(), "{report:?}");
}

#[test]
fn reports_missing_and_unindexed_packs() {
    let (storage, mut repo) = memory_repo();
    with_write_session(&mut repo, false, |repo| repo.write_blob(BlobType::Data, b"data"))
        .unwrap();
    let index = repo.index().unwrap().as_ref().clone();
    let pack = *index.packs().next().unwrap();

    let unindexed = check_index(storage.as_ref(), &Index::new()).unwrap();
    assert_eq!(unindexed.unindexed_packs, vec![pack]);
    assert!(unindexed.missing_packs.is_empty());

    storage.delete(&pack.storage_key()).unwrap();
    let missing = check_index(storage.as_ref(), &index).unwrap();
    assert_eq!(missing.missing_packs, vec![pack]);
    assert!(!missing.is_clean());
}
