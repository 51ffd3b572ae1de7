use tracing::warn;

use arca_types::error::Result;

use super::Repository;

/// Run a repository mutation while holding a lock.
///
/// On success the open packs and the index delta are flushed before the
/// lock is released. On failure, packs that reached storage are indexed on
/// a best-effort basis (see [`Repository::flush_on_abort`]). The release is
/// always attempted; a release error is only reported when the action
/// itself succeeded.
pub fn with_write_session<T>(
    repo: &mut Repository,
    exclusive: bool,
    action: impl FnOnce(&mut Repository) -> Result<T>,
) -> Result<T> {
    let already_locked = repo.is_locked();
    if exclusive {
        repo.lock_exclusive()?;
    } else {
        repo.lock_shared()?;
    }

    let result = action(repo).and_then(|value| repo.flush().map(|()| value));
    if result.is_err() {
        repo.flush_on_abort();
    }
    if already_locked {
        return result;
    }

    match repo.unlock() {
        Ok(()) => result,
        Err(release_err) => {
            if result.is_err() {
                warn!(error = %release_err, "failed to release repository lock");
                result
            } else {
                Err(release_err)
            }
        }
    }
}
