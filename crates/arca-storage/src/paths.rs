//! Repository object layout on the backend.

pub const CONFIG_KEY: &str = "config";
pub const KEYS_DIR: &str = "keys/";
pub const LOCKS_DIR: &str = "locks/";
pub const SNAPSHOTS_DIR: &str = "snapshots/";
pub const INDEX_DIR: &str = "index/";
pub const PACKS_DIR: &str = "packs/";

/// Directories created by `init` on backends that need them.
pub const REPO_DIRS: [&str; 5] = [KEYS_DIR, LOCKS_DIR, SNAPSHOTS_DIR, INDEX_DIR, PACKS_DIR];

pub fn lock_key(lock_id: &str) -> String {
    format!("{LOCKS_DIR}{lock_id}")
}

pub fn index_key(index_id: &str) -> String {
    format!("{INDEX_DIR}{index_id}")
}

/// The object name below its directory: `locks/abcd` → `abcd`.
pub fn object_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_strips_directories() {
        assert_eq!(object_name("locks/abcd"), "abcd");
        assert_eq!(object_name("packs/ab/abcdef"), "abcdef");
        assert_eq!(object_name("config"), "config");
    }

    #[test]
    fn keys_are_prefixed() {
        assert_eq!(lock_key("x"), "locks/x");
        assert_eq!(index_key("y"), "index/y");
    }
}
