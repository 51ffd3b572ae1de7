//! Host identity used in lock records, key files and snapshots.

/// Return the system hostname, or `"unknown"` if it cannot be determined.
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".into())
}

/// Name of the effective user, falling back to `$USER` and then the numeric uid.
pub fn username() -> String {
    let uid = nix::unistd::Uid::effective();
    match nix::unistd::User::from_uid(uid) {
        Ok(Some(user)) => user.name,
        _ => std::env::var("USER").unwrap_or_else(|_| uid.to_string()),
    }
}

pub fn pid() -> u32 {
    std::process::id()
}

/// Whether a process with this PID exists on the local host.
///
/// Signal 0 performs the permission and existence checks without delivering
/// anything. `EPERM` means the process exists but belongs to someone else.
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(process_alive(pid()));
    }

    #[test]
    fn invalid_pids_are_not_alive() {
        assert!(!process_alive(0));
        assert!(!process_alive(u32::MAX));
    }

    #[test]
    fn identity_is_never_empty() {
        assert!(!hostname().is_empty());
        assert!(!username().is_empty());
    }
}
