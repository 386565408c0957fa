//! The per-host single-connection lock (§4.6), grounded on
//! `original_source/lock.h`'s `lock_host`/`unlock_host` prototypes. The
//! original serializes this through a filesystem lock file; per REDESIGN
//! FLAGS this crate keeps the guarantee in-process instead (a
//! `HashSet<String>` behind a `Mutex`), since a single `meshtund` process
//! already owns every session it supervises.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::crypto::handshake::HostLock;

/// The set of host names currently holding the single-connection lock.
#[derive(Default)]
pub struct HostLockTable {
    held: Mutex<HashSet<String>>,
}

impl HostLockTable {
    /// Build an empty lock table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Release the lock for `host`, if held.
    pub fn release(&self, host: &str) {
        let mut held = self.held.lock().expect("host lock table mutex poisoned");
        held.remove(host);
    }

    /// Acquire the lock and return an RAII guard that releases it on
    /// drop, guaranteeing release on every exit path (§4.6: "the parent
    /// releases the lock on exit").
    pub fn acquire_guard(self: &Arc<Self>, host: &str) -> Option<HostLockGuard> {
        if HostLock::acquire(self.as_ref(), host) {
            Some(HostLockGuard {
                table: Arc::clone(self),
                host: host.to_string(),
            })
        } else {
            None
        }
    }
}

impl HostLock for HostLockTable {
    /// Attempt to acquire the lock for `host`. Returns `false` if another
    /// session already holds it.
    fn acquire(&self, host: &str) -> bool {
        let mut held = self.held.lock().expect("host lock table mutex poisoned");
        held.insert(host.to_string())
    }
}

/// Releases its host's lock when dropped.
pub struct HostLockGuard {
    table: Arc<HostLockTable>,
    host: String,
}

impl Drop for HostLockGuard {
    fn drop(&mut self) {
        self.table.release(&self.host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_for_the_same_host_is_denied() {
        let table = HostLockTable::new();
        assert!(HostLock::acquire(table.as_ref(), "alice"));
        assert!(!HostLock::acquire(table.as_ref(), "alice"));
    }

    #[test]
    fn release_frees_the_host_for_reacquisition() {
        let table = HostLockTable::new();
        assert!(HostLock::acquire(table.as_ref(), "alice"));
        table.release("alice");
        assert!(HostLock::acquire(table.as_ref(), "alice"));
    }

    #[test]
    fn guard_releases_on_drop() {
        let table = HostLockTable::new();
        {
            let _guard = table.acquire_guard("alice").unwrap();
            assert!(!HostLock::acquire(table.as_ref(), "alice"));
        }
        assert!(HostLock::acquire(table.as_ref(), "alice"));
    }

    #[test]
    fn distinct_hosts_do_not_contend() {
        let table = HostLockTable::new();
        assert!(HostLock::acquire(table.as_ref(), "alice"));
        assert!(HostLock::acquire(table.as_ref(), "bob"));
    }
}
