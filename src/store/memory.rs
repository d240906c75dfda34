//! In-memory backend for tests and ephemeral use.

use std::{
    collections::BTreeMap,
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use super::{Entries, PrefsBackend, StoreError, StoreName};

/// Keeps committed documents in a map. Commits can be switched to fail so
/// callers can exercise their commit-failure paths.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    stores: RwLock<BTreeMap<StoreName, Entries>>,
    fail_commits: AtomicBool,
    commits: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// While enabled, every commit is rejected and nothing is stored.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }
}

impl PrefsBackend for MemoryBackend {
    fn load(&self, name: &StoreName) -> Result<Option<Entries>, StoreError> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        Ok(stores.get(name).cloned())
    }

    fn commit(&self, name: &StoreName, entries: &Entries) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::CommitRejected {
                store: name.to_string(),
            });
        }
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        stores.insert(name.clone(), entries.clone());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
