//! Named, durable string key-value stores.
//!
//! A [`PreferenceStore`] hands out access to any number of named stores. Each
//! store is loaded lazily from a [`PrefsBackend`] on first access and cached
//! in-process for reads. Writes re-read the durable document, stage the
//! change on a copy, commit it, and only then make it visible, so a failed
//! commit leaves both the durable document and the in-process view at the
//! pre-write value.

use std::{
    collections::{BTreeMap, btree_map},
    fmt, io,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, warn};

mod file;
mod memory;

pub use file::{FileBackend, PersistedStore, SCHEMA_VERSION};
pub use memory::MemoryBackend;

/// Entries of a single store, kept sorted so persisted documents are stable.
pub type Entries = BTreeMap<String, String>;

pub const STORE_NAME_MAX_LEN: usize = 128;

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    SerdeJson(serde_json::Error),
    InvalidStoreName { name: String, reason: &'static str },
    SchemaVersionMismatch { store: String, expected: u32, got: u32 },
    CommitRejected { store: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::SerdeJson(e) => write!(f, "json error: {e}"),
            Self::InvalidStoreName { name, reason } => {
                write!(f, "invalid store name {name:?}: {reason}")
            }
            Self::SchemaVersionMismatch {
                store,
                expected,
                got,
            } => write!(
                f,
                "store {store}: schema_version mismatch: expected {expected}, got {got}"
            ),
            Self::CommitRejected { store } => write!(f, "store {store}: commit rejected"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::SerdeJson(e) => Some(e),
            Self::InvalidStoreName { .. }
            | Self::SchemaVersionMismatch { .. }
            | Self::CommitRejected { .. } => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::SerdeJson(value)
    }
}

/// A validated store name. Store names become file names, so only a
/// conservative character set is accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreName(String);

impl StoreName {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let invalid = |reason| StoreError::InvalidStoreName {
            name: raw.to_string(),
            reason,
        };
        if raw.is_empty() {
            return Err(invalid("name is empty"));
        }
        if raw.len() > STORE_NAME_MAX_LEN {
            return Err(invalid("name is longer than 128 bytes"));
        }
        if raw.starts_with('.') {
            return Err(invalid("name must not start with '.'"));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        {
            return Err(invalid("name may only contain [A-Za-z0-9._-]"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persistence seam behind [`PreferenceStore`].
///
/// A backend stores whole documents: `commit` durably replaces everything
/// previously committed under `name`.
pub trait PrefsBackend: Send + Sync {
    /// Load a store. `Ok(None)` means the store has never been committed.
    fn load(&self, name: &StoreName) -> Result<Option<Entries>, StoreError>;

    /// Durably replace the store's document with `entries`.
    fn commit(&self, name: &StoreName, entries: &Entries) -> Result<(), StoreError>;
}

pub struct PreferenceStore {
    backend: Arc<dyn PrefsBackend>,
    cache: Mutex<BTreeMap<StoreName, Entries>>,
}

impl PreferenceStore {
    pub fn new(backend: Arc<dyn PrefsBackend>) -> Self {
        Self {
            backend,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// Stores persisted as JSON documents under `<data_dir>/shared_prefs/`.
    pub fn open_dir(data_dir: &Path) -> Self {
        Self::new(Arc::new(FileBackend::new(data_dir)))
    }

    /// Returns the value stored under `key`, or `default` when the key is
    /// absent. Unreadable stores also resolve to `default`.
    pub fn get(&self, store: &str, key: &str, default: &str) -> String {
        match self.try_get(store, key) {
            Ok(Some(value)) => value,
            Ok(None) => default.to_string(),
            Err(err) => {
                warn!(store, key, error = %err, "read failed, using default");
                default.to_string()
            }
        }
    }

    pub fn try_get(&self, store: &str, key: &str) -> Result<Option<String>, StoreError> {
        let name = StoreName::parse(store)?;
        let mut cache = self.lock_cache();
        let entries = self.loaded(&mut cache, &name)?;
        Ok(entries.get(key).cloned())
    }

    pub fn contains(&self, store: &str, key: &str) -> bool {
        matches!(self.try_get(store, key), Ok(Some(_)))
    }

    /// Snapshot of every entry in `store`; empty if the store is unreadable.
    pub fn entries(&self, store: &str) -> Entries {
        match self.try_entries(store) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(store, error = %err, "read failed, returning no entries");
                Entries::new()
            }
        }
    }

    pub fn try_entries(&self, store: &str) -> Result<Entries, StoreError> {
        let name = StoreName::parse(store)?;
        let mut cache = self.lock_cache();
        Ok(self.loaded(&mut cache, &name)?.clone())
    }

    /// Writes `value` under `key` and commits it. Returns whether the commit
    /// succeeded; the reason for a failure is logged, never retried.
    pub fn put(&self, store: &str, key: &str, value: &str) -> bool {
        match self.try_put(store, key, value) {
            Ok(()) => true,
            Err(err) => {
                warn!(store, key, error = %err, "commit failed");
                false
            }
        }
    }

    pub fn try_put(&self, store: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.stage_and_commit(store, |entries| {
            if entries.get(key).map(String::as_str) == Some(value) {
                return false;
            }
            entries.insert(key.to_string(), value.to_string());
            true
        })
    }

    pub fn remove(&self, store: &str, key: &str) -> bool {
        match self.try_remove(store, key) {
            Ok(()) => true,
            Err(err) => {
                warn!(store, key, error = %err, "commit failed");
                false
            }
        }
    }

    /// Removing an absent key commits nothing and succeeds.
    pub fn try_remove(&self, store: &str, key: &str) -> Result<(), StoreError> {
        self.stage_and_commit(store, |entries| entries.remove(key).is_some())
    }

    /// Re-reads the store from the backend, applies `stage` to a copy and
    /// commits the copy if `stage` reports a change. Re-reading first keeps
    /// entries committed by other handles or processes since this handle
    /// loaded the store. The lock is held across the commit so in-process
    /// writers to the same store never lose each other's entries.
    fn stage_and_commit(
        &self,
        store: &str,
        stage: impl FnOnce(&mut Entries) -> bool,
    ) -> Result<(), StoreError> {
        let name = StoreName::parse(store)?;
        let mut cache = self.lock_cache();
        let current = self.backend.load(&name)?.unwrap_or_default();

        let mut staged = current.clone();
        if !stage(&mut staged) {
            debug!(store = %name, "no changes to commit");
            cache.insert(name, current);
            return Ok(());
        }

        if let Err(err) = self.backend.commit(&name, &staged) {
            cache.insert(name, current);
            return Err(err);
        }
        debug!(store = %name, entries = staged.len(), "committed");
        cache.insert(name, staged);
        Ok(())
    }

    fn loaded<'a>(
        &self,
        cache: &'a mut BTreeMap<StoreName, Entries>,
        name: &StoreName,
    ) -> Result<&'a mut Entries, StoreError> {
        match cache.entry(name.clone()) {
            btree_map::Entry::Occupied(entry) => Ok(entry.into_mut()),
            btree_map::Entry::Vacant(entry) => {
                let entries = self.backend.load(name)?.unwrap_or_default();
                debug!(store = %name, entries = entries.len(), "store loaded");
                Ok(entry.insert(entries))
            }
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, BTreeMap<StoreName, Entries>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn memory_store() -> (PreferenceStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (PreferenceStore::new(backend.clone()), backend)
    }

    #[test]
    fn missing_key_resolves_to_default() {
        let (store, _) = memory_store();
        assert_eq!(store.get("RedirectData", "text", ""), "");
        assert_eq!(store.get("RedirectData", "text", "fallback"), "fallback");
        assert_eq!(store.try_get("RedirectData", "text").unwrap(), None);
        assert!(!store.contains("RedirectData", "text"));
    }

    #[test]
    fn put_then_get_returns_value() {
        let (store, _) = memory_store();
        assert_eq!(store.get("RedirectData", "text", ""), "");
        assert!(store.put("RedirectData", "text", "hello"));
        assert_eq!(store.get("RedirectData", "text", ""), "hello");
        assert!(store.contains("RedirectData", "text"));
    }

    #[test]
    fn overwrite_keeps_last_value() {
        let (store, _) = memory_store();
        assert!(store.put("s", "k", "v1"));
        assert!(store.put("s", "k", "v2"));
        assert_eq!(store.get("s", "k", ""), "v2");
        assert_eq!(store.entries("s").len(), 1);
    }

    #[test]
    fn repeated_put_is_idempotent_and_commits_once() {
        let (store, backend) = memory_store();
        assert!(store.put("s", "k", "v"));
        assert!(store.put("s", "k", "v"));
        assert_eq!(store.get("s", "k", ""), "v");
        assert_eq!(backend.commit_count(), 1);
    }

    #[test]
    fn failed_commit_keeps_previous_value() {
        let (store, backend) = memory_store();
        assert!(store.put("RedirectData", "text", "before"));

        backend.fail_commits(true);
        assert!(!store.put("RedirectData", "text", "after"));
        assert_eq!(store.get("RedirectData", "text", ""), "before");

        let err = store.try_put("RedirectData", "text", "after").unwrap_err();
        assert!(matches!(err, StoreError::CommitRejected { .. }));

        backend.fail_commits(false);
        let reopened = PreferenceStore::new(backend.clone());
        assert_eq!(reopened.get("RedirectData", "text", ""), "before");
    }

    #[test]
    fn failed_first_commit_leaves_store_empty() {
        let (store, backend) = memory_store();
        backend.fail_commits(true);
        assert!(!store.put("s", "k", "v"));
        assert_eq!(store.get("s", "k", "none"), "none");
        assert!(store.entries("s").is_empty());
    }

    #[test]
    fn put_after_another_handle_wrote_reaches_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let first = PreferenceStore::open_dir(tmp.path());
        let second = PreferenceStore::open_dir(tmp.path());

        assert!(first.put("s", "k", "x"));
        assert!(second.put("s", "k", "y"));
        assert!(first.put("s", "k", "x"));

        assert_eq!(first.get("s", "k", ""), "x");
        let fresh = PreferenceStore::open_dir(tmp.path());
        assert_eq!(fresh.get("s", "k", ""), "x");
    }

    #[test]
    fn put_keeps_entries_committed_by_another_handle() {
        let tmp = tempfile::tempdir().unwrap();
        let first = PreferenceStore::open_dir(tmp.path());
        let second = PreferenceStore::open_dir(tmp.path());

        assert_eq!(first.get("s", "a", "unset"), "unset");
        assert!(second.put("s", "other", "kept"));
        assert!(first.put("s", "a", "1"));

        let expected: Entries = [("a", "1"), ("other", "kept")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(first.entries("s"), expected);
        assert_eq!(PreferenceStore::open_dir(tmp.path()).entries("s"), expected);
    }

    #[test]
    fn concurrent_writers_on_one_handle_keep_every_key() {
        const WRITERS: usize = 8;

        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(PreferenceStore::open_dir(tmp.path()));

        std::thread::scope(|scope| {
            for i in 0..WRITERS {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    assert!(store.put("shared", &format!("key-{i}"), &i.to_string()));
                });
            }
        });

        let entries = PreferenceStore::open_dir(tmp.path()).entries("shared");
        assert_eq!(entries.len(), WRITERS);
        for i in 0..WRITERS {
            assert_eq!(entries.get(&format!("key-{i}")), Some(&i.to_string()));
        }
    }

    #[test]
    fn stores_are_independent() {
        let (store, _) = memory_store();
        assert!(store.put("a", "k", "1"));
        assert!(store.put("b", "k", "2"));
        assert_eq!(store.get("a", "k", ""), "1");
        assert_eq!(store.get("b", "k", ""), "2");
    }

    #[test]
    fn writes_to_different_keys_are_all_kept() {
        let (store, backend) = memory_store();
        assert!(store.put("s", "a", "1"));
        assert!(store.put("s", "b", "2"));

        let reopened = PreferenceStore::new(backend);
        let expected: Entries = [("a", "1"), ("b", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(reopened.entries("s"), expected);
    }

    #[test]
    fn remove_deletes_key_and_absent_key_is_ok() {
        let (store, backend) = memory_store();
        assert!(store.put("s", "k", "v"));
        assert!(store.remove("s", "k"));
        assert_eq!(store.get("s", "k", "gone"), "gone");
        assert!(store.remove("s", "k"));
        assert_eq!(backend.commit_count(), 2);
    }

    #[test]
    fn failed_remove_keeps_entry() {
        let (store, backend) = memory_store();
        assert!(store.put("s", "k", "v"));
        backend.fail_commits(true);
        assert!(!store.remove("s", "k"));
        assert_eq!(store.get("s", "k", ""), "v");
    }

    #[test]
    fn invalid_store_name_reads_default_and_rejects_writes() {
        let (store, backend) = memory_store();
        assert_eq!(store.get("../etc", "k", "d"), "d");
        assert!(!store.put("../etc", "k", "v"));
        assert!(matches!(
            store.try_put("", "k", "v").unwrap_err(),
            StoreError::InvalidStoreName { .. }
        ));
        assert_eq!(backend.commit_count(), 0);
    }

    #[test]
    fn store_name_validation() {
        assert!(StoreName::parse("RedirectData").is_ok());
        assert!(StoreName::parse("com.example_prefs-v2").is_ok());
        assert!(StoreName::parse("").is_err());
        assert!(StoreName::parse(".hidden").is_err());
        assert!(StoreName::parse("a/b").is_err());
        assert!(StoreName::parse("a\\b").is_err());
        assert!(StoreName::parse("naïve").is_err());
        assert!(StoreName::parse(&"x".repeat(STORE_NAME_MAX_LEN)).is_ok());
        assert!(StoreName::parse(&"x".repeat(STORE_NAME_MAX_LEN + 1)).is_err());
    }
}
