use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{Entries, PrefsBackend, StoreError, StoreName};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedStore {
    pub schema_version: u32,
    #[serde(default)]
    pub entries: Entries,
}

/// One pretty-printed JSON document per store under `<data_dir>/shared_prefs/`.
///
/// Commits go through a uniquely named temp file that is synced and renamed
/// over the target, so readers observe either the previous or the new
/// document, even with several writers.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("shared_prefs"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store_path(&self, name: &StoreName) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl PrefsBackend for FileBackend {
    fn load(&self, name: &StoreName) -> Result<Option<Entries>, StoreError> {
        let path = self.store_path(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let persisted: PersistedStore = serde_json::from_slice(&bytes)?;
        if persisted.schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaVersionMismatch {
                store: name.to_string(),
                expected: SCHEMA_VERSION,
                got: persisted.schema_version,
            });
        }
        Ok(Some(persisted.entries))
    }

    fn commit(&self, name: &StoreName, entries: &Entries) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let persisted = PersistedStore {
            schema_version: SCHEMA_VERSION,
            entries: entries.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&persisted)?;
        let path = self.store_path(name);
        write_atomic(&path, &bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "store file replaced");
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), io::Error> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    // Each writer gets its own temp file in the target directory.
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    best_effort_chmod_0600(tmp.path());

    tmp.persist(path).map_err(|e| e.error)?;
    best_effort_sync_dir(dir);
    Ok(())
}

fn best_effort_chmod_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    let _ = path;
}

fn best_effort_sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = fs::File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}
