//! File-based key-value backend for persistent storage.

use crate::backend::KeyValueBackend;
use crate::error::{StorageError, StorageResult};
use crate::types::{unix_millis, StoredMeta, StoredValue, Version, WriteCondition, WriteOutcome};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Lock file guarding every conditional write in the directory.
const LOCK_FILE: &str = "LOCK";
/// Extension of record files.
const RECORD_EXT: &str = "json";
/// Extension of records being written.
const TEMP_EXT: &str = "tmp";

/// On-disk form of one key.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Record {
    version: Version,
    last_modified: u64,
    value: String,
}

/// A directory-based key-value backend.
///
/// Each key is stored as its own record file, named by the hex encoding of
/// the key. Data survives process restarts.
///
/// # Atomicity
///
/// Conditional writes hold an exclusive advisory lock on `<dir>/LOCK` while
/// they read the current version and replace the record, so several
/// processes sharing the directory still get compare-and-set semantics.
/// Records are replaced with write-then-rename, so readers never observe a
/// partially written record and do not need the lock.
///
/// # Example
///
/// ```no_run
/// use tracklog_storage::{FileBackend, KeyValueBackend, WriteCondition};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("data")).unwrap();
/// backend.put("settings/u_1", b"{}", WriteCondition::Any).unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    lock_file: Mutex<File>,
}

impl FileBackend {
    /// Opens or creates a backend rooted at the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or lock file cannot be created,
    /// or if the path exists and is not a directory.
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;
        if !path.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("path is not a directory: {}", path.display()),
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        Ok(Self {
            path: path.to_path_buf(),
            lock_file: Mutex::new(lock_file),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.path
            .join(format!("{}.{}", hex::encode(key.as_bytes()), RECORD_EXT))
    }

    fn read_record(&self, key: &str) -> StorageResult<Option<StoredValue>> {
        let data = match fs::read(self.record_path(key)) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: Record = serde_json::from_slice(&data)
            .map_err(|e| StorageError::Corrupted(format!("record for {key:?}: {e}")))?;
        let value = BASE64
            .decode(record.value.as_bytes())
            .map_err(|e| StorageError::Corrupted(format!("value for {key:?}: {e}")))?;

        Ok(Some(StoredValue {
            value,
            version: record.version,
            last_modified: record.last_modified,
        }))
    }

    fn write_record(&self, key: &str, record: &Record) -> StorageResult<()> {
        let final_path = self.record_path(key);
        let temp_path = final_path.with_extension(TEMP_EXT);

        let mut file = File::create(&temp_path)?;
        file.write_all(&serde_json::to_vec(record)?)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &final_path)?;
        Ok(())
    }

    /// Runs `f` while holding both the in-process and the cross-process lock.
    fn with_lock<T>(&self, f: impl FnOnce() -> StorageResult<T>) -> StorageResult<T> {
        let lock_file = self.lock_file.lock();
        lock_file.lock_exclusive()?;
        let result = f();
        if let Err(e) = FileExt::unlock(&*lock_file) {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to release store lock");
        }
        result
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> StorageResult<Option<StoredValue>> {
        self.read_record(key)
    }

    fn put(
        &self,
        key: &str,
        value: &[u8],
        condition: WriteCondition,
    ) -> StorageResult<WriteOutcome> {
        self.with_lock(|| {
            let current = self.read_record(key)?.map(|v| v.version);
            if !condition.holds(current.as_ref()) {
                return Ok(WriteOutcome::Rejected { current });
            }

            let record = Record {
                version: Version::generate(),
                last_modified: unix_millis(),
                value: BASE64.encode(value),
            };
            self.write_record(key, &record)?;

            Ok(WriteOutcome::Committed(StoredMeta {
                version: record.version,
                last_modified: record.last_modified,
            }))
        })
    }

    fn delete(&self, key: &str, condition: WriteCondition) -> StorageResult<bool> {
        self.with_lock(|| {
            let current = self.read_record(key)?.map(|v| v.version);
            if !condition.holds(current.as_ref()) {
                return Ok(false);
            }
            match fs::remove_file(self.record_path(key)) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let key = hex::decode(stem)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok());
            match key {
                Some(key) if key.starts_with(prefix) => keys.push(key),
                Some(_) => {}
                None => tracing::debug!(file = %path.display(), "skipping foreign file"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}
