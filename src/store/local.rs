//! Device-local keyed JSON records

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// A directory of `<key>.json` records. Writes land atomically, so a reader
/// in another process never sees a half-written record.
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Read a record; `Ok(None)` when the key was never written
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let bytes = match fs::read(self.path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let data = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;

        let path = self.path(key);
        let temp_path = path.with_extension("tmp");
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        {
            let mut file = File::create(&temp_path).map_err(io_err)?;
            file.write_all(&data).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&temp_path, &path).map_err(io_err)?;

        debug!(key, bytes = data.len(), "Record written");
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Local store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on record `{key}`: {source}")]
    Io { key: String, source: io::Error },

    #[error("Record `{key}` is corrupt: {source}")]
    Corrupt {
        key: String,
        source: serde_json::Error,
    },

    #[error("Failed to encode record `{key}`: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}
