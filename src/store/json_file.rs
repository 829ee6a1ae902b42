//! Whole-document JSON persistence.
//!
//! Every store in the assistant keeps its full state in memory and rewrites
//! one JSON file on each mutation. Writes go to a temporary file in the same
//! directory and are renamed over the target, so a crash mid-write leaves the
//! previous document intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::PersistenceError;

/// A JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and deserialize the document. A missing file is `Ok(None)`.
    pub fn read<T: DeserializeOwned>(&self) -> Result<Option<T>, PersistenceError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PersistenceError::Serialization {
                path: self.path.clone(),
                source,
            })
    }

    /// Serialize `value` and atomically replace the document.
    pub fn write<T: Serialize>(&self, value: &T) -> Result<(), PersistenceError> {
        let json = self.encode(value)?;
        self.write_bytes(&json)
    }

    /// Like [`JsonFile::write`], with the file IO on the blocking pool.
    ///
    /// Serialization happens on the caller's task, so `value` can stay
    /// borrowed from a lock guard held across the await.
    pub async fn save<T: Serialize>(&self, value: &T) -> Result<(), PersistenceError> {
        let json = self.encode(value)?;
        let file = self.clone();
        tokio::task::spawn_blocking(move || file.write_bytes(&json))
            .await
            .map_err(|e| PersistenceError::Io {
                path: self.path.clone(),
                source: std::io::Error::other(e),
            })?
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, PersistenceError> {
        serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Serialization {
            path: self.path.clone(),
            source,
        })
    }

    fn write_bytes(&self, json: &[u8]) -> Result<(), PersistenceError> {
        let io_err = |source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(io_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!(path = %self.path.display(), bytes = json.len(), "Document written");
        Ok(())
    }
}
