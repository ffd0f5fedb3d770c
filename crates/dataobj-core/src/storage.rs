//! Object-storage location and helpers.
//!
//! This module centralizes every interaction with the object store backing
//! data objects and metastore index objects. It is responsible for:
//!
//! - Mapping relative keys (for example,
//!   `tenant/<tenant>/metastore/<window>/0000000001.dobj`) onto an
//!   [`object_store::ObjectStore`] implementation.
//! - Providing create-only writes (`write_new`) used by the metastore commit
//!   protocol and the content-addressed uploader.
//! - Listing keys and "directories" under a prefix.
//!
//! Higher-level modules (`dataobj`, `metastore`) work with these helpers
//! instead of talking to `object_store` directly, so storage errors are
//! classified in one place. Transient-failure retries are left to the
//! `ObjectStore` implementation.

use std::{fmt, path::PathBuf, sync::Arc};

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    ObjectStore, PutMode, PutOptions, PutPayload, local::LocalFileSystem, memory::InMemory,
    path::Path,
};
use snafu::{Backtrace, IntoError, prelude::*};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The specified key was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The key that was not found.
        path: String,
        /// Underlying backend error.
        source: object_store::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The key already exists and the write used create-only semantics.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExists {
        /// The key that was found to already exist.
        path: String,
        /// Underlying backend error.
        source: object_store::Error,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// Any other backend failure.
    #[snafu(display("Object store error at {path}: {source}"))]
    Backend {
        /// The key (or prefix) being accessed.
        path: String,
        /// Underlying backend error.
        source: object_store::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The local store root could not be created.
    #[snafu(display("Cannot create local store root {}: {source}", root.display()))]
    LocalRoot {
        /// The directory that could not be created.
        root: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

impl StorageError {
    /// True when the error reports a missing key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// True when a create-only write lost against an existing key.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists { .. })
    }
}

fn classify(path: &str, err: object_store::Error) -> StorageError {
    let path = path.to_string();
    match err {
        e @ object_store::Error::NotFound { .. } => {
            NotFoundSnafu { path }.into_error(e)
        }
        e @ object_store::Error::AlreadyExists { .. } => {
            AlreadyExistsSnafu { path }.into_error(e)
        }
        e => BackendSnafu { path }.into_error(e),
    }
}

/// Handle to the object store holding every tenant's objects and index.
///
/// Cloning is cheap; clones share the same underlying store.
#[derive(Clone)]
pub struct StorageLocation {
    store: Arc<dyn ObjectStore>,
}

impl fmt::Debug for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageLocation")
            .field("store", &self.store.to_string())
            .finish()
    }
}

impl StorageLocation {
    /// Wrap an existing object store.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// An empty in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// A store rooted at a local directory, created if missing.
    pub fn local(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).context(LocalRootSnafu { root: root.clone() })?;
        let fs = LocalFileSystem::new_with_prefix(&root).context(BackendSnafu {
            path: root.display().to_string(),
        })?;
        Ok(Self::new(Arc::new(fs)))
    }

    /// Read the full contents of `key`.
    pub async fn read_all_bytes(&self, key: &str) -> StorageResult<Bytes> {
        let path = Path::from(key);
        let result = self.store.get(&path).await.map_err(|e| classify(key, e))?;
        result.bytes().await.map_err(|e| classify(key, e))
    }

    /// Create `key` with `contents`, failing with
    /// [`StorageError::AlreadyExists`] if the key is already present.
    pub async fn write_new(&self, key: &str, contents: Bytes) -> StorageResult<()> {
        let path = Path::from(key);
        let opts = PutOptions::from(PutMode::Create);
        self.store
            .put_opts(&path, PutPayload::from(contents), opts)
            .await
            .map_err(|e| classify(key, e))?;
        Ok(())
    }

    /// List every key under `prefix` (recursively), sorted.
    pub async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let path = Path::from(prefix);
        let mut keys: Vec<String> = self
            .store
            .list(Some(&path))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .map_err(|e| classify(prefix, e))?;
        keys.sort();
        Ok(keys)
    }

    /// List the immediate child "directory" names under `prefix`, sorted.
    ///
    /// Only the last path segment of each child is returned.
    pub async fn list_dirs(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let path = Path::from(prefix);
        let listing = self
            .store
            .list_with_delimiter(Some(&path))
            .await
            .map_err(|e| classify(prefix, e))?;
        let mut dirs: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename().map(str::to_string))
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    /// Delete `key`. Deleting a missing key reports [`StorageError::NotFound`].
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = Path::from(key);
        self.store
            .delete(&path)
            .await
            .map_err(|e| classify(key, e))
    }
}
