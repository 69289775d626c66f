//! Content-addressed blob store.
//!
//! Blobs are stored at `{root}/{id}` (or `{root}/{owner}/{id}` for an owner
//! namespace) where `id` is the lowercase SHA-256 hex digest of the content.
//! Identical content always maps to the same file, so repeated uploads are
//! harmless overwrites with byte-identical data.
//!
//! Writes are staged into a uniquely named file in the destination
//! directory and renamed into place, so readers never observe a partial blob.
//! Staging files left behind by a crashed writer are swept the first time a
//! store instance writes into a namespace.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::fs;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::digest::{is_digest_hex, sha256_hex, DIGEST_HEX_LEN};
use crate::files::{create_private_dir_all, write_new_file, PRIVATE_FILE_MODE};

/// Suffix of in-flight staging files.
const STAGING_SUFFIX: &str = ".partial";

/// Staging files older than this belong to a writer that is gone.
pub const STALE_STAGING_AGE: Duration = Duration::from_secs(60 * 60);

/// Errors produced by blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The blob to store has zero length.
    #[error("blob size is zero")]
    Empty,

    /// The blob to store exceeds the configured ceiling.
    #[error("blob size overflow, size: {size}, max: {max}")]
    Oversize {
        /// Offending blob size in bytes.
        size: usize,
        /// Configured maximum blob size in bytes.
        max: usize,
    },

    /// The backing directory could not be created.
    #[error("storage unavailable at {}: {source}", .path.display())]
    StorageUnavailable {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The identifier is not a 64-character lowercase hex digest.
    #[error(
        "invalid blob id, should be {expected} hex chars, id: {id}, size: {len}",
        expected = DIGEST_HEX_LEN
    )]
    InvalidIdentifier {
        /// Rejected identifier.
        id: String,
        /// Its length in bytes.
        len: usize,
    },

    /// The owner namespace is neither empty nor a 64-character hex digest.
    #[error(
        "invalid owner id, should be empty or {expected} hex chars, owner: {owner}, size: {len}",
        expected = DIGEST_HEX_LEN
    )]
    InvalidOwner {
        /// Rejected owner identifier.
        owner: String,
        /// Its length in bytes.
        len: usize,
    },

    /// No blob exists for the identifier.
    #[error("blob not found, id: {id}: {source}")]
    NotFound {
        /// Requested identifier.
        id: String,
        /// Underlying lookup failure.
        #[source]
        source: io::Error,
    },

    /// Reading an existing blob failed.
    #[error("failed to read blob, id: {id}: {source}")]
    Read {
        /// Requested identifier.
        id: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Writing or publishing a blob failed.
    #[error("failed to write blob at {}: {source}", .path.display())]
    Write {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// Stored bytes no longer hash to their identifier.
    #[error("blob content does not match its id, id: {id}, actual: {actual}")]
    Corrupted {
        /// Requested identifier.
        id: String,
        /// Digest of the bytes actually read.
        actual: String,
    },
}

/// Filesystem-backed content-addressed blob store.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    max_blob_size: usize,
    swept: Arc<Mutex<HashSet<PathBuf>>>,
}

impl BlobStore {
    /// Create a store rooted at `root` accepting blobs up to `max_blob_size` bytes.
    ///
    /// Nothing touches the filesystem until the first `put`.
    pub fn new(root: impl Into<PathBuf>, max_blob_size: usize) -> Self {
        Self {
            root: root.into(),
            max_blob_size,
            swept: Arc::default(),
        }
    }

    /// Create a store from its configuration section.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.root.clone(), config.max_blob_size)
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Largest accepted blob in bytes.
    pub fn max_blob_size(&self) -> usize {
        self.max_blob_size
    }

    /// Store `data` in the root namespace and return its identifier.
    ///
    /// # Errors
    ///
    /// See [`BlobStore::put_in`].
    pub async fn put(&self, data: &[u8]) -> Result<String, StoreError> {
        self.put_in(None, data).await
    }

    /// Store `data` in `owner`'s namespace and return its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Empty`] or [`StoreError::Oversize`] before any
    /// disk access, [`StoreError::InvalidOwner`] for a malformed namespace,
    /// [`StoreError::StorageUnavailable`] when the directory cannot be
    /// created, and [`StoreError::Write`] when staging or publishing fails.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn put_in(&self, owner: Option<&str>, data: &[u8]) -> Result<String, StoreError> {
        let size = data.len();
        if size == 0 {
            return Err(StoreError::Empty);
        }
        if size > self.max_blob_size {
            return Err(StoreError::Oversize {
                size,
                max: self.max_blob_size,
            });
        }

        let dir = self.namespace_dir(owner)?;
        create_private_dir_all(&dir)
            .await
            .map_err(|source| StoreError::StorageUnavailable {
                path: dir.clone(),
                source,
            })?;

        if self.first_write_to(&dir) {
            if let Err(e) = sweep_dir(&dir, STALE_STAGING_AGE).await {
                warn!(error = %e, "failed to sweep stale staging files");
            }
        }

        let id = sha256_hex(data);
        let path = dir.join(&id);
        let staging = dir.join(format!(".{id}.{}{STAGING_SUFFIX}", Uuid::new_v4().simple()));

        if let Err(source) = write_new_file(&staging, data, PRIVATE_FILE_MODE).await {
            discard_staging(&staging).await;
            return Err(StoreError::Write {
                path: staging,
                source,
            });
        }
        if let Err(source) = fs::rename(&staging, &path).await {
            discard_staging(&staging).await;
            return Err(StoreError::Write { path, source });
        }

        debug!(id = %id, "blob stored");
        Ok(id)
    }

    /// Read a blob from the root namespace.
    ///
    /// # Errors
    ///
    /// See [`BlobStore::get_in`].
    pub async fn get(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        self.get_in(None, id).await
    }

    /// Read a blob from `owner`'s namespace. Bytes are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidIdentifier`] unless `id` is 64 lowercase
    /// hex characters, [`StoreError::NotFound`] when no such blob exists, and
    /// [`StoreError::Read`] for other I/O failures.
    #[instrument(skip(self))]
    pub async fn get_in(&self, owner: Option<&str>, id: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.blob_path(owner, id)?;
        match fs::read(&path).await {
            Ok(data) => {
                debug!(size = data.len(), "blob read");
                Ok(data)
            }
            Err(source) if source.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                id: id.to_owned(),
                source,
            }),
            Err(source) => Err(StoreError::Read {
                id: id.to_owned(),
                source,
            }),
        }
    }

    /// Read a blob and check that it still hashes to `id`.
    ///
    /// # Errors
    ///
    /// Everything [`BlobStore::get_in`] returns, plus [`StoreError::Corrupted`].
    pub async fn get_verified(&self, owner: Option<&str>, id: &str) -> Result<Vec<u8>, StoreError> {
        let data = self.get_in(owner, id).await?;
        let actual = sha256_hex(&data);
        if actual != id {
            warn!(id = %id, actual = %actual, "stored blob failed digest check");
            return Err(StoreError::Corrupted {
                id: id.to_owned(),
                actual,
            });
        }
        Ok(data)
    }

    /// Whether a blob with `id` exists in `owner`'s namespace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidIdentifier`] or [`StoreError::InvalidOwner`]
    /// for malformed input, and [`StoreError::Read`] when existence cannot be
    /// determined.
    pub async fn contains(&self, owner: Option<&str>, id: &str) -> Result<bool, StoreError> {
        let path = self.blob_path(owner, id)?;
        // Owner directories share the blob naming scheme; only files are blobs.
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Read {
                id: id.to_owned(),
                source,
            }),
        }
    }

    /// Remove staging files in `owner`'s namespace last modified at least
    /// `older_than` ago. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidOwner`] for a malformed namespace and
    /// [`StoreError::StorageUnavailable`] when the directory cannot be listed.
    pub async fn sweep_staging(
        &self,
        owner: Option<&str>,
        older_than: Duration,
    ) -> Result<usize, StoreError> {
        let dir = self.namespace_dir(owner)?;
        sweep_dir(&dir, older_than).await
    }

    fn first_write_to(&self, dir: &Path) -> bool {
        match self.swept.lock() {
            Ok(mut swept) => swept.insert(dir.to_path_buf()),
            Err(_) => false,
        }
    }

    fn blob_path(&self, owner: Option<&str>, id: &str) -> Result<PathBuf, StoreError> {
        if !is_digest_hex(id) {
            return Err(StoreError::InvalidIdentifier {
                id: id.to_owned(),
                len: id.len(),
            });
        }
        Ok(self.namespace_dir(owner)?.join(id))
    }

    fn namespace_dir(&self, owner: Option<&str>) -> Result<PathBuf, StoreError> {
        match owner {
            None | Some("") => Ok(self.root.clone()),
            Some(owner) if is_digest_hex(owner) => Ok(self.root.join(owner)),
            Some(owner) => Err(StoreError::InvalidOwner {
                owner: owner.to_owned(),
                len: owner.len(),
            }),
        }
    }
}

async fn sweep_dir(dir: &Path, older_than: Duration) -> Result<usize, StoreError> {
    let unavailable = |source: io::Error| StoreError::StorageUnavailable {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(source) => return Err(unavailable(source)),
    };

    let mut removed: usize = 0;
    while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
        let is_staging = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.') && name.ends_with(STAGING_SUFFIX));
        if !is_staging {
            continue;
        }
        let stale = match entry.metadata().await {
            Ok(meta) => {
                meta.is_file()
                    && meta
                        .modified()
                        .ok()
                        .and_then(|modified| modified.elapsed().ok())
                        .is_some_and(|age| age >= older_than)
            }
            Err(_) => false,
        };
        if !stale {
            continue;
        }
        match fs::remove_file(entry.path()).await {
            Ok(()) => removed = removed.saturating_add(1),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %entry.path().display(),
                error = %e,
                "failed to remove stale staging file"
            ),
        }
    }

    if removed > 0 {
        debug!(dir = %dir.display(), removed, "swept stale staging files");
    }
    Ok(removed)
}

async fn discard_staging(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove staging file");
        }
    }
}
