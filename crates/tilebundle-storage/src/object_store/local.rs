//! Object store backed by a local directory.
//!
//! Object keys map to relative paths below the root; `/` separated key
//! segments become directories. New objects are written to a temporary
//! file and hard-linked into place, which fails if the target exists, so
//! `put_if_absent` never exposes a partially written object.

use super::{ObjectStore, WriteSession, check_range};
use crate::{BundleError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{ErrorKind, SeekFrom};
use std::ops::Range;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of an object key.
    ///
    /// `.` segments are ignored; keys that could leave the root are rejected.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for component in Path::new(id.trim_start_matches('/')).components() {
            match component {
                Component::Normal(segment) => path.push(segment),
                Component::CurDir => {}
                _ => {
                    return Err(BundleError::Io(std::io::Error::new(
                        ErrorKind::InvalidInput,
                        format!("object key escapes the store root: {id}"),
                    )));
                }
            }
        }
        Ok(path)
    }
}

fn not_found(id: &str, err: std::io::Error) -> BundleError {
    if err.kind() == ErrorKind::NotFound {
        BundleError::ObjectNotFound(id.to_string())
    } else {
        BundleError::Io(err)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.object_size(id).await?.is_some())
    }

    async fn object_size(&self, id: &str) -> Result<Option<u64>> {
        match fs::metadata(self.path_for(id)?).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_range(&self, id: &str, range: Range<u64>) -> Result<Bytes> {
        let mut file = File::open(self.path_for(id)?)
            .await
            .map_err(|e| not_found(id, e))?;
        let len = file.metadata().await?.len();
        check_range(id, &range, len)?;

        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.seek(SeekFrom::Start(range.start)).await?;
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn put_if_absent(&self, id: &str, bytes: Bytes) -> Result<bool> {
        let path = self.path_for(id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp = path.with_extension(format!(
            "tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let mut file = File::create(&temp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        let linked = fs::hard_link(&temp, &path).await;
        let _ = fs::remove_file(&temp).await;
        match linked {
            Ok(()) => {
                debug!("Created {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_write_session(&self, id: &str) -> Result<Box<dyn WriteSession>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.path_for(id)?)
            .await
            .map_err(|e| not_found(id, e))?;
        let len = file.metadata().await?.len();
        Ok(Box::new(LocalWriteSession {
            id: id.to_string(),
            file,
            len,
        }))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let path = self.path_for(prefix.trim_end_matches('/'))?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write session over an open file handle.
///
/// Writes go straight to the file; `commit` flushes and syncs it.
struct LocalWriteSession {
    id: String,
    file: File,
    len: u64,
}

#[async_trait]
impl WriteSession for LocalWriteSession {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        check_range(&self.id, &(offset..offset + len as u64), self.len)?;
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        check_range(&self.id, &(offset..offset + data.len() as u64), self.len)?;
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(())
    }

    async fn append(&mut self, data: &[u8]) -> Result<u64> {
        let offset = self.len;
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        self.len += data.len() as u64;
        Ok(offset)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut file = self.file;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}
