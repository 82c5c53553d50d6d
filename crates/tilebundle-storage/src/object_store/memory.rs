//! In-memory object store.

use super::{ObjectStore, WriteSession, check_range};
use crate::{BundleError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

type Objects = Arc<RwLock<BTreeMap<String, Bytes>>>;

/// Object store kept in process memory.
///
/// Write sessions copy the object on open and swap the copy in on commit,
/// so readers never observe a half-written session.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Objects,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys of all stored objects, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    /// Copy of an object's bytes.
    pub fn get(&self, id: &str) -> Option<Bytes> {
        self.objects.read().get(id).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(id))
    }

    async fn object_size(&self, id: &str) -> Result<Option<u64>> {
        Ok(self.objects.read().get(id).map(|b| b.len() as u64))
    }

    async fn read_range(&self, id: &str, range: Range<u64>) -> Result<Bytes> {
        let object = self
            .objects
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| BundleError::ObjectNotFound(id.to_string()))?;
        check_range(id, &range, object.len() as u64)?;
        Ok(object.slice(range.start as usize..range.end as usize))
    }

    async fn put_if_absent(&self, id: &str, bytes: Bytes) -> Result<bool> {
        let mut objects = self.objects.write();
        if objects.contains_key(id) {
            return Ok(false);
        }
        objects.insert(id.to_string(), bytes);
        Ok(true)
    }

    async fn open_write_session(&self, id: &str) -> Result<Box<dyn WriteSession>> {
        let buf = self
            .objects
            .read()
            .get(id)
            .map(|b| b.to_vec())
            .ok_or_else(|| BundleError::ObjectNotFound(id.to_string()))?;
        Ok(Box::new(MemoryWriteSession {
            objects: Arc::clone(&self.objects),
            id: id.to_string(),
            buf,
        }))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let mut objects = self.objects.write();
        let before = objects.len();
        objects.retain(|key, _| !key.starts_with(&dir));
        debug!("Deleted {} objects under {}", before - objects.len(), dir);
        Ok(())
    }
}

/// Write session over a private copy of the object.
struct MemoryWriteSession {
    objects: Objects,
    id: String,
    buf: Vec<u8>,
}

#[async_trait]
impl WriteSession for MemoryWriteSession {
    fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        let range = offset..offset + len as u64;
        check_range(&self.id, &range, self.len())?;
        Ok(Bytes::copy_from_slice(
            &self.buf[range.start as usize..range.end as usize],
        ))
    }

    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let range = offset..offset + data.len() as u64;
        check_range(&self.id, &range, self.len())?;
        self.buf[range.start as usize..range.end as usize].copy_from_slice(data);
        Ok(())
    }

    async fn append(&mut self, data: &[u8]) -> Result<u64> {
        let offset = self.len();
        self.buf.extend_from_slice(data);
        Ok(offset)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { objects, id, buf } = *self;
        objects.write().insert(id, Bytes::from(buf));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_if_absent_is_idempotent() {
        let store = MemoryObjectStore::new();
        assert!(store.put_if_absent("a/b", Bytes::from_static(b"one")).await.expect("put"));
        assert!(!store.put_if_absent("a/b", Bytes::from_static(b"two")).await.expect("put"));
        assert_eq!(store.get("a/b"), Some(Bytes::from_static(b"one")));
    }

    #[tokio::test]
    async fn test_range_reads() {
        let store = MemoryObjectStore::new();
        store
            .put_if_absent("obj", Bytes::from_static(b"0123456789"))
            .await
            .expect("put");

        let slice = store.read_range("obj", 2..5).await.expect("read");
        assert_eq!(&slice[..], b"234");

        assert!(matches!(
            store.read_range("obj", 8..12).await,
            Err(BundleError::Corruption(_))
        ));
        assert!(
            store
                .read_range("missing", 0..1)
                .await
                .expect_err("missing object")
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_session_invisible_until_commit() {
        let store = MemoryObjectStore::new();
        store
            .put_if_absent("obj", Bytes::from_static(b"abcd"))
            .await
            .expect("put");

        let mut session = store.open_write_session("obj").await.expect("open");
        assert_eq!(session.append(b"ef").await.expect("append"), 4);
        session.write_at(0, b"A").await.expect("write");
        assert_eq!(&session.read_at(0, 6).await.expect("read")[..], b"Abcdef");
        assert_eq!(store.object_size("obj").await.expect("size"), Some(4));

        session.commit().await.expect("commit");
        assert_eq!(store.get("obj"), Some(Bytes::from_static(b"Abcdef")));
    }

    #[tokio::test]
    async fn test_dropped_session_is_abandoned() {
        let store = MemoryObjectStore::new();
        store
            .put_if_absent("obj", Bytes::from_static(b"abcd"))
            .await
            .expect("put");
        {
            let mut session = store.open_write_session("obj").await.expect("open");
            session.append(b"zz").await.expect("append");
        }
        assert_eq!(store.get("obj"), Some(Bytes::from_static(b"abcd")));
    }

    #[tokio::test]
    async fn test_write_past_end_rejected() {
        let store = MemoryObjectStore::new();
        store
            .put_if_absent("obj", Bytes::from_static(b"abcd"))
            .await
            .expect("put");
        let mut session = store.open_write_session("obj").await.expect("open");
        assert!(session.write_at(3, b"xy").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store = MemoryObjectStore::new();
        for key in ["c/L01/a.bundle", "c/L01/b.bundle", "c/L010/x.bundle", "c/L02/a.bundle"] {
            store.put_if_absent(key, Bytes::new()).await.expect("put");
        }

        store.delete_prefix("c/L01").await.expect("delete");
        assert_eq!(store.keys(), vec!["c/L010/x.bundle", "c/L02/a.bundle"]);

        store.delete_prefix("c/L99").await.expect("missing prefix is fine");
    }
}
