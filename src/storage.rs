//! Storage Abstraction: an opaque key→bytes store used by the Page Cache and
//! Revalidation Scheduler when deployed across multiple processes.
//!
//! This mirrors the `CacheBackend`-as-trait-object pattern used elsewhere in the
//! surrounding example corpus for pluggable storage: a small async trait plus an
//! in-process default, so a deployment can swap in a real network-backed store without
//! either of C3/C4 knowing the difference.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::error::CacheError;

/// An opaque byte store keyed by string, shared by the Page Cache and Revalidation
/// Scheduler when running outside of a single in-process deployment.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;
    async fn put(&self, key: &str, value: Bytes) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Process-local storage backend, the default when no external store is configured.
#[derive(Default)]
pub struct InMemoryStorage {
    map: DashMap<String, Bytes>,
}

impl InMemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        Ok(self.map.get(key).map(|v| v.clone()))
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        self.map.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.map.remove(key);
        Ok(())
    }
}

/// Encodes a cache entry as `[8-byte unix-nanos createdAt][bytes html]`, per §3.
pub fn encode_entry(created_at: SystemTime, html: &[u8]) -> Bytes {
    let nanos = created_at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let mut buf = Vec::with_capacity(8 + html.len());
    buf.extend_from_slice(&nanos.to_be_bytes());
    buf.extend_from_slice(html);
    Bytes::from(buf)
}

/// Decodes a cache entry previously produced by [`encode_entry`].
pub fn decode_entry(bytes: &Bytes) -> Result<(SystemTime, Bytes), CacheError> {
    if bytes.len() < 8 {
        return Err(CacheError::CorruptEntry);
    }
    let nanos = u64::from_be_bytes(bytes[0..8].try_into().map_err(|_| CacheError::CorruptEntry)?);
    let created_at = UNIX_EPOCH + std::time::Duration::from_nanos(nanos);
    Ok((created_at, bytes.slice(8..)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_created_at_and_bytes() {
        let now = SystemTime::now();
        let encoded = encode_entry(now, b"<html></html>");
        let (decoded_at, html) = decode_entry(&encoded).unwrap();
        assert_eq!(&html[..], b"<html></html>");
        let now_nanos = now.duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64;
        let decoded_nanos = decoded_at.duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64;
        assert_eq!(now_nanos, decoded_nanos);
    }

    #[test]
    fn rejects_truncated_entries() {
        let short = Bytes::from_static(b"short");
        assert!(decode_entry(&short).is_err());
    }

    #[tokio::test]
    async fn in_memory_storage_get_put_delete() {
        let store = InMemoryStorage::new();
        assert!(store.get("page:/a").await.unwrap().is_none());
        store
            .put("page:/a", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert_eq!(
            store.get("page:/a").await.unwrap().unwrap(),
            Bytes::from_static(b"hello")
        );
        store.delete("page:/a").await.unwrap();
        assert!(store.get("page:/a").await.unwrap().is_none());
    }
}
