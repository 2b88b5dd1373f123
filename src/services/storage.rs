//! Pluggable key-value persistence for tracked jobs and notifications.
//!
//! Every backend scopes its keys to a single namespace: a section of a JSON
//! document on disk, a Redis hash, or a plain in-memory map.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set(&self, key: &str, value: String) -> Result<(), KvError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// All entries in the namespace, in key order.
    async fn list_all(&self) -> Result<Vec<(String, String)>, KvError>;

    /// Check backend availability (for health checks).
    async fn health_check(&self) -> Result<(), KvError> {
        Ok(())
    }

    /// A handle onto another namespace of the same backend.
    fn namespace(&self, namespace: &str) -> Arc<dyn KvStore>;

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;
}

/// Namespace -> key -> value.
type Document = BTreeMap<String, BTreeMap<String, String>>;

fn entries_of(document: &Document, namespace: &str) -> Vec<(String, String)> {
    document
        .get(namespace)
        .map(|ns| ns.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

// ── In-memory ────────────────────────────────────────────────────────

const DEFAULT_NAMESPACE: &str = "default";

pub struct MemoryKvStore {
    namespace: String,
    document: Arc<Mutex<Document>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            document: Arc::default(),
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let document = self.document.lock().await;
        Ok(document.get(&self.namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
        self.document
            .lock()
            .await
            .entry(self.namespace.clone())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        if let Some(ns) = self.document.lock().await.get_mut(&self.namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<(String, String)>, KvError> {
        Ok(entries_of(&*self.document.lock().await, &self.namespace))
    }

    fn namespace(&self, namespace: &str) -> Arc<dyn KvStore> {
        Arc::new(Self {
            namespace: namespace.to_string(),
            document: self.document.clone(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ── JSON file ────────────────────────────────────────────────────────

/// Single JSON document on disk, rewritten atomically on every change.
///
/// Handles for other namespaces share the same document, so they never
/// overwrite each other's sections.
pub struct FileKvStore {
    path: Arc<PathBuf>,
    namespace: String,
    document: Arc<Mutex<Document>>,
}

impl FileKvStore {
    pub async fn open(path: impl AsRef<Path>, namespace: &str) -> Result<Self, KvError> {
        let path = path.as_ref().to_path_buf();
        let document = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Document::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(KvError::Serialize)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::new(),
            Err(e) => return Err(KvError::Io(e)),
        };

        Ok(Self {
            path: Arc::new(path),
            namespace: namespace.to_string(),
            document: Arc::new(Mutex::new(document)),
        })
    }

    async fn flush(&self, document: &Document) -> Result<(), KvError> {
        let bytes = serde_json::to_vec_pretty(document).map_err(KvError::Serialize)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(KvError::Io)?;
        tokio::fs::rename(&tmp, self.path.as_path()).await.map_err(KvError::Io)?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let document = self.document.lock().await;
        Ok(document
            .get(&self.namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
        let mut document = self.document.lock().await;
        document
            .entry(self.namespace.clone())
            .or_default()
            .insert(key.to_string(), value);
        self.flush(&document).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut document = self.document.lock().await;
        let removed = document
            .get_mut(&self.namespace)
            .and_then(|ns| ns.remove(key))
            .is_some();
        if removed {
            self.flush(&document).await?;
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<(String, String)>, KvError> {
        Ok(entries_of(&*self.document.lock().await, &self.namespace))
    }

    async fn health_check(&self) -> Result<(), KvError> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => {
                tokio::fs::metadata(dir).await.map_err(KvError::Io)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn namespace(&self, namespace: &str) -> Arc<dyn KvStore> {
        Arc::new(Self {
            path: self.path.clone(),
            namespace: namespace.to_string(),
            document: self.document.clone(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

// ── Redis ────────────────────────────────────────────────────────────

/// One Redis hash per namespace.
pub struct RedisKvStore {
    client: redis::Client,
    namespace: String,
}

impl RedisKvStore {
    pub fn new(redis_url: &str, namespace: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(redis_url).map_err(KvError::Redis)?;
        Ok(Self {
            client,
            namespace: namespace.to_string(),
        })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(KvError::Redis)?;
        let value: Option<String> = conn.hget(&self.namespace, key).await.map_err(KvError::Redis)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(KvError::Redis)?;
        conn.hset::<_, _, _, ()>(&self.namespace, key, value)
            .await
            .map_err(KvError::Redis)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(KvError::Redis)?;
        conn.hdel::<_, _, ()>(&self.namespace, key)
            .await
            .map_err(KvError::Redis)?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<(String, String)>, KvError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(KvError::Redis)?;
        let entries: HashMap<String, String> =
            conn.hgetall(&self.namespace).await.map_err(KvError::Redis)?;
        let mut entries: Vec<(String, String)> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn health_check(&self) -> Result<(), KvError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(KvError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(KvError::Redis)?;
        Ok(())
    }

    fn namespace(&self, namespace: &str) -> Arc<dyn KvStore> {
        Arc::new(Self {
            client: self.client.clone(),
            namespace: namespace.to_string(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.set("b", "2".to_string()).await.unwrap();
        store.set("a", "1".to_string()).await.unwrap();
        store.set("a", "3".to_string()).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("3"));
        assert_eq!(
            store.list_all().await.unwrap(),
            vec![("a".to_string(), "3".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let store = FileKvStore::open(&path, "triage:jobs").await.unwrap();
        store.set("job-1", "{}".to_string()).await.unwrap();
        drop(store);

        let reopened = FileKvStore::open(&path, "triage:jobs").await.unwrap();
        assert_eq!(reopened.get("job-1").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(reopened.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_keeps_namespaces_apart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let jobs = FileKvStore::open(&path, "triage:jobs").await.unwrap();
        jobs.set("job-1", "a".to_string()).await.unwrap();
        drop(jobs);

        let other = FileKvStore::open(&path, "other").await.unwrap();
        assert!(other.list_all().await.unwrap().is_empty());
        other.set("x", "y".to_string()).await.unwrap();
        drop(other);

        let jobs = FileKvStore::open(&path, "triage:jobs").await.unwrap();
        assert_eq!(jobs.get("job-1").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_file_store_namespace_handles_share_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let jobs = FileKvStore::open(&path, "triage:jobs").await.unwrap();
        let inbox = jobs.namespace("triage:notifications");
        jobs.set("job-1", "a".to_string()).await.unwrap();
        inbox.set("NTF-1", "n".to_string()).await.unwrap();
        inbox.delete("NTF-1").await.unwrap();
        inbox.set("NTF-2", "m".to_string()).await.unwrap();
        drop(jobs);
        drop(inbox);

        let reopened = FileKvStore::open(&path, "triage:jobs").await.unwrap();
        assert_eq!(reopened.get("job-1").await.unwrap().as_deref(), Some("a"));
        let inbox = reopened.namespace("triage:notifications");
        assert_eq!(
            inbox.list_all().await.unwrap(),
            vec![("NTF-2".to_string(), "m".to_string())]
        );
    }

    #[tokio::test]
    async fn test_memory_namespaces_are_separate() {
        let store = MemoryKvStore::new();
        let other = store.namespace("other");
        store.set("a", "1".to_string()).await.unwrap();
        other.set("a", "2".to_string()).await.unwrap();
        other.delete("missing").await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(other.get("a").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let err = FileKvStore::open(&path, "triage:jobs").await.err().unwrap();
        assert!(matches!(err, KvError::Serialize(_)));
    }
}
