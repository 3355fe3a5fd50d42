//! Local persistent cache for offline operation
//!
//! Holds one serialized election document per key. In local mode it is both
//! the source and the sink of the store.

use crate::config::StoreConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[async_trait]
pub trait LocalCache: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn load(&self, key: &str) -> Result<Option<String>>;

    async fn store(&self, key: &str, serialized: &str) -> Result<()>;
}

/// One JSON file per key inside a directory
pub struct FileLocalCache {
    root: PathBuf,
}

impl FileLocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache rooted at the configured `local_cache_dir`.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.local_cache_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::validation(format!("local cache key {key:?}")));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

#[async_trait]
impl LocalCache for FileLocalCache {
    fn backend_tag(&self) -> &'static str {
        "file"
    }

    async fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::local_cache(format!(
                "read {} failed: {e}",
                path.display()
            ))),
        }
    }

    async fn store(&self, key: &str, serialized: &str) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root).await?;

        // Write-then-rename so readers never see a partial document
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, serialized.as_bytes())
            .await
            .map_err(|e| Error::local_cache(format!("write {} failed: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::local_cache(format!("rename to {} failed: {e}", path.display())))?;
        Ok(())
    }
}

/// In-process cache for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryLocalCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryLocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_entry(self, key: &str, serialized: &str) -> Self {
        self.entries
            .write()
            .await
            .insert(key.to_string(), serialized.to_string());
        self
    }
}

#[async_trait]
impl LocalCache for MemoryLocalCache {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(&self, key: &str, serialized: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), serialized.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileLocalCache::new(dir.path().join("nested"));

        assert_eq!(cache.load("DOC").await.unwrap(), None);
        cache.store("DOC", "{\"voters\":[]}").await.unwrap();
        assert_eq!(
            cache.load("DOC").await.unwrap().as_deref(),
            Some("{\"voters\":[]}")
        );

        cache.store("DOC", "{}").await.unwrap();
        assert_eq!(cache.load("DOC").await.unwrap().as_deref(), Some("{}"));

        // No temporary files left behind
        let names: Vec<_> = std::fs::read_dir(cache.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["DOC.json".to_string()]);
    }

    #[tokio::test]
    async fn test_file_cache_from_config_uses_local_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            local_cache_dir: dir.path().join("cache"),
            ..StoreConfig::for_testing()
        };
        let cache = FileLocalCache::from_config(&config);
        assert_eq!(cache.root(), config.local_cache_dir.as_path());

        cache.store(&config.local_cache_key, "{}").await.unwrap();
        assert!(
            config
                .local_cache_dir
                .join(format!("{}.json", config.local_cache_key))
                .exists()
        );
    }

    #[tokio::test]
    async fn test_file_cache_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileLocalCache::new(dir.path());
        assert!(cache.store("../escape", "{}").await.is_err());
        assert!(cache.load("").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_cache() {
        let cache = MemoryLocalCache::new().with_entry("k", "v").await;
        assert_eq!(cache.load("k").await.unwrap().as_deref(), Some("v"));
        cache.store("k", "w").await.unwrap();
        assert_eq!(cache.load("k").await.unwrap().as_deref(), Some("w"));
        assert_eq!(cache.load("missing").await.unwrap(), None);
    }
}
