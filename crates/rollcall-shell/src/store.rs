//! Cache generation storage: in-memory and on-disk.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

const INDEX_FILE: &str = "index.json";
const STAGING_PREFIX: &str = ".staging-";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid generation name: {0:?}")]
    InvalidGeneration(String),
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache index: {0}")]
    Index(#[from] serde_json::Error),
}

/// A stored (or fetched) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ShellResponse {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Named cache generations, each a map from cache key to response.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Names of all existing generations.
    async fn generations(&self) -> Result<Vec<String>, CacheError>;
    /// Replace `generation` with exactly `entries`, all at once.
    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(String, ShellResponse)>,
    ) -> Result<(), CacheError>;
    /// Look `key` up across all generations.
    async fn lookup(&self, key: &str) -> Result<Option<ShellResponse>, CacheError>;
    /// Delete a generation. Returns false if it did not exist.
    async fn delete(&self, generation: &str) -> Result<bool, CacheError>;
    /// Keys stored in one generation.
    async fn entries(&self, generation: &str) -> Result<Vec<String>, CacheError>;
}

fn validate_generation(name: &str) -> Result<(), CacheError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CacheError::InvalidGeneration(name.to_string()))
    }
}

type Generations = BTreeMap<String, BTreeMap<String, ShellResponse>>;

/// Process-local storage.
#[derive(Default)]
pub struct MemoryStorage {
    generations: Mutex<Generations>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Generations> {
        self.generations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn generations(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.lock().keys().cloned().collect())
    }

    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(String, ShellResponse)>,
    ) -> Result<(), CacheError> {
        validate_generation(generation)?;
        self.lock()
            .insert(generation.to_string(), entries.into_iter().collect());
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Option<ShellResponse>, CacheError> {
        Ok(self.lock().values().find_map(|g| g.get(key).cloned()))
    }

    async fn delete(&self, generation: &str) -> Result<bool, CacheError> {
        Ok(self.lock().remove(generation).is_some())
    }

    async fn entries(&self, generation: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .lock()
            .get(generation)
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    entries: BTreeMap<String, IndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    file: String,
    status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
}

/// One directory per generation holding `index.json` plus one body file per entry.
///
/// Generations are written to a staging directory and renamed into place, so a
/// failed write never leaves a partial generation behind.
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_index(dir: &Path) -> Result<Option<Index>, CacheError> {
        match tokio::fs::read(dir.join(INDEX_FILE)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_generation(
        dir: &Path,
        entries: Vec<(String, ShellResponse)>,
    ) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(dir).await?;
        let mut index = Index::default();
        for (n, (key, response)) in entries.into_iter().enumerate() {
            let file = format!("{n:04}.body");
            tokio::fs::write(dir.join(&file), &response.body).await?;
            index.entries.insert(
                key,
                IndexEntry {
                    file,
                    status: response.status,
                    content_type: response.content_type,
                },
            );
        }
        tokio::fs::write(dir.join(INDEX_FILE), serde_json::to_vec_pretty(&index)?).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for DirStorage {
    async fn generations(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if validate_generation(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(String, ShellResponse)>,
    ) -> Result<(), CacheError> {
        validate_generation(generation)?;
        let staging = self.root.join(format!("{STAGING_PREFIX}{generation}"));
        let target = self.root.join(generation);

        if tokio::fs::metadata(&staging).await.is_ok() {
            tokio::fs::remove_dir_all(&staging).await?;
        }
        if let Err(e) = Self::write_generation(&staging, entries).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }
        if tokio::fs::metadata(&target).await.is_ok() {
            tokio::fs::remove_dir_all(&target).await?;
        }
        tokio::fs::rename(&staging, &target).await?;
        tracing::debug!(generation, dir = %target.display(), "generation written");
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Option<ShellResponse>, CacheError> {
        for generation in self.generations().await? {
            let dir = self.root.join(&generation);
            let Some(index) = Self::read_index(&dir).await? else {
                continue;
            };
            if let Some(entry) = index.entries.get(key) {
                let body = tokio::fs::read(dir.join(&entry.file)).await?;
                return Ok(Some(ShellResponse {
                    status: entry.status,
                    content_type: entry.content_type.clone(),
                    body,
                }));
            }
        }
        Ok(None)
    }

    async fn delete(&self, generation: &str) -> Result<bool, CacheError> {
        validate_generation(generation)?;
        match tokio::fs::remove_dir_all(self.root.join(generation)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn entries(&self, generation: &str) -> Result<Vec<String>, CacheError> {
        validate_generation(generation)?;
        let index = Self::read_index(&self.root.join(generation)).await?;
        Ok(index
            .map(|i| i.entries.into_keys().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> ShellResponse {
        ShellResponse {
            status: 200,
            content_type: Some("text/html".into()),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_generation_names() {
        assert!(validate_generation("app-cache-v1").is_ok());
        assert!(validate_generation("../etc").is_err());
        assert!(validate_generation(".staging-app").is_err());
        assert!(validate_generation("").is_err());
    }

    #[tokio::test]
    async fn test_memory_put_lookup_delete() {
        let store = MemoryStorage::new();
        store
            .put_all("app-cache-v1", vec![("/".into(), page("home"))])
            .await
            .unwrap();
        assert_eq!(store.lookup("/").await.unwrap(), Some(page("home")));
        assert_eq!(store.lookup("/missing").await.unwrap(), None);
        assert!(store.delete("app-cache-v1").await.unwrap());
        assert!(!store.delete("app-cache-v1").await.unwrap());
        assert!(store.generations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dir_storage_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStorage::new(tmp.path().join("shell"));
        assert!(store.generations().await.unwrap().is_empty());

        store
            .put_all(
                "app-cache-v1",
                vec![
                    ("/".into(), page("home")),
                    ("/index.html".into(), page("index")),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.generations().await.unwrap(), vec!["app-cache-v1"]);
        assert_eq!(store.lookup("/index.html").await.unwrap(), Some(page("index")));
        assert_eq!(
            store.entries("app-cache-v1").await.unwrap(),
            vec!["/".to_string(), "/index.html".to_string()]
        );
    }

    #[tokio::test]
    async fn test_dir_storage_replaces_generation() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStorage::new(tmp.path());
        store
            .put_all("app-cache-v1", vec![("/".into(), page("old"))])
            .await
            .unwrap();
        store
            .put_all("app-cache-v1", vec![("/".into(), page("new"))])
            .await
            .unwrap();
        assert_eq!(store.lookup("/").await.unwrap(), Some(page("new")));
        assert_eq!(store.generations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dir_storage_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStorage::new(tmp.path());
        store
            .put_all("app-cache-v0", vec![("/".into(), page("x"))])
            .await
            .unwrap();
        assert!(store.delete("app-cache-v0").await.unwrap());
        assert!(!store.delete("app-cache-v0").await.unwrap());
        assert_eq!(store.lookup("/").await.unwrap(), None);
    }
}
