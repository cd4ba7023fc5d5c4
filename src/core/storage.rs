// Object storage collaborator.
//
// The pipeline only needs a handful of operations from the store holding its
// inputs and outputs. Keys are `/`-separated and relative to the store root.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::core::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub path: String,
    pub size: u64,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads an entire object.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes an object, replacing any previous content.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Copies an object to a new key, replacing the destination.
    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Deletes an object. Succeeds if it does not exist.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects whose key starts with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Deletes every object under `prefix` and returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let objects = self.list(prefix).await?;
        for object in &objects {
            self.delete(&object.path).await?;
        }
        Ok(objects.len())
    }
}

/// Joins key segments with `/`, skipping empty ones.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parent of a key (everything before the last `/`), or `""` at the root.
pub fn parent_key(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn lock_poisoned(path: &str) -> PipelineError {
    PipelineError::storage(path, "lock poisoned")
}

/// In-memory store, used by tests and dry runs.
///
/// Operations on keys starting with an injected prefix fail, which lets tests
/// drive the per-object warning paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
    fail_prefixes: Arc<RwLock<Vec<String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_failure(&self, prefix: impl Into<String>) {
        if let Ok(mut fails) = self.fail_prefixes.write() {
            fails.push(prefix.into());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut fails) = self.fail_prefixes.write() {
            fails.clear();
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check_failure(&self, path: &str) -> Result<()> {
        let fails = self.fail_prefixes.read().map_err(|_| lock_poisoned(path))?;
        if fails.iter().any(|p| path.starts_with(p.as_str())) {
            return Err(PipelineError::storage(path, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.check_failure(path)?;
        let objects = self.objects.read().map_err(|_| lock_poisoned(path))?;
        objects
            .get(path)
            .cloned()
            .ok_or_else(|| PipelineError::storage(path, "object not found"))
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        self.check_failure(path)?;
        let mut objects = self.objects.write().map_err(|_| lock_poisoned(path))?;
        objects.insert(path.to_string(), data);
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.check_failure(from)?;
        self.check_failure(to)?;
        let mut objects = self.objects.write().map_err(|_| lock_poisoned(from))?;
        let data = objects
            .get(from)
            .cloned()
            .ok_or_else(|| PipelineError::storage(from, "copy source not found"))?;
        objects.insert(to.to_string(), data);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_failure(path)?;
        let mut objects = self.objects.write().map_err(|_| lock_poisoned(path))?;
        objects.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.check_failure(prefix)?;
        let objects = self.objects.read().map_err(|_| lock_poisoned(prefix))?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, data)| ObjectMeta {
                path: key.clone(),
                size: data.len() as u64,
            })
            .collect())
    }
}

/// Store backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |acc, s| acc.join(s))
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    async fn ensure_parent(&self, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let data = tokio::fs::read(self.resolve(path))
            .await
            .map_err(|e| PipelineError::storage(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let target = self.resolve(path);
        self.ensure_parent(&target).await?;
        tokio::fs::write(&target, &data)
            .await
            .map_err(|e| PipelineError::storage(path, e))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let target = self.resolve(to);
        self.ensure_parent(&target).await?;
        tokio::fs::copy(self.resolve(from), &target)
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::storage(from, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path);
        let meta = match tokio::fs::metadata(&target).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(PipelineError::storage(path, e)),
        };

        // Directories act as staging markers; only empty ones are removed
        let result = if meta.is_dir() {
            tokio::fs::remove_dir(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::storage(path, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        // Walk from the deepest directory the prefix pins down
        let start_key = if prefix.ends_with('/') {
            prefix.trim_end_matches('/')
        } else {
            parent_key(prefix)
        };

        let mut out = Vec::new();
        let mut pending = vec![self.resolve(start_key)];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(PipelineError::storage(prefix, e)),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(key) = self.key_of(&path) else {
                    continue;
                };
                if key.starts_with(prefix) {
                    let size = entry.metadata().await?.len();
                    out.push(ObjectMeta { path: key, size });
                }
            }
        }

        out.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Listed {} objects under {}", out.len(), prefix);
        Ok(out)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let objects = self.list(prefix).await?;
        for object in &objects {
            self.delete(&object.path).await?;
        }

        // Clear out the directories left behind
        let dir = self.resolve(prefix);
        if prefix.ends_with('/') || tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(PipelineError::storage(prefix, e)),
            }
        }

        Ok(objects.len())
    }
}
