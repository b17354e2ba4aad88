use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::ObjectStore;

/// Object store rooted in a local directory, for development and tests.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        anyhow::ensure!(!escapes, "invalid object path: {path}");
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, path: &str, data: &[u8], _content_type: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        tokio::fs::write(&target, data)
            .await
            .with_context(|| format!("Failed to write object {}", target.display()))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .with_context(|| format!("Failed to read object {}", target.display()))
    }

    async fn get_range(&self, path: &str, start: u64, end_inclusive: u64) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        let mut file = tokio::fs::File::open(&target)
            .await
            .with_context(|| format!("Failed to open object {}", target.display()))?;
        file.seek(SeekFrom::Start(start))
            .await
            .context("Failed to seek object")?;

        let len = end_inclusive.saturating_sub(start) + 1;
        let mut buf = Vec::new();
        file.take(len)
            .read_to_end(&mut buf)
            .await
            .context("Failed to read object range")?;
        Ok(buf)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", target.display())),
        }
    }
}
