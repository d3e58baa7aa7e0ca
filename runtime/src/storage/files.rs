use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;

/// File-system seam used by the request creator and closer. Tests swap in
/// a temp-dir backed [`FsFileRepository`]; other backends plug in here.
#[async_trait]
pub trait FileRepository: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> Result<()>;
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    async fn copy(&self, from: &Path, to: &Path) -> Result<()>;
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;
    /// Regular files directly under `dir`, sorted by path.
    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;
    /// Creates `path` only if it does not exist. Returns `false` when it did.
    async fn create_new(&self, path: &Path, contents: &[u8]) -> Result<bool>;
    async fn remove_file(&self, path: &Path) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
}

#[derive(Debug, Default, Clone)]
pub struct FsFileRepository;

#[async_trait]
impl FileRepository for FsFileRepository {
    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("failed to create directory {}", path.display()))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::rename(from, to)
            .await
            .with_context(|| format!("failed to move {} to {}", from.display(), to.display()))
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::copy(from, to)
            .await
            .map(|_| ())
            .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read file {}", path.display()))
    }

    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("failed to list directory {}", dir.display()))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    async fn create_new(&self, path: &Path, contents: &[u8]) -> Result<bool> {
        use tokio::io::AsyncWriteExt;

        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(mut file) => {
                file.write_all(contents).await?;
                file.sync_all().await?;
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("failed to create {}", path.display()))
            }
        }
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// A name under `dir` that does not collide with an existing file:
/// `name.ext`, then `name_1.ext`, `name_2.ext`, ...
pub fn unique_target(repo: &dyn FileRepository, dir: &Path, file_path: &Path) -> Result<PathBuf> {
    let original = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("file name is missing"))?;

    let candidate = dir.join(original);
    if !repo.exists(&candidate) {
        return Ok(candidate);
    }

    let original_path = Path::new(original);
    let stem = original_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(original);
    let ext = original_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    let mut counter = 1usize;
    loop {
        let candidate_name = if ext.is_empty() {
            format!("{stem}_{counter}")
        } else {
            format!("{stem}_{counter}.{ext}")
        };
        let candidate = dir.join(&candidate_name);
        if !repo.exists(&candidate) {
            return Ok(candidate);
        }
        counter += 1;
    }
}
