//! Hash-addressed local copies of remote import sources.

use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use crate::fetch::HttpFetcher;

#[derive(Debug, Clone)]
pub struct CachedSource {
    pub content_hash: String,
    pub path: PathBuf,
    pub byte_size: u64,
    /// The same content was already cached by an earlier run.
    pub reused: bool,
}

#[derive(Debug, Clone)]
pub struct SourceCache {
    root: PathBuf,
}

impl SourceCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn cached_path(&self, source: &str, content_hash: &str, extension: &str) -> PathBuf {
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "bin" } else { ext };
        self.root.join(source).join(format!("{content_hash}.{ext}"))
    }

    /// Streams `url` to disk, then renames the temp file to its content-hash path.
    pub async fn download(
        &self,
        fetcher: &HttpFetcher,
        run_id: Uuid,
        source: &str,
        extension: &str,
        url: &str,
    ) -> anyhow::Result<CachedSource> {
        let dir = self.root.join(source);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating source cache directory {}", dir.display()))?;

        let temp_path = dir.join(format!(".{}.download", Uuid::new_v4()));
        let mut response = fetcher
            .open(run_id, source, url)
            .await
            .with_context(|| format!("downloading {source} from {url}"))?;

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp source file {}", temp_path.display()))?;
        let mut hasher = Sha256::new();
        let mut byte_size = 0u64;

        let written: anyhow::Result<()> = async {
            while let Some(chunk) = response
                .chunk()
                .await
                .with_context(|| format!("reading body of {url}"))?
            {
                hasher.update(&chunk);
                byte_size += chunk.len() as u64;
                file.write_all(&chunk)
                    .await
                    .with_context(|| format!("writing temp source file {}", temp_path.display()))?;
            }
            file.flush()
                .await
                .with_context(|| format!("flushing temp source file {}", temp_path.display()))?;
            Ok(())
        }
        .await;
        drop(file);

        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err);
        }

        let content_hash = hex::encode(hasher.finalize());
        let path = self.cached_path(source, &content_hash, extension);

        if fs::try_exists(&path)
            .await
            .with_context(|| format!("checking cached source {}", path.display()))?
        {
            let _ = fs::remove_file(&temp_path).await;
            info!(source, path = %path.display(), byte_size, "reusing cached source");
            return Ok(CachedSource {
                content_hash,
                path,
                byte_size,
                reused: true,
            });
        }

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp source {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            });
        }

        info!(source, path = %path.display(), byte_size, "cached remote source");
        Ok(CachedSource {
            content_hash,
            path,
            byte_size,
            reused: false,
        })
    }
}
