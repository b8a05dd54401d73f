//! Filesystem content store.
//!
//! Bodies are addressed by the MD5 hex digest of their exact bytes and written
//! gzip-compressed to `<root>/<h0>/<h1>/<hash>.html.gz`, where `h0` and `h1`
//! are the first two hex characters of the digest. Writes go through a
//! temporary file in the target directory and are renamed into place, so a
//! reader never sees a partial artifact and two writers of the same body
//! converge on identical bytes.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use flate2::{Compression, GzBuilder};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::ContentError;
use crate::traits::ContentStore;
use crate::types::ContentArtifact;

/// Upper bound on one blocking compress-and-write
const BLOCKING_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// MD5 hex digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the artifact for `hash` lives (or would live).
    pub fn path_for(&self, hash: &str) -> PathBuf {
        let mut chars = hash.chars();
        let h0 = chars.next().unwrap_or('0');
        let h1 = chars.next().unwrap_or('0');
        self.root
            .join(h0.to_string())
            .join(h1.to_string())
            .join(format!("{hash}.html.gz"))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<ContentArtifact, ContentError> {
        let hash = content_hash(&bytes);
        let artifact = ContentArtifact {
            hash: hash.clone(),
            byte_length: bytes.len() as u64,
        };
        let path = self.path_for(&hash);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(hash = %hash, "artifact already stored");
            return Ok(artifact);
        }

        let write = tokio::task::spawn_blocking(move || write_compressed(&bytes, &path));
        match tokio::time::timeout(BLOCKING_WRITE_TIMEOUT, write).await {
            Ok(joined) => joined??,
            Err(_) => {
                warn!(hash = %hash, "artifact write timed out");
                return Err(ContentError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "artifact write timed out",
                )));
            }
        }

        debug!(hash = %hash, bytes = artifact.byte_length, "artifact stored");
        Ok(artifact)
    }

    async fn contains(&self, hash: &str) -> bool {
        tokio::fs::try_exists(self.path_for(hash))
            .await
            .unwrap_or(false)
    }
}

fn write_compressed(bytes: &[u8], path: &Path) -> Result<(), ContentError> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "artifact path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    // mtime 0 keeps the gzip header, and so the file bytes, a pure function of the body
    let mut encoder = GzBuilder::new()
        .mtime(0)
        .write(temp, Compression::default());
    encoder.write_all(bytes)?;
    let temp = encoder.finish()?;
    temp.as_file().sync_all()?;

    if path.exists() {
        return Ok(());
    }
    temp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_md5_hex() {
        assert_eq!(content_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(content_hash(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_path_fans_out_on_leading_characters() {
        let store = FsContentStore::new("/data");
        assert_eq!(
            store.path_for("5d41402abc4b2a76b9719d911017c592"),
            PathBuf::from("/data/5/d/5d41402abc4b2a76b9719d911017c592.html.gz")
        );
    }
}
