use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::error::{AppError, Result};

const WRITE_BUFFER_BYTES: usize = 256 * 1024;

/// Bucketed object storage on the local filesystem, served under a public
/// URL prefix.
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    root: PathBuf,
    public_url: String,
}

/// Rejects absolute paths and any `..` or `.` component.
fn relative_object_path(bucket: &str, path: &str) -> Result<PathBuf> {
    let joined = Path::new(bucket).join(path);
    let clean = joined
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if bucket.is_empty() || path.is_empty() || !clean {
        return Err(AppError::Validation(format!("Invalid object path: {}/{}", bucket, path)));
    }
    Ok(joined)
}

impl ObjectStorage {
    pub fn new(root: &str, public_url: &str) -> Self {
        Self {
            root: PathBuf::from(root),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Writes an object and returns its public URL. Existing objects are
    /// overwritten.
    pub async fn upload(&self, bucket: &str, path: &str, bytes: &[u8]) -> Result<String> {
        let relative = relative_object_path(bucket, path)?;
        let target = self.root.join(&relative);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = tokio::fs::File::create(&target).await.map_err(|e| {
            tracing::error!("❌ Failed to create object {}: {}", relative.display(), e);
            AppError::Io(e)
        })?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
        writer.write_all(bytes).await?;
        writer.flush().await?;

        tracing::debug!("💾 Stored object {} ({} bytes)", relative.display(), bytes.len());
        self.public_url(bucket, path)
    }

    /// Public URL of an object, whether or not it exists.
    pub fn public_url(&self, bucket: &str, path: &str) -> Result<String> {
        relative_object_path(bucket, path)?;
        Ok(format!("{}/{}/{}", self.public_url, bucket, path))
    }

    /// Reads an object back. Missing objects are `NotFound`.
    pub async fn read(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let target = self.root.join(relative_object_path(bucket, path)?);
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Directory served as the public storage prefix.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
