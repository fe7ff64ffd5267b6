//! Write-once storage for redacted artifacts.
//!
//! Every redacted page that leaves the process is also kept locally as
//! `CLEANSED_<YYYYmmdd_HHMMSS>_<stem>.jpg`, giving auditors a record of
//! exactly what the model was shown. Files are created with `create_new`, so
//! an existing artifact is never overwritten; two redactions of the same
//! upload in the same second get `_2`, `_3`, … suffixes. A write that fails
//! part-way removes the file again.

use crate::error::VaultError;
use crate::pipeline::encode::EncodedImage;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

/// Prefix of every vault artifact file name.
pub const ARTIFACT_PREFIX: &str = "CLEANSED";

/// Suffixes tried before giving up on a free name.
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Persists redacted images.
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Store `image` under a name derived from `original_name`; returns the stored path.
    async fn store(&self, image: &EncodedImage, original_name: &str) -> Result<PathBuf, VaultError>;
}

/// A vault directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalVault {
    dir: PathBuf,
}

impl LocalVault {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl VaultStore for LocalVault {
    async fn store(&self, image: &EncodedImage, original_name: &str) -> Result<PathBuf, VaultError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| VaultError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let base = artifact_base_name(original_name, Local::now());
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let file_name = if attempt == 1 {
                format!("{}.jpg", base)
            } else {
                format!("{}_{}.jpg", base, attempt)
            };
            let path = self.dir.join(file_name);

            let file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(VaultError::Write { path, source }),
            };

            write_or_discard(file, &path, image.bytes()).await?;
            info!("Redacted artifact stored at {}", path.display());
            return Ok(path);
        }

        Err(VaultError::NameExhausted {
            name: base,
            attempts: MAX_NAME_ATTEMPTS,
        })
    }
}

/// Write `bytes` to the freshly created `path`; on failure delete it.
async fn write_or_discard<W>(mut writer: W, path: &Path, bytes: &[u8]) -> Result<(), VaultError>
where
    W: AsyncWrite + Unpin,
{
    let result = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    }
    .await;
    let Err(source) = result else {
        return Ok(());
    };

    drop(writer);
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Could not remove partial artifact {}: {}", path.display(), e);
    }
    Err(VaultError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// `CLEANSED_<timestamp>_<stem>` without extension.
pub fn artifact_base_name(original_name: &str, at: DateTime<Local>) -> String {
    format!(
        "{}_{}_{}",
        ARTIFACT_PREFIX,
        at.format("%Y%m%d_%H%M%S"),
        sanitize_stem(original_name)
    )
}

/// File stem with anything outside `[A-Za-z0-9._-]` replaced by `_`.
///
/// Upload names are untrusted; path separators must never reach `join`.
fn sanitize_stem(original_name: &str) -> String {
    let file_part = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let stem = Path::new(file_part)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_part);
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "invoice".to_string()
    } else {
        cleaned
    }
}
