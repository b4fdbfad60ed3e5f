//! Upload staging: uploads are written to `upload-<ms timestamp><ext>`
//! so the external script can read them by path.
//!
//! A `TemporaryArtifact` deletes its file exactly once: on `release()`,
//! or on drop if it was never released.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::bridge::error::BridgeError;

const ARTIFACT_PREFIX: &str = "upload-";

/// Same-millisecond collisions are resolved by bumping the timestamp.
const MAX_NAME_ATTEMPTS: i64 = 64;

/// A file received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: Option<String>, bytes: Vec<u8>) -> Self {
        Self { file_name, bytes }
    }

    /// Extension of the client-side file name, with the leading dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name.as_deref()?;
        let ext = Path::new(name).extension()?.to_str()?;
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(format!(".{ext}"))
    }
}

/// A staged upload on disk.
#[derive(Debug)]
pub struct TemporaryArtifact {
    path: PathBuf,
    released: bool,
}

impl TemporaryArtifact {
    /// Write `upload` into `dir`.
    pub async fn stage(
        dir: &Path,
        upload: &Upload,
        default_extension: &str,
    ) -> Result<Self, BridgeError> {
        tokio::fs::create_dir_all(dir).await?;

        let extension = upload
            .extension()
            .unwrap_or_else(|| default_extension.to_string());
        let base = chrono::Utc::now().timestamp_millis();

        let mut attempt = 0;
        let (mut file, path) = loop {
            let path = dir.join(format!("{ARTIFACT_PREFIX}{}{extension}", base + attempt));
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => break (file, path),
                Err(e)
                    if e.kind() == std::io::ErrorKind::AlreadyExists
                        && attempt + 1 < MAX_NAME_ATTEMPTS =>
                {
                    attempt += 1;
                }
                Err(e) => return Err(BridgeError::Io(e)),
            }
        };

        // From here on the file exists; the guard owns its deletion.
        let artifact = Self {
            path,
            released: false,
        };

        file.write_all(&upload.bytes).await?;
        file.flush().await?;

        tracing::debug!(
            path = %artifact.path.display(),
            size = upload.bytes.len(),
            "Upload staged"
        );

        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now.
    pub fn release(mut self) -> Result<(), BridgeError> {
        self.delete()
    }

    fn delete(&mut self) -> Result<(), BridgeError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        std::fs::remove_file(&self.path).map_err(|source| BridgeError::Cleanup {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(path = %self.path.display(), "Staged upload deleted");
        Ok(())
    }
}

impl Drop for TemporaryArtifact {
    fn drop(&mut self) {
        if let Err(e) = self.delete() {
            tracing::warn!(error = %e, "Staged upload cleanup failed");
        }
    }
}

/// Release an optional artifact, logging instead of failing.
pub fn release_quietly(artifact: Option<TemporaryArtifact>) {
    if let Some(artifact) = artifact {
        if let Err(e) = artifact.release() {
            tracing::warn!(error = %e, "Staged upload cleanup failed");
        }
    }
}

/// Remove `upload-*` files left in `dir` by a previous run that died
/// mid-request. Returns how many were removed.
pub fn sweep_orphans(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return 0, // Staging dir may not exist yet
    };

    let mut count = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_upload = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(ARTIFACT_PREFIX));
        if !is_upload || !path.is_file() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => count += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Orphaned upload not removed"),
        }
    }

    if count > 0 {
        tracing::info!(files_cleaned = count, "Cleaned orphaned uploads from previous run");
    }
    count
}
