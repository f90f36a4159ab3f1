//! On-disk file lifecycle for try-on requests.
//!
//! Three directories are involved:
//!
//! - the **static** directory holds garment images referenced by the catalog
//! - the **scratch** directory holds uploaded person images and model outputs while a request is
//!   in flight
//! - the **results** directory holds generated images served under `/results`
//!
//! Every file created here carries a random UUID in its name, so concurrent requests never
//! collide, even within the same clock second.

use chrono::Utc;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StorageConfig;

/// Extension used for generated images when the model output carries none.
const DEFAULT_RESULT_EXTENSION: &str = "webp";

/// Longest sanitized original file name kept in scratch file names.
const MAX_NAME_CHARS: usize = 64;

#[derive(Debug, Clone)]
pub struct FileStore {
    static_dir: PathBuf,
    results_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl FileStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            static_dir: config.static_dir.clone(),
            results_dir: config.results_dir.clone(),
            scratch_dir: config.scratch_dir.clone(),
        }
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Create the static, results and scratch directories if they do not exist.
    pub async fn ensure_dirs(&self) -> io::Result<()> {
        for dir in [&self.static_dir, &self.results_dir, &self.scratch_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Path of a garment image inside the static directory.
    pub fn garment_path(&self, file_name: &str) -> PathBuf {
        self.static_dir.join(file_name)
    }

    /// Whether a garment image is present on disk.
    pub async fn garment_exists(&self, file_name: &str) -> bool {
        matches!(tokio::fs::metadata(self.garment_path(file_name)).await, Ok(meta) if meta.is_file())
    }

    /// Persist an uploaded person image to a uniquely named scratch file.
    pub async fn write_scratch(&self, bytes: &[u8], original_name: Option<&str>) -> io::Result<PathBuf> {
        let name = match original_name.map(sanitize_file_name) {
            Some(name) if !name.is_empty() => format!("temp_{}_{}", Uuid::new_v4().simple(), name),
            _ => format!("temp_{}", Uuid::new_v4().simple()),
        };
        let path = self.scratch_dir.join(name);
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "Wrote scratch upload");
        Ok(path)
    }

    /// Move a generated image into the results directory under a fresh name.
    ///
    /// The source file is consumed. Returns the new file name (relative to the results
    /// directory).
    pub async fn store_result(&self, generated: &Path, product_id: &str) -> io::Result<String> {
        let extension = generated
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| DEFAULT_RESULT_EXTENSION.to_string());

        let file_name = result_file_name(product_id, &extension);
        let destination = self.results_dir.join(&file_name);
        move_file(generated, &destination).await?;
        debug!(from = %generated.display(), to = %destination.display(), "Stored result image");
        Ok(file_name)
    }

    /// Delete result files whose modification time is older than `retention`.
    ///
    /// Returns the number of files removed. Entries that disappear concurrently are ignored.
    pub async fn sweep_results(&self, retention: Duration) -> io::Result<usize> {
        let cutoff = SystemTime::now().checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.results_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let Ok(modified) = meta.modified() else { continue };
            if modified >= cutoff || is_hidden(&entry.file_name()) {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove expired result"),
            }
        }

        Ok(removed)
    }
}

/// Whether `name` is a single, normal path component (no separators, no `.`/`..`).
pub fn is_plain_file_name(name: &str) -> bool {
    if name.is_empty() || name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
}

/// Reduce an uploaded file name to a safe single component.
///
/// Only the final path component is kept; anything other than letters, digits, `.`, `-` and `_`
/// becomes `_`. Leading dots are dropped so the result is never hidden or a relative reference.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    cleaned.trim_start_matches('.').chars().take(MAX_NAME_CHARS).collect()
}

fn result_file_name(product_id: &str, extension: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!(
        "result_{}_{}_{}.{}",
        sanitize_file_name(product_id),
        Utc::now().format("%Y%m%d%H%M%S"),
        &id[..12],
        extension
    )
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

/// Rename `from` to `to`, falling back to copy-and-delete across filesystems.
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
        Err(e) => Err(e),
    }
}
