//! Scratch directory shared by all requests.
//!
//! Each request owns the files whose names start with its prefix. Cookie
//! files use their own `cookies_` prefix so they can never be picked up as
//! download output.

use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ScratchDir {
    dir: PathBuf,
}

impl ScratchDir {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if it does not exist yet
    pub async fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Per-request prefix: unix milliseconds plus a short random tag
    pub fn request_prefix() -> String {
        let millis = Utc::now().timestamp_millis();
        let tag = Uuid::new_v4().simple().to_string();
        format!("{}-{}_", millis, &tag[..8])
    }

    /// Downloader output template for a prefix
    pub fn output_template(&self, prefix: &str) -> PathBuf {
        self.dir.join(format!("{}.%(title).200B.%(ext)s", prefix))
    }

    /// Most recently modified regular file whose name starts with `prefix`
    pub async fn find_latest(&self, prefix: &str) -> Result<Option<PathBuf>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut latest: Option<(SystemTime, PathBuf)> = None;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(prefix) {
                continue;
            }

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            debug!("Output candidate: {} ({:?})", entry.path().display(), modified);

            if latest.as_ref().is_none_or(|(newest, _)| modified > *newest) {
                latest = Some((modified, entry.path()));
            }
        }

        Ok(latest.map(|(_, path)| path))
    }

    /// Write cookie text to a transient file, removed when the handle drops
    pub fn cookie_file(&self, text: &str) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("cookies_")
            .suffix(".txt")
            .tempfile_in(&self.dir)?;

        file.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        file.flush()?;

        Ok(file)
    }

    /// Remove every file under `prefix` except `keep`, returning how many went.
    ///
    /// Failures are logged and skipped.
    pub async fn remove_matching(&self, prefix: &str, keep: Option<&Path>) -> usize {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {}: {}", self.dir.display(), e);
                return 0;
            }
        };
        let mut removed = 0;

        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_name().to_string_lossy().starts_with(prefix) {
                continue;
            }
            let path = entry.path();
            if keep.is_some_and(|keep| keep == path) {
                continue;
            }
            if !entry.file_type().await.is_ok_and(|t| t.is_file()) {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Removed leftover {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove leftover {}: {}", path.display(), e),
            }
        }

        removed
    }

    /// Delete files this service created that are older than `max_age`,
    /// returning how many went
    pub fn purge_stale(&self, max_age: Duration) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }

        let now = SystemTime::now();
        let mut removed = 0;

        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| is_owned_name(&e.file_name().to_string_lossy()))
        {
            let age = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok());

            if age.is_some_and(|age| age > max_age) {
                match std::fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove stale {}: {}", entry.path().display(), e),
                }
            }
        }

        if removed > 0 {
            info!("Removed {} stale files from {}", removed, self.dir.display());
        }
        Ok(removed)
    }
}

/// Whether a scratch file name is one this service creates: a request
/// prefix (`<millis>-<8 hex>_`) or a transient cookie file
fn is_owned_name(name: &str) -> bool {
    if name.starts_with("cookies_") && name.ends_with(".txt") {
        return true;
    }

    let Some((millis, rest)) = name.split_once('-') else {
        return false;
    };
    let tag = rest.get(..8).unwrap_or_default();

    !millis.is_empty()
        && millis.bytes().all(|b| b.is_ascii_digit())
        && tag.len() == 8
        && tag.bytes().all(|b| b.is_ascii_hexdigit())
        && rest[8..].starts_with('_')
}
