//! Hand-off of a finished download to the caller.
//!
//! A [`Delivery`] owns its file from the moment it is found: dropping it,
//! or dropping the body stream it turns into, removes the file from the
//! scratch directory.

use axum::body::Bytes;
use futures::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tempfile::TempPath;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::Result;

/// Characters that are not allowed in file names on common filesystems
const RESERVED: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// MIME type for a file, by lower-cased extension
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "opus" | "ogg" => "audio/ogg",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        _ => "video/mp4",
    }
}

pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if RESERVED.contains(&c) { '_' } else { c })
        .collect()
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987
/// `filename*` carrying the exact UTF-8 name.
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = sanitize_filename(filename)
        .chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '_' })
        .collect();

    // Leaves only ALPHA / DIGIT / "-" / "." / "_" / "~" unescaped
    let encoded = urlencoding::encode(filename);

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}

/// Name shown to the user: the on-disk name without the request prefix
fn display_name(file_name: &str, prefix: &str) -> String {
    let stripped = file_name
        .strip_prefix(prefix)
        .map(|rest| rest.trim_start_matches('.'))
        .filter(|rest| Path::new(rest).extension().is_some());

    sanitize_filename(stripped.unwrap_or(file_name))
}

pub struct Delivery {
    path: TempPath,
    filename: String,
    content_type: &'static str,
}

impl Delivery {
    /// Take ownership of a finished download produced under `prefix`
    pub fn new(path: PathBuf, prefix: &str) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let filename = display_name(&file_name, prefix);
        let content_type = content_type_for(Path::new(&filename));

        Self {
            path: TempPath::from_path(path),
            filename,
            content_type,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn content_disposition(&self) -> String {
        content_disposition(&self.filename)
    }

    /// Open the file for streaming; returns its length and the body stream
    pub async fn open(self) -> Result<(u64, FileStream)> {
        let file = File::open(&self.path).await?;
        let len = file.metadata().await?.len();

        Ok((
            len,
            FileStream {
                inner: ReaderStream::new(file),
                cleanup: self.path,
            },
        ))
    }

    /// Move the file out of the scratch directory into `dir`
    pub async fn persist_to(self, dir: &Path) -> Result<PathBuf> {
        let target = dir.join(&self.filename);

        match self.path.persist(&target) {
            Ok(()) => Ok(target),
            Err(e) => {
                // rename fails across filesystems; the copy's source is removed on drop
                debug!("Rename into {} failed ({}), copying", dir.display(), e.error);
                tokio::fs::copy(&e.path, &target).await?;
                Ok(target)
            }
        }
    }
}

/// File body that removes the file once the stream is dropped
pub struct FileStream {
    // Declared first so the handle closes before the file is removed
    inner: ReaderStream<File>,
    cleanup: TempPath,
}

impl Stream for FileStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
