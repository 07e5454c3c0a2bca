// Downloader abstraction
//
// - Commands: argument construction and child process execution
// - YtDlp: the production downloader backed by the yt-dlp binary

pub mod commands;
pub mod ytdlp;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub use commands::*;
pub use ytdlp::*;

use crate::config::DownloaderConfig;
use crate::error::Result;
use crate::request::DownloadRequest;

/// Everything one downloader run needs
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub request: DownloadRequest,
    /// Output template, including the per-request prefix
    pub output_template: PathBuf,
    /// Cookie file handed to the downloader, if any
    pub cookies: Option<PathBuf>,
}

/// Main trait for fetching media with an external tool
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Run the downloader and wait for it to exit
    async fn download(&self, job: &DownloadJob) -> Result<()>;

    /// Check that the downloader and its encoder can be started
    async fn check_availability(&self) -> Result<()>;

    /// Version line of the downloader and of the encoder
    async fn get_version_info(&self) -> Result<(String, String)>;
}

/// Factory for creating downloader instances
pub struct DownloaderFactory;

impl DownloaderFactory {
    /// Create the default downloader (yt-dlp based)
    pub fn create_default(config: DownloaderConfig) -> Arc<dyn Downloader> {
        Arc::new(YtDlpDownloader::new(config))
    }
}
