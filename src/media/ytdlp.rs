use async_trait::async_trait;
use tracing::{debug, info};

use super::{DownloadCommandBuilder, DownloadJob, Downloader};
use crate::config::DownloaderConfig;
use crate::error::Result;

/// Downloader backed by the yt-dlp binary, with ffmpeg as its encoder
pub struct YtDlpDownloader {
    config: DownloaderConfig,
    command_builder: DownloadCommandBuilder,
}

impl YtDlpDownloader {
    pub fn new(config: DownloaderConfig) -> Self {
        let command_builder = DownloadCommandBuilder::from_config(&config);

        Self {
            config,
            command_builder,
        }
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(&self, job: &DownloadJob) -> Result<()> {
        info!(
            "Fetching {} ({:?}) -> {}",
            job.request.url,
            job.request.mode,
            job.output_template.display()
        );

        let command = self.command_builder.download(
            &job.request,
            &job.output_template,
            job.cookies.as_deref(),
        );

        command.execute(self.config.timeout()).await
    }

    async fn check_availability(&self) -> Result<()> {
        self.get_version_info().await.map(|_| ())
    }

    async fn get_version_info(&self) -> Result<(String, String)> {
        debug!("Getting downloader and encoder version information");

        let downloader = self.command_builder.version_check().first_line().await?;
        let encoder = self.command_builder.encoder_version_check().first_line().await?;

        info!("Downloader: {}, encoder: {}", downloader, encoder);
        Ok((downloader, encoder))
    }
}
