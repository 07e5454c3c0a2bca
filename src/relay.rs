use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::delivery::Delivery;
use crate::error::{Result, RelayError};
use crate::media::{DownloadJob, Downloader, DownloaderFactory};
use crate::request::DownloadRequest;
use crate::scratch::ScratchDir;

/// Cookie material for one run; an owned temp file is removed on drop
enum Cookies {
    None,
    Shared(PathBuf),
    Transient(NamedTempFile),
}

impl Cookies {
    fn path(&self) -> Option<PathBuf> {
        match self {
            Cookies::None => None,
            Cookies::Shared(path) => Some(path.clone()),
            Cookies::Transient(file) => Some(file.path().to_path_buf()),
        }
    }
}

/// Runs one request end to end: downloader, output lookup, hand-off
pub struct Relay {
    config: Config,
    scratch: ScratchDir,
    downloader: Arc<dyn Downloader>,
}

impl Relay {
    pub fn new(config: Config) -> Self {
        let downloader = DownloaderFactory::create_default(config.downloader.clone());
        Self::with_downloader(config, downloader)
    }

    pub fn with_downloader(config: Config, downloader: Arc<dyn Downloader>) -> Self {
        let scratch = ScratchDir::new(config.scratch.dir.clone());
        Self {
            config,
            scratch,
            downloader,
        }
    }

    pub fn downloader(&self) -> &Arc<dyn Downloader> {
        &self.downloader
    }

    /// Create the scratch directory and sweep leftovers from earlier runs
    pub async fn prepare(&self) -> Result<()> {
        self.scratch.ensure().await?;

        if let Some(max_age) = self.config.scratch.stale_after() {
            let scratch = self.scratch.clone();
            let removed = tokio::task::spawn_blocking(move || scratch.purge_stale(max_age))
                .await
                .map_err(|e| RelayError::Io(std::io::Error::other(e)))??;
            info!("Scratch directory {} ready ({} stale files removed)", self.scratch.path().display(), removed);
        }

        Ok(())
    }

    fn cookies(&self) -> Result<Cookies> {
        let downloader = &self.config.downloader;

        if let Some(text) = downloader.cookies.as_deref().filter(|t| !t.trim().is_empty()) {
            return Ok(Cookies::Transient(self.scratch.cookie_file(text)?));
        }
        if let Some(path) = &downloader.cookies_file {
            if path.is_file() {
                return Ok(Cookies::Shared(path.clone()));
            }
            warn!("Cookie file {} does not exist, continuing without cookies", path.display());
        }

        Ok(Cookies::None)
    }

    /// Fetch the media for a request and hand back the produced file
    pub async fn fetch(&self, request: &DownloadRequest) -> Result<Delivery> {
        self.scratch.ensure().await?;

        let prefix = ScratchDir::request_prefix();
        let cookies = self.cookies()?;
        let job = DownloadJob {
            request: request.clone(),
            output_template: self.scratch.output_template(&prefix),
            cookies: cookies.path(),
        };

        info!("Request {}: {} ({:?})", prefix, request.url, request.mode);
        let outcome = self.downloader.download(&job).await;
        drop(cookies);

        if let Err(e) = outcome {
            warn!("Request {} failed: {}", prefix, e);
            self.scratch.remove_matching(&prefix, None).await;
            return Err(e);
        }

        let path = match self.scratch.find_latest(&prefix).await? {
            Some(path) => path,
            None => return Err(RelayError::OutputNotFound),
        };

        let leftovers = self.scratch.remove_matching(&prefix, Some(path.as_path())).await;
        if leftovers > 0 {
            debug!("Request {} left {} intermediate files", prefix, leftovers);
        }

        let delivery = Delivery::new(path, &prefix);
        info!(
            "Request {} produced {} ({})",
            prefix,
            delivery.filename(),
            delivery.content_type()
        );
        Ok(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MockDownloader;
    use crate::request::Mode;
    use assert_fs::TempDir;
    use std::sync::Mutex;

    fn config_for(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.scratch.dir = dir.path().join("scratch");
        config
    }

    /// Turn the job's output template into a concrete file name
    fn render(job: &DownloadJob, title: &str, ext: &str) -> PathBuf {
        let template = job.output_template.to_string_lossy().to_string();
        PathBuf::from(
            template
                .replace("%(title).200B", title)
                .replace("%(ext)s", ext),
        )
    }

    #[tokio::test]
    async fn fetch_returns_produced_file() {
        let temp = TempDir::new().unwrap();
        let mut downloader = MockDownloader::new();
        downloader
            .expect_download()
            .times(1)
            .returning(|job| {
                assert_eq!(job.request.mode, Mode::Audio);
                assert!(job.cookies.is_none());
                std::fs::write(render(job, "Song_Title", "mp3"), b"id3").unwrap();
                Ok(())
            });

        let relay = Relay::with_downloader(config_for(&temp), Arc::new(downloader));
        let request = DownloadRequest::new("https://example.com/a").with_mode(Mode::Audio);
        let delivery = relay.fetch(&request).await.unwrap();

        assert_eq!(delivery.filename(), "Song_Title.mp3");
        assert_eq!(delivery.content_type(), "audio/mpeg");
        assert!(delivery.path().exists());
    }

    #[tokio::test]
    async fn missing_output_is_reported() {
        let temp = TempDir::new().unwrap();
        let mut downloader = MockDownloader::new();
        downloader.expect_download().returning(|_| Ok(()));

        let relay = Relay::with_downloader(config_for(&temp), Arc::new(downloader));
        let err = relay
            .fetch(&DownloadRequest::new("https://example.com/v"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::OutputNotFound));
    }

    #[tokio::test]
    async fn cookie_file_is_gone_after_failed_run() {
        let temp = TempDir::new().unwrap();
        let mut config = config_for(&temp);
        config.downloader.cookies = Some("# Netscape HTTP Cookie File".to_string());

        let seen = Arc::new(Mutex::new(None));
        let seen_in_mock = Arc::clone(&seen);
        let mut downloader = MockDownloader::new();
        downloader.expect_download().returning(move |job| {
            let cookies = job.cookies.clone().unwrap();
            assert!(cookies.exists());
            *seen_in_mock.lock().unwrap() = Some(cookies);
            Err(RelayError::Downloader {
                binary: "yt-dlp".to_string(),
                code: Some(1),
                message: "Sign in to confirm your age".to_string(),
            })
        });

        let relay = Relay::with_downloader(config, Arc::new(downloader));
        let err = relay
            .fetch(&DownloadRequest::new("https://example.com/v"))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, RelayError::Downloader { code: Some(1), .. }));
        let cookies = seen.lock().unwrap().clone().unwrap();
        assert!(!cookies.exists());
    }

    #[tokio::test]
    async fn intermediate_files_are_removed_after_success() {
        let temp = TempDir::new().unwrap();
        let mut downloader = MockDownloader::new();
        downloader.expect_download().returning(|job| {
            let part = render(job, "Clip", "f137.mp4.part");
            std::fs::write(&part, b"fragment").unwrap();
            let old = std::time::SystemTime::now() - std::time::Duration::from_secs(60);
            std::fs::File::options().write(true).open(&part).unwrap().set_modified(old).unwrap();
            std::fs::write(render(job, "Clip", "mp4"), b"mp4").unwrap();
            Ok(())
        });

        let relay = Relay::with_downloader(config_for(&temp), Arc::new(downloader));
        let delivery = relay
            .fetch(&DownloadRequest::new("https://example.com/v"))
            .await
            .unwrap();

        assert_eq!(delivery.filename(), "Clip.mp4");
        let entries: Vec<_> = std::fs::read_dir(temp.path().join("scratch"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(entries, vec![delivery.path().to_path_buf()]);
    }

    #[tokio::test]
    async fn existing_cookie_file_is_passed_through_untouched() {
        let temp = TempDir::new().unwrap();
        let shared = temp.path().join("cookies.txt");
        std::fs::write(&shared, "# Netscape HTTP Cookie File\n").unwrap();

        let mut config = config_for(&temp);
        config.downloader.cookies_file = Some(shared.clone());

        let expected = shared.clone();
        let mut downloader = MockDownloader::new();
        downloader.expect_download().returning(move |job| {
            assert_eq!(job.cookies.as_deref(), Some(expected.as_path()));
            std::fs::write(render(job, "Clip", "mp4"), b"mp4").unwrap();
            Ok(())
        });

        let relay = Relay::with_downloader(config, Arc::new(downloader));
        relay
            .fetch(&DownloadRequest::new("https://example.com/v"))
            .await
            .unwrap();
        assert!(shared.exists());
    }

    #[tokio::test]
    async fn prepare_creates_scratch_dir() {
        let temp = TempDir::new().unwrap();
        let relay = Relay::with_downloader(config_for(&temp), Arc::new(MockDownloader::new()));
        relay.prepare().await.unwrap();
        assert!(temp.path().join("scratch").is_dir());
    }
}
