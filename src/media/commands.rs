use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::DownloaderConfig;
use crate::error::{Result, RelayError};
use crate::request::{DownloadRequest, Mode};

/// Lines of stderr kept for the error message of a failed run
const STDERR_TAIL_LINES: usize = 5;

/// External tool invocation: binary, argument list and a label for logs
#[derive(Debug, Clone)]
pub struct DownloadCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl DownloadCommand {
    /// Create a new command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Tell the downloader where ffmpeg lives
    pub fn ffmpeg_location<S: Into<String>>(self, path: S) -> Self {
        self.arg("--ffmpeg-location").arg(path)
    }

    /// Keep on-disk names to a portable ASCII subset
    pub fn restrict_filenames(self) -> Self {
        self.arg("--restrict-filenames")
    }

    /// Netscape cookie file for authenticated fetches
    pub fn cookies<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("--cookies").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Set the format selector
    pub fn format<S: Into<String>>(self, selector: S) -> Self {
        self.arg("-f").arg(selector)
    }

    /// Extract audio and convert it with the encoder
    pub fn extract_audio<S: Into<String>>(self, audio_format: S) -> Self {
        self.arg("--extract-audio").arg("--audio-format").arg(audio_format)
    }

    /// VBR quality for the extracted audio (0 is best)
    pub fn audio_quality(self, quality: u8) -> Self {
        self.arg("--audio-quality").arg(quality.to_string())
    }

    /// Container used when video and audio streams are merged
    pub fn merge_output_format<S: Into<String>>(self, container: S) -> Self {
        self.arg("--merge-output-format").arg(container)
    }

    pub fn embed_metadata(self) -> Self {
        self.arg("--embed-metadata")
    }

    pub fn embed_thumbnail(self) -> Self {
        self.arg("--embed-thumbnail")
    }

    /// Output filename template
    pub fn output_template<P: AsRef<Path>>(self, template: P) -> Self {
        self.arg("-o").arg(template.as_ref().to_string_lossy().to_string())
    }

    /// Short name of the binary used to tag forwarded log lines
    pub fn binary_name(&self) -> String {
        Path::new(&self.binary_path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| self.binary_path.clone())
    }

    fn spawn_error(&self, e: std::io::Error) -> RelayError {
        RelayError::Downloader {
            binary: self.binary_name(),
            code: None,
            message: format!("failed to start {}: {}", self.binary_path, e),
        }
    }

    /// Run the command to completion, forwarding its output to the log.
    ///
    /// The child is killed if this future is dropped or `timeout` elapses.
    pub async fn execute(&self, timeout: Option<Duration>) -> Result<()> {
        debug!("Executing {}: {} {:?}", self.description, self.binary_path, self.args);

        let mut child = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let tag = self.binary_name();
        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_lines(out, tag.clone(), false)));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward_lines(err, tag.clone(), true)));

        let status = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill {} after timeout: {}", tag, e);
                    }
                    return Err(RelayError::Timeout {
                        binary: tag,
                        secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait().await?,
        };

        if let Some(handle) = stdout {
            let _ = handle.await;
        }
        let stderr_tail = match stderr {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            let message = if stderr_tail.is_empty() {
                format!("{} failed", self.description)
            } else {
                stderr_tail.join("\n")
            };
            return Err(RelayError::Downloader {
                binary: tag,
                code: status.code(),
                message,
            });
        }

        info!("{} completed", self.description);
        Ok(())
    }

    /// Run the command and return the first line of its stdout
    pub async fn first_line(&self) -> Result<String> {
        debug!("Executing {}: {} {:?}", self.description, self.binary_path, self.args);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RelayError::Downloader {
                binary: self.binary_name(),
                code: output.status.code(),
                message: format!("{} failed: {}", self.description, stderr.trim()),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or("Unknown version").trim().to_string())
    }
}

/// Forward each line of a child stream to the log, returning the last few
async fn forward_lines<R>(reader: R, tag: String, is_stderr: bool) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if is_stderr {
                    warn!("[{}] {}", tag, line);
                } else {
                    info!("[{}] {}", tag, line);
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("[{}] stopped reading output: {}", tag, e);
                break;
            }
        }
    }

    tail.into_iter().collect()
}

/// Builder for the downloader and encoder invocations
#[derive(Debug, Clone)]
pub struct DownloadCommandBuilder {
    binary_path: String,
    ffmpeg_path: Option<String>,
}

impl DownloadCommandBuilder {
    /// Create a new command builder
    pub fn new<S: Into<String>>(binary_path: S, ffmpeg_path: Option<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            ffmpeg_path,
        }
    }

    pub fn from_config(config: &DownloaderConfig) -> Self {
        Self::new(&config.binary_path, config.ffmpeg_path.clone())
    }

    /// Build the download command for one request
    pub fn download(
        &self,
        request: &DownloadRequest,
        output_template: &Path,
        cookies: Option<&Path>,
    ) -> DownloadCommand {
        let mut cmd = DownloadCommand::new(&self.binary_path, "Media download");

        if let Some(ffmpeg) = &self.ffmpeg_path {
            cmd = cmd.ffmpeg_location(ffmpeg);
        }
        cmd = cmd.restrict_filenames();
        if let Some(cookies) = cookies {
            cmd = cmd.cookies(cookies);
        }

        cmd = match request.mode {
            Mode::Audio => {
                let format = request.audio_format;
                let mut audio = cmd.format("bestaudio/best").extract_audio(format.as_str());
                if format.is_lossy() {
                    audio = audio.audio_quality(0);
                }
                audio = audio.embed_metadata();
                if format.is_lossy() {
                    audio = audio.embed_thumbnail();
                }
                audio
            }
            Mode::Video => cmd
                .format(request.quality.format_selector())
                .merge_output_format("mp4")
                .embed_metadata(),
        };

        // `--` keeps a URL that starts with a dash from being read as an option
        cmd.output_template(output_template).arg("--").arg(&request.url)
    }

    /// Build downloader version check command
    pub fn version_check(&self) -> DownloadCommand {
        DownloadCommand::new(&self.binary_path, "Downloader version check").arg("--version")
    }

    /// Build encoder version check command
    pub fn encoder_version_check(&self) -> DownloadCommand {
        let ffmpeg = self.ffmpeg_path.as_deref().unwrap_or("ffmpeg");
        DownloadCommand::new(ffmpeg, "Encoder version check").arg("-version")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{AudioFormat, Quality};
    use std::path::PathBuf;

    fn template() -> PathBuf {
        PathBuf::from("/scratch/1700000000000-abcd1234_.%(title).200B.%(ext)s")
    }

    #[test]
    fn audio_mp3_arguments() {
        let builder = DownloadCommandBuilder::new("yt-dlp", None);
        let request = DownloadRequest::new("https://example.com/watch?v=1").with_mode(Mode::Audio);
        let cmd = builder.download(&request, &template(), None);

        assert_eq!(
            cmd.args,
            vec![
                "--restrict-filenames",
                "-f", "bestaudio/best",
                "--extract-audio", "--audio-format", "mp3",
                "--audio-quality", "0",
                "--embed-metadata",
                "--embed-thumbnail",
                "-o", "/scratch/1700000000000-abcd1234_.%(title).200B.%(ext)s",
                "--",
                "https://example.com/watch?v=1",
            ]
        );
    }

    #[test]
    fn audio_wav_skips_quality_and_thumbnail() {
        let builder = DownloadCommandBuilder::new("yt-dlp", None);
        let request = DownloadRequest::new("https://example.com/a")
            .with_mode(Mode::Audio)
            .with_audio_format(AudioFormat::Wav);
        let cmd = builder.download(&request, &template(), None);

        assert!(cmd.args.windows(2).any(|w| w == ["--audio-format", "wav"]));
        assert!(!cmd.args.iter().any(|a| a == "--audio-quality"));
        assert!(!cmd.args.iter().any(|a| a == "--embed-thumbnail"));
        assert!(cmd.args.iter().any(|a| a == "--embed-metadata"));
    }

    #[test]
    fn video_with_ffmpeg_and_cookies() {
        let builder = DownloadCommandBuilder::new("/opt/yt-dlp", Some("/opt/ffmpeg".to_string()));
        let request = DownloadRequest::new("https://example.com/v").with_quality(Quality::Max1080);
        let cookies = PathBuf::from("/scratch/cookies_x.txt");
        let cmd = builder.download(&request, &template(), Some(&cookies));

        assert_eq!(cmd.binary_path, "/opt/yt-dlp");
        assert_eq!(
            cmd.args,
            vec![
                "--ffmpeg-location", "/opt/ffmpeg",
                "--restrict-filenames",
                "--cookies", "/scratch/cookies_x.txt",
                "-f", "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
                "--merge-output-format", "mp4",
                "--embed-metadata",
                "-o", "/scratch/1700000000000-abcd1234_.%(title).200B.%(ext)s",
                "--",
                "https://example.com/v",
            ]
        );
    }

    #[test]
    fn url_follows_option_terminator() {
        let builder = DownloadCommandBuilder::new("yt-dlp", None);
        let request = DownloadRequest::new("--exec=rm").with_quality(Quality::Best);
        let cmd = builder.download(&request, &template(), None);
        let n = cmd.args.len();
        assert_eq!(cmd.args[n - 2..], ["--", "--exec=rm"]);
        assert!(cmd.args.windows(2).any(|w| w == ["-f", "bestvideo*+bestaudio/best"]));
    }

    #[test]
    fn encoder_check_defaults_to_path_lookup() {
        let builder = DownloadCommandBuilder::new("yt-dlp", None);
        assert_eq!(builder.encoder_version_check().binary_path, "ffmpeg");
        assert_eq!(builder.version_check().args, vec!["--version"]);
    }

    #[test]
    fn binary_name_strips_directory_and_extension() {
        let cmd = DownloadCommand::new(r"/usr/local/bin/yt-dlp", "x");
        assert_eq!(cmd.binary_name(), "yt-dlp");
    }

    #[tokio::test]
    async fn missing_binary_is_a_downloader_error() {
        let cmd = DownloadCommand::new("/nonexistent/mediadrop-test-binary", "Test run");
        let err = cmd.execute(None).await.unwrap_err();
        assert!(matches!(err, RelayError::Downloader { code: None, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_run_is_killed_at_timeout() {
        let cmd = DownloadCommand::new("sleep", "Slow run").arg("5");
        let started = std::time::Instant::now();
        let err = cmd.execute(Some(Duration::from_secs(1))).await.unwrap_err();

        assert!(matches!(err, RelayError::Timeout { secs: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
