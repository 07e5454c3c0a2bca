use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{Result, RelayError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub downloader: DownloaderConfig,
    pub scratch: ScratchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub bind: String,
    /// Port the HTTP server listens on
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Path to the downloader binary (yt-dlp)
    pub binary_path: String,
    /// Path to ffmpeg, forwarded to the downloader as --ffmpeg-location
    pub ffmpeg_path: Option<String>,
    /// Netscape-format cookie text written to a transient file per run
    pub cookies: Option<String>,
    /// Existing cookie file handed to the downloader as-is
    pub cookies_file: Option<PathBuf>,
    /// Wall-clock limit for one downloader run; unlimited when absent
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Directory holding transient output and cookie files
    pub dir: PathBuf,
    /// Files older than this are swept at startup (0 disables the sweep)
    pub stale_after_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        let binary_path = if cfg!(windows) {
            r"C:\Tools\yt-dlp.exe".to_string()
        } else {
            "yt-dlp".to_string()
        };

        Self {
            binary_path,
            ffmpeg_path: None,
            cookies: None,
            cookies_file: None,
            timeout_secs: None,
        }
    }
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".tmp"),
            stale_after_secs: 3600,
        }
    }
}

impl DownloaderConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl ScratchConfig {
    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0).then(|| Duration::from_secs(self.stale_after_secs))
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| RelayError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RelayError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| RelayError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get("YTDLP_PATH") {
            self.downloader.binary_path = path;
        }
        if let Some(path) = get("FFMPEG_PATH") {
            self.downloader.ffmpeg_path = Some(path);
        }
        if let Some(cookies) = get("YTDLP_COOKIES") {
            self.downloader.cookies = Some(cookies);
        }
        if let Some(path) = get("YTDLP_COOKIES_FILE") {
            self.downloader.cookies_file = Some(PathBuf::from(path));
        }
        if let Some(dir) = get("MEDIADROP_SCRATCH_DIR") {
            self.scratch.dir = PathBuf::from(dir);
        }
        if let Some(bind) = get("MEDIADROP_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = get("MEDIADROP_PORT") {
            self.server.port = port.trim().parse().map_err(|_| {
                RelayError::Config(format!("Invalid MEDIADROP_PORT '{}'", port))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [downloader]
            ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
            timeout_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.scratch.dir, PathBuf::from(".tmp"));
        assert_eq!(config.scratch.stale_after_secs, 3600);
        assert_eq!(config.downloader.ffmpeg_path.as_deref(), Some("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.downloader.timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("YTDLP_PATH", "/usr/local/bin/yt-dlp"),
                ("FFMPEG_PATH", "/usr/bin/ffmpeg"),
                ("YTDLP_COOKIES", "# Netscape HTTP Cookie File"),
                ("MEDIADROP_PORT", "8080"),
                ("MEDIADROP_BIND", ""),
            ]))
            .unwrap();

        assert_eq!(config.downloader.binary_path, "/usr/local/bin/yt-dlp");
        assert_eq!(config.downloader.ffmpeg_path.as_deref(), Some("/usr/bin/ffmpeg"));
        assert!(config.downloader.cookies.is_some());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "127.0.0.1");
    }

    #[test]
    fn bad_port_is_a_config_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[("MEDIADROP_PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn zero_disables_stale_sweep() {
        let scratch = ScratchConfig { dir: PathBuf::from("x"), stale_after_secs: 0 };
        assert!(scratch.stale_after().is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mediadrop.toml");
        let mut config = Config::default();
        config.server.port = 9000;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.server.port, 9000);
    }
}
