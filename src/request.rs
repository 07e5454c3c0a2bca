//! Download request decoded from the form's JSON body.
//!
//! Only `url` is validated strictly. The option fields fall back to a
//! sensible choice for anything unrecognised so older or hand-written
//! clients keep working.

use serde_json::Value;

use crate::error::{Result, RelayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    #[default]
    Max720,
    Max1080,
    Best,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
}

impl Mode {
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_lowercase().as_str() {
            "audio" => Mode::Audio,
            _ => Mode::Video,
        }
    }
}

impl Quality {
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_lowercase().as_str() {
            "720" => Quality::Max720,
            "1080" => Quality::Max1080,
            _ => Quality::Best,
        }
    }

    /// Format selector handed to the downloader's `-f` flag
    pub fn format_selector(self) -> &'static str {
        match self {
            Quality::Max720 => "bestvideo[height<=720]+bestaudio/best[height<=720]",
            Quality::Max1080 => "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
            Quality::Best => "bestvideo*+bestaudio/best",
        }
    }
}

impl AudioFormat {
    pub fn from_hint(hint: &str) -> Self {
        match hint.trim().to_lowercase().as_str() {
            "wav" => AudioFormat::Wav,
            _ => AudioFormat::Mp3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }

    /// WAV is uncompressed and normally carries no cover art
    pub fn is_lossy(self) -> bool {
        matches!(self, AudioFormat::Mp3)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub mode: Mode,
    pub quality: Quality,
    pub audio_format: AudioFormat,
}

impl DownloadRequest {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            mode: Mode::default(),
            quality: Quality::default(),
            audio_format: AudioFormat::default(),
        }
    }

    /// Decode `{url, mode, quality, audioFormat}`.
    ///
    /// Absent option fields take their defaults; present but non-string
    /// values are treated like any other unrecognised hint.
    pub fn from_json(body: &Value) -> Result<Self> {
        let object = body
            .as_object()
            .ok_or_else(|| RelayError::InvalidRequest("Invalid URL".to_string()))?;

        let url = object
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| RelayError::InvalidRequest("Invalid URL".to_string()))?;

        let hint = |key: &str| object.get(key).map(|v| v.as_str().unwrap_or_default());

        Ok(Self {
            url: url.to_string(),
            mode: hint("mode").map(Mode::from_hint).unwrap_or_default(),
            quality: hint("quality").map(Quality::from_hint).unwrap_or_default(),
            audio_format: hint("audioFormat").map(AudioFormat::from_hint).unwrap_or_default(),
        })
    }

    /// Decode a raw request body
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| RelayError::InvalidRequest(format!("Invalid JSON body: {}", e)))?;
        Self::from_json(&value)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_audio_format(mut self, audio_format: AudioFormat) -> Self {
        self.audio_format = audio_format;
        self
    }
}
