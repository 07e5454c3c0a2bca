use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{binary} failed{}: {message}", .code.map(|c| format!(" with exit code {}", c)).unwrap_or_default())]
    Downloader {
        binary: String,
        code: Option<i32>,
        message: String,
    },

    #[error("{binary} did not finish within {secs}s")]
    Timeout { binary: String, secs: u64 },

    #[error("Output file not found")]
    OutputNotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
