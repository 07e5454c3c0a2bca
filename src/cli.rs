use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the download form and relay endpoint
    Serve {
        /// Address to bind (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Fetch a single URL into a local directory
    Fetch {
        /// Media URL
        #[arg(short, long)]
        url: String,

        /// video or audio
        #[arg(short, long, default_value = "video")]
        mode: String,

        /// Video quality: 720, 1080 or best
        #[arg(short, long, default_value = "720")]
        quality: String,

        /// Audio format: mp3 or wav
        #[arg(short, long, default_value = "mp3")]
        audio_format: String,

        /// Directory the finished file is moved into
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Report downloader and encoder versions
    Check,
}
