//! mediadrop - web form and HTTP relay for yt-dlp
//!
//! Takes a media URL, runs yt-dlp (with ffmpeg as its encoder) into a
//! scratch directory, and streams the produced file back to the caller.

pub mod cli;
pub mod config;
pub mod delivery;
pub mod error;
pub mod media;
pub mod relay;
pub mod request;
pub mod scratch;
pub mod server;
