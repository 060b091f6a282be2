// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Event server connection.
    #[serde(default)]
    pub server: ServerConfig,
    /// Media engine and encode profile.
    #[serde(default)]
    pub media: MediaConfig,
    /// Worker pool and failure policy.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Where archives land.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Event server connection.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Base URL of the event server, e.g. `http://nvr.local:5000`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Upper bound on events per query; -1 asks for all of them.
    #[serde(default = "default_event_limit")]
    pub event_limit: i64,
    /// Which still image to use as the overlay.
    #[serde(default)]
    pub thumbnail_kind: ThumbnailKind,
    #[serde(default = "default_thumbnail_quality")]
    pub thumbnail_quality: u8,
    /// Ask the server to draw the detection box on the still.
    #[serde(default = "default_true")]
    pub thumbnail_bbox: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            event_limit: default_event_limit(),
            thumbnail_kind: ThumbnailKind::default(),
            thumbnail_quality: default_thumbnail_quality(),
            thumbnail_bbox: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailKind {
    Thumbnail,
    #[default]
    Snapshot,
}

impl ThumbnailKind {
    pub fn file_name(self) -> &'static str {
        match self {
            ThumbnailKind::Thumbnail => "thumbnail.jpg",
            ThumbnailKind::Snapshot => "snapshot.jpg",
        }
    }
}

/// Encoder selection for rendered clips.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncoderProfile {
    /// Hardware on macOS, software elsewhere.
    #[default]
    Auto,
    Hardware,
    Software,
}

impl EncoderProfile {
    /// Collapse `Auto` into a concrete profile for this host.
    pub fn resolve(self) -> EncoderProfile {
        match self {
            EncoderProfile::Auto if cfg!(target_os = "macos") => EncoderProfile::Hardware,
            EncoderProfile::Auto => EncoderProfile::Software,
            other => other,
        }
    }
}

/// Media engine binaries and encode parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: PathBuf,
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: PathBuf,
    #[serde(default)]
    pub encoder: EncoderProfile,
    #[serde(default = "default_hardware_codec")]
    pub hardware_codec: String,
    #[serde(default = "default_hardware_bitrate")]
    pub hardware_bitrate: String,
    #[serde(default = "default_software_codec")]
    pub software_codec: String,
    #[serde(default = "default_software_crf")]
    pub software_crf: u8,
    #[serde(default = "default_software_preset")]
    pub software_preset: String,
    #[serde(default = "default_webm_crf")]
    pub webm_crf: u8,
    /// Output frame rate of every rendered clip.
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Gap in pixels between the overlay and the frame edge.
    #[serde(default = "default_overlay_margin")]
    pub overlay_margin: u32,
    /// Font for captions; the engine's default font when unset.
    #[serde(default)]
    pub font_file: Option<PathBuf>,
    /// Crop the overlay still to the detection box.
    #[serde(default)]
    pub crop_to_box: bool,
    /// Kill an engine invocation that runs longer than this.
    #[serde(default)]
    pub engine_timeout_secs: Option<u64>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
            encoder: EncoderProfile::default(),
            hardware_codec: default_hardware_codec(),
            hardware_bitrate: default_hardware_bitrate(),
            software_codec: default_software_codec(),
            software_crf: default_software_crf(),
            software_preset: default_software_preset(),
            webm_crf: default_webm_crf(),
            frame_rate: default_frame_rate(),
            overlay_margin: default_overlay_margin(),
            font_file: None,
            crop_to_box: false,
            engine_timeout_secs: None,
        }
    }
}

/// Worker pool sizing and the failure policy.
#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    /// Clips processed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Clips per chunk; a chunk drains fully before the next starts.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Failed clips tolerated before the run is aborted.
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            chunk_size: default_chunk_size(),
            max_failures: default_max_failures(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Webm,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Archive destination.
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
    /// Parent for run-local temp dirs; the system temp dir when unset.
    #[serde(default)]
    pub work_root: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            format: OutputFormat::default(),
            work_root: None,
        }
    }
}

fn default_base_url() -> String { "http://localhost:5000".into() }
fn default_request_timeout() -> u64 { 30 }
fn default_event_limit() -> i64 { -1 }
fn default_thumbnail_quality() -> u8 { 95 }
fn default_true() -> bool { true }
fn default_ffmpeg_bin() -> PathBuf { PathBuf::from("ffmpeg") }
fn default_ffprobe_bin() -> PathBuf { PathBuf::from("ffprobe") }
fn default_hardware_codec() -> String { "hevc_videotoolbox".into() }
fn default_hardware_bitrate() -> String { "5000k".into() }
fn default_software_codec() -> String { "libx265".into() }
fn default_software_crf() -> u8 { 23 }
fn default_software_preset() -> String { "medium".into() }
fn default_webm_crf() -> u8 { 30 }
fn default_frame_rate() -> u32 { 20 }
fn default_overlay_margin() -> u32 { 10 }
fn default_concurrency() -> usize { 4 }
fn default_chunk_size() -> usize { 25 }
fn default_max_failures() -> usize { 2 }
fn default_output_dir() -> PathBuf { PathBuf::from("archives") }

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ArchiveError::Config(format!("Cannot read config file: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ArchiveError::Config(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.server.base_url)
            .map_err(|e| ArchiveError::Config(format!("base_url is not a URL: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(ArchiveError::Config("base_url cannot be used as a base".into()));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ArchiveError::Config("request_timeout_secs must be > 0".into()));
        }
        if self.server.thumbnail_quality == 0 || self.server.thumbnail_quality > 100 {
            return Err(ArchiveError::Config("thumbnail_quality must be in 1..=100".into()));
        }
        if self.batch.concurrency == 0 {
            return Err(ArchiveError::Config("concurrency must be > 0".into()));
        }
        if self.batch.chunk_size == 0 {
            return Err(ArchiveError::Config("chunk_size must be > 0".into()));
        }
        if self.media.frame_rate == 0 {
            return Err(ArchiveError::Config("frame_rate must be > 0".into()));
        }
        if self.media.software_crf > 51 {
            return Err(ArchiveError::Config("software_crf must be <= 51".into()));
        }
        if self.media.webm_crf > 63 {
            return Err(ArchiveError::Config("webm_crf must be <= 63".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.server.base_url, "http://localhost:5000");
        assert_eq!(cfg.batch.max_failures, 2);
        assert_eq!(cfg.media.frame_rate, 20);
        assert_eq!(cfg.output.format, OutputFormat::Mp4);
        assert_eq!(cfg.server.thumbnail_kind, ThumbnailKind::Snapshot);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = Config::from_toml(
            r#"
            [server]
            base_url = "http://nvr.lan:5000"
            thumbnail_kind = "thumbnail"

            [media]
            encoder = "software"
            frame_rate = 15

            [batch]
            concurrency = 8
            max_failures = 5

            [output]
            format = "webm"
            dir = "/srv/archives"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.base_url, "http://nvr.lan:5000");
        assert_eq!(cfg.server.thumbnail_kind.file_name(), "thumbnail.jpg");
        assert_eq!(cfg.media.encoder.resolve(), EncoderProfile::Software);
        assert_eq!(cfg.batch.concurrency, 8);
        assert_eq!(cfg.output.format.extension(), "webm");
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = Config::from_toml("[batch]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(err, ArchiveError::Config(_)));
    }

    #[test]
    fn rejects_bad_base_url() {
        assert!(Config::from_toml("[server]\nbase_url = \"not a url\"\n").is_err());
    }
}
