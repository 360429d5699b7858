use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub transcoder: TranscoderConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL clients reach this server under; used to build playback and
    /// local segment URLs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscoderConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Directory holding one subdirectory per session.
    #[serde(default = "default_streams_root")]
    pub streams_root: PathBuf,

    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u64,

    /// How many later segments must exist on disk before a segment is
    /// considered flushed and safe to publish.
    #[serde(default = "default_lookahead")]
    pub lookahead_count: u32,

    /// Sliding-window bound for the playlist.
    #[serde(default = "default_max_segments")]
    pub max_segments_in_playlist: usize,

    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,
}

fn default_streams_root() -> PathBuf {
    PathBuf::from("/tmp/segmenter/streams")
}
fn default_segment_duration() -> u64 {
    10
}
fn default_lookahead() -> u32 {
    2
}
fn default_max_segments() -> usize {
    6
}
fn default_start_timeout() -> u64 {
    30
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            streams_root: default_streams_root(),
            segment_duration_secs: default_segment_duration(),
            lookahead_count: default_lookahead(),
            max_segments_in_playlist: default_max_segments(),
            start_timeout_secs: default_start_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_scheduler_enabled() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub local: LocalStorageConfig,

    #[serde(default)]
    pub s3: S3Config,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_enabled")]
    pub enabled: bool,
}

fn default_local_enabled() -> bool {
    true
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            enabled: default_local_enabled(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct S3Config {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub bucket: String,

    #[serde(default = "default_s3_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible stores (MinIO and friends).
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}
