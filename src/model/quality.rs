use serde::{Deserialize, Serialize};

/// Fixed encoding tiers handed to the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    #[default]
    Low,
    Medium,
    High,
}

impl VideoQuality {
    pub fn width(&self) -> u32 {
        match self {
            VideoQuality::Low => 480,
            VideoQuality::Medium => 1280,
            VideoQuality::High => 1920,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            VideoQuality::Low => 360,
            VideoQuality::Medium => 720,
            VideoQuality::High => 1080,
        }
    }

    pub fn video_bitrate_kbps(&self) -> u32 {
        match self {
            VideoQuality::Low => 800,
            VideoQuality::Medium => 2500,
            VideoQuality::High => 5000,
        }
    }

    pub fn audio_bitrate_kbps(&self) -> u32 {
        match self {
            VideoQuality::Low => 96,
            VideoQuality::Medium => 128,
            VideoQuality::High => 192,
        }
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width(), self.height())
    }
}
