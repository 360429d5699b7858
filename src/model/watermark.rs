use serde::{Deserialize, Serialize};

/// Optional overlay burned into the outgoing video.
///
/// Carries either literal `text` or an `image_path`; when both are set the
/// image wins. Position, size, color and opacity default to a small
/// top-left label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watermark {
    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub image_path: Option<String>,

    #[serde(default = "default_position")]
    pub x: i32,

    #[serde(default = "default_position")]
    pub y: i32,

    /// Font size for text, target height in pixels for images.
    #[serde(default = "default_size")]
    pub size: u32,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

fn default_position() -> i32 {
    10
}

fn default_size() -> u32 {
    24
}

fn default_color() -> String {
    "white".to_string()
}

fn default_opacity() -> f32 {
    0.8
}

impl Default for Watermark {
    fn default() -> Self {
        Self {
            text: None,
            image_path: None,
            x: default_position(),
            y: default_position(),
            size: default_size(),
            color: default_color(),
            opacity: default_opacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let watermark: Watermark = serde_json::from_str(r#"{"text": "LIVE"}"#).unwrap();
        assert_eq!(watermark.text.as_deref(), Some("LIVE"));
        assert_eq!(watermark.x, 10);
        assert_eq!(watermark.y, 10);
        assert_eq!(watermark.size, 24);
        assert_eq!(watermark.color, "white");
        assert!((watermark.opacity - 0.8).abs() < f32::EPSILON);
    }
}
