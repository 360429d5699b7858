mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./segmenter.toml",
        "./config.toml",
        "/etc/segmenter/config.toml",
    ];

    for path_str in default_paths {
        let path = Path::new(path_str);
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.stream.segment_duration_secs == 0 {
        anyhow::bail!("Segment duration must be at least 1 second");
    }

    if config.stream.max_segments_in_playlist == 0 {
        anyhow::bail!("Playlist window must hold at least 1 segment");
    }

    if config.storage.s3.enabled && config.storage.s3.bucket.is_empty() {
        anyhow::bail!("S3 storage is enabled but no bucket is configured");
    }

    if !config.storage.local.enabled && !config.storage.s3.enabled {
        anyhow::bail!("At least one storage backend must be enabled");
    }

    if !config.stream.streams_root.exists() {
        tracing::warn!(
            "Streams root does not exist yet: {:?}",
            config.stream.streams_root
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.stream.segment_duration_secs, 10);
        assert_eq!(config.stream.lookahead_count, 2);
        assert!(config.storage.local.enabled);
        assert!(!config.storage.s3.enabled);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9090

            [storage.s3]
            enabled = true
            bucket = "clips"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.storage.s3.enabled);
        assert_eq!(config.storage.s3.bucket, "clips");
        assert_eq!(config.storage.s3.region, "us-east-1");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_s3_without_bucket_is_rejected() {
        let config: Config = toml::from_str(
            r#"
            [storage.s3]
            enabled = true
            "#,
        )
        .unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_no_backend_is_rejected() {
        let config: Config = toml::from_str(
            r#"
            [storage.local]
            enabled = false
            "#,
        )
        .unwrap();
        assert!(validate_config(&config).is_err());
    }
}
