use serde::{Deserialize, Serialize};

/// Maximum advertisement break length in seconds.
pub const MAX_AD_DURATION_SECS: u64 = 300;

/// One advertisement break spliced into a session's playlist.
///
/// The segment list is copied at construction and never mutated afterwards;
/// the duration is clamped to [`MAX_AD_DURATION_SECS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertisementInsert {
    source_path: String,
    duration_secs: u64,
    segment_names: Vec<String>,
    processed: bool,
}

impl AdvertisementInsert {
    pub fn new(
        source_path: impl Into<String>,
        duration_secs: u64,
        segment_names: &[String],
    ) -> Self {
        Self {
            source_path: source_path.into(),
            duration_secs: duration_secs.min(MAX_AD_DURATION_SECS),
            segment_names: segment_names.to_vec(),
            processed: false,
        }
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn segment_names(&self) -> &[String] {
        &self.segment_names
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    pub fn mark_processed(&mut self) {
        self.processed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("advertisement_{i}.ts")).collect()
    }

    #[test]
    fn test_duration_clamped_at_construction() {
        let ad = AdvertisementInsert::new("/ads/spot.ts", 301, &names(2));
        assert_eq!(ad.duration_secs(), MAX_AD_DURATION_SECS);

        let ad = AdvertisementInsert::new("/ads/spot.ts", 100_000, &names(2));
        assert_eq!(ad.duration_secs(), MAX_AD_DURATION_SECS);
    }

    #[test]
    fn test_duration_below_cap_preserved() {
        let ad = AdvertisementInsert::new("/ads/spot.ts", 300, &names(2));
        assert_eq!(ad.duration_secs(), 300);

        let ad = AdvertisementInsert::new("/ads/spot.ts", 30, &names(2));
        assert_eq!(ad.duration_secs(), 30);
    }

    #[test]
    fn test_segment_list_is_copied() {
        let mut source = names(3);
        let ad = AdvertisementInsert::new("/ads/spot.ts", 30, &source);
        source.clear();
        assert_eq!(ad.segment_names().len(), 3);
    }
}
