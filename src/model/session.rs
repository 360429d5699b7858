use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{AdvertisementInsert, VideoQuality, Watermark};

/// One live or scheduled stream, identified by an opaque id.
///
/// Shared between the orchestrator, the watcher/upload pipeline and the
/// playlist builder. Mutation happens under the per-session lock held by
/// whoever writes the session back to the store, so the struct itself stays
/// plain data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub source_url: String,
    /// Backend names recorded at creation, already filtered to the ones
    /// actually configured.
    pub backends: Vec<String>,
    pub quality: VideoQuality,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub watermark: Option<Watermark>,
    pub created_at: DateTime<Utc>,

    /// Pid of the transcoder process currently attached, if any.
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub processing: bool,
    /// Total segments handled over the session lifetime; grows monotonically.
    #[serde(default)]
    pub segment_count: u64,

    #[serde(default)]
    sequences: BTreeSet<u64>,
    /// Rendered manifest per backend, keyed by lowercase backend name.
    #[serde(default)]
    playlists: HashMap<String, String>,
    /// Ad breaks keyed by the sequence number they start at.
    #[serde(default)]
    advertisements: BTreeMap<u64, AdvertisementInsert>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        source_url: impl Into<String>,
        backends: Vec<String>,
        quality: VideoQuality,
        scheduled_start: Option<DateTime<Utc>>,
        watermark: Option<Watermark>,
    ) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            backends,
            quality,
            scheduled_start,
            watermark,
            created_at: Utc::now(),
            pid: None,
            active: false,
            processing: false,
            segment_count: 0,
            sequences: BTreeSet::new(),
            playlists: HashMap::new(),
            advertisements: BTreeMap::new(),
        }
    }

    /// Inserts a sequence into the sliding window, evicting the smallest
    /// entries until the window fits `max_segments`.
    pub fn add_sequence(&mut self, sequence: u64, max_segments: usize) {
        self.sequences.insert(sequence);
        while self.sequences.len() > max_segments {
            self.sequences.pop_first();
        }
    }

    /// Smallest retained sequence; 0 when the window is empty.
    pub fn first_sequence(&self) -> u64 {
        self.sequences.first().copied().unwrap_or(0)
    }

    /// Retained sequences in ascending order.
    pub fn sequences(&self) -> impl Iterator<Item = u64> + '_ {
        self.sequences.iter().copied()
    }

    pub fn window_len(&self) -> usize {
        self.sequences.len()
    }

    pub fn set_playlist(&mut self, backend: &str, content: String) {
        self.playlists.insert(backend.to_lowercase(), content);
    }

    pub fn playlist(&self, backend: &str) -> Option<&str> {
        self.playlists.get(&backend.to_lowercase()).map(String::as_str)
    }

    pub fn add_advertisement(&mut self, start_sequence: u64, ad: AdvertisementInsert) {
        self.advertisements.insert(start_sequence, ad);
    }

    pub fn advertisements(&self) -> &BTreeMap<u64, AdvertisementInsert> {
        &self.advertisements
    }

    /// Playback URL per configured backend.
    pub fn playback_urls(&self, base_url: &str) -> Vec<String> {
        let base = base_url.trim_end_matches('/');
        self.backends
            .iter()
            .map(|backend| {
                format!(
                    "{}/api/stream/{}/{}/playlist.m3u8",
                    base,
                    self.id,
                    backend.to_lowercase()
                )
            })
            .collect()
    }

    /// Whether this scheduled session should be launched now.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.active
            && !self.processing
            && self.pid.is_none()
            && self.scheduled_start.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            "abc",
            "rtmp://example.com/live",
            vec!["LOCAL".to_string(), "S3".to_string()],
            VideoQuality::Low,
            None,
            None,
        )
    }

    #[test]
    fn test_window_never_exceeds_max() {
        let mut s = session();
        for seq in 0..50 {
            s.add_sequence(seq, 6);
            assert!(s.window_len() <= 6);
        }
        assert_eq!(s.first_sequence(), 44);
    }

    #[test]
    fn test_eviction_removes_smallest() {
        let mut s = session();
        for seq in [5, 1, 9, 3] {
            s.add_sequence(seq, 3);
        }
        let retained: Vec<u64> = s.sequences().collect();
        assert_eq!(retained, vec![3, 5, 9]);
    }

    #[test]
    fn test_first_sequence_empty_window() {
        assert_eq!(session().first_sequence(), 0);
    }

    #[test]
    fn test_playlist_keys_are_case_insensitive() {
        let mut s = session();
        s.set_playlist("S3", "#EXTM3U\n".to_string());
        assert_eq!(s.playlist("s3"), Some("#EXTM3U\n"));
        assert_eq!(s.playlist("S3"), Some("#EXTM3U\n"));
        assert_eq!(s.playlist("gcs"), None);
    }

    #[test]
    fn test_playback_urls() {
        let urls = session().playback_urls("http://localhost:8080/");
        assert_eq!(
            urls,
            vec![
                "http://localhost:8080/api/stream/abc/local/playlist.m3u8",
                "http://localhost:8080/api/stream/abc/s3/playlist.m3u8",
            ]
        );
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut s = session();
        assert!(!s.is_due(now), "unscheduled session is never due");

        s.scheduled_start = Some(now - chrono::Duration::seconds(1));
        assert!(s.is_due(now));

        s.scheduled_start = Some(now + chrono::Duration::hours(1));
        assert!(!s.is_due(now));

        s.scheduled_start = Some(now - chrono::Duration::seconds(1));
        s.active = true;
        assert!(!s.is_due(now), "active session is not due again");
    }
}
