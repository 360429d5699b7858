//! HLS playlist construction.
//!
//! One manifest per backend, built over a bounded sliding window of segment
//! sequences with advertisement breaks spliced in behind discontinuity
//! markers.

use regex::Regex;
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::model::{AdvertisementInsert, Session};
use crate::storage::{BackendRegistry, StorageBackend};
use crate::store::{SessionLocks, SessionStore};

fn sequence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(segment|advertisement)_(\d+)").expect("valid regex"))
}

/// Extracts the numeric sequence from a segment file name.
///
/// Soft-fails to 0 on names that do not match the family pattern; a bad name
/// must never stall the pipeline.
pub fn extract_sequence(segment_name: &str) -> u64 {
    let parsed = sequence_regex()
        .captures(segment_name)
        .and_then(|caps| caps.get(2))
        .and_then(|digits| digits.as_str().parse::<u64>().ok());
    match parsed {
        Some(sequence) => sequence,
        None => {
            tracing::warn!("No sequence number found in segment name: {}", segment_name);
            0
        }
    }
}

pub struct PlaylistBuilder {
    store: Arc<dyn SessionStore>,
    registry: Arc<BackendRegistry>,
    locks: Arc<SessionLocks>,
    segment_duration_secs: u64,
    max_segments: usize,
}

impl PlaylistBuilder {
    pub fn new(
        store: Arc<dyn SessionStore>,
        registry: Arc<BackendRegistry>,
        locks: Arc<SessionLocks>,
        segment_duration_secs: u64,
        max_segments: usize,
    ) -> Self {
        Self {
            store,
            registry,
            locks,
            segment_duration_secs,
            max_segments,
        }
    }

    /// Parses the sequence out of `segment_name`, slides the window and
    /// re-renders the manifest for every backend configured on the session.
    ///
    /// Serialized per session through the session lock so concurrent segment
    /// completions cannot interleave window reads.
    pub async fn add_segment(&self, session_id: &str, segment_name: &str) {
        let lock = self.locks.for_session(session_id);
        let _guard = lock.lock().await;

        let Some(mut session) = self.store.get(session_id).await else {
            tracing::warn!(
                session_id = %session_id,
                segment = %segment_name,
                "Dropping segment for unknown session"
            );
            return;
        };

        let sequence = extract_sequence(segment_name);
        session.add_sequence(sequence, self.max_segments);
        session.segment_count += 1;
        self.render_all(&mut session);
        self.store.save(&session).await;
    }

    /// Registers an ad break starting at `start_sequence` and re-renders.
    pub async fn insert_advertisement(
        &self,
        session_id: &str,
        start_sequence: u64,
        mut ad: AdvertisementInsert,
    ) -> Result<()> {
        let lock = self.locks.for_session(session_id);
        let _guard = lock.lock().await;

        let Some(mut session) = self.store.get(session_id).await else {
            return Err(Error::NotFound(session_id.to_string()));
        };

        ad.mark_processed();
        session.add_advertisement(start_sequence, ad);
        self.render_all(&mut session);
        self.store.save(&session).await;
        Ok(())
    }

    /// Stored manifest for the backend, or an empty skeleton for unknown
    /// sessions/backends. Never fails.
    pub async fn playlist_content(&self, session_id: &str, backend_name: &str) -> String {
        match self.store.get(session_id).await {
            Some(session) => session
                .playlist(backend_name)
                .map(str::to_string)
                .unwrap_or_else(|| self.empty_playlist(0)),
            None => self.empty_playlist(0),
        }
    }

    fn render_all(&self, session: &mut Session) {
        if session.window_len() == 0 {
            return;
        }
        for backend in self.registry.resolve(&session.backends) {
            let content = self.render(session, backend.as_ref());
            session.set_playlist(backend.name(), content);
        }
    }

    /// Renders one manifest for one backend.
    fn render(&self, session: &Session, backend: &dyn StorageBackend) -> String {
        let base = self.segment_duration_secs;
        let ads = session.advertisements();

        // Target duration: ad durations count, but never past the base
        // segment duration since every rendered entry is capped at it.
        let mut target_duration = base;
        for ad in ads.values() {
            target_duration = target_duration.max(ad.duration_secs().min(base));
        }

        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:3\n");
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{target_duration}");
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", session.first_sequence());
        out.push_str("#EXT-X-DISCONTINUITY-SEQUENCE:0\n");

        // Start sequence of the break currently being rendered. A break's
        // entries are emitted once, at the first retained sequence it
        // covers; later sequences inside the same break add nothing.
        let mut current_break: Option<u64> = None;
        for sequence in session.sequences() {
            match ad_covering(ads, sequence) {
                Some((start, ad)) => {
                    if current_break != Some(start) {
                        if current_break.is_none() {
                            out.push_str("#EXT-X-DISCONTINUITY\n");
                        }
                        for (index, name) in ad.segment_names().iter().enumerate() {
                            // Remaining ad time at this index, clamped to
                            // [1, base] so a short tail never renders a
                            // zero-length entry.
                            let remaining = ad.duration_secs().saturating_sub(index as u64 * base);
                            let duration = remaining.min(base).max(1);
                            let _ = writeln!(out, "#EXTINF:{duration}.0,");
                            let _ = writeln!(out, "{}", backend.segment_url(&session.id, name));
                        }
                        current_break = Some(start);
                    }
                }
                None => {
                    if current_break.is_some() {
                        out.push_str("#EXT-X-DISCONTINUITY\n");
                    }
                    let name = format!("segment_{sequence}.ts");
                    let _ = writeln!(out, "#EXTINF:{base}.0,");
                    let _ = writeln!(out, "{}", backend.segment_url(&session.id, &name));
                    current_break = None;
                }
            }
        }
        out
    }

    fn empty_playlist(&self, media_sequence: u64) -> String {
        format!(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:{}\n#EXT-X-MEDIA-SEQUENCE:{}\n",
            self.segment_duration_secs, media_sequence
        )
    }
}

/// The ad break covering `sequence`, if any: a break starting at `s` with
/// `n` segments covers sequences `s..s+n`.
fn ad_covering(
    ads: &std::collections::BTreeMap<u64, AdvertisementInsert>,
    sequence: u64,
) -> Option<(u64, &AdvertisementInsert)> {
    ads.range(..=sequence)
        .next_back()
        .filter(|(start, ad)| {
            let len = ad.segment_names().len() as u64;
            len > 0 && sequence < **start + len
        })
        .map(|(start, ad)| (*start, ad))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VideoQuality;
    use crate::storage::LocalBackend;
    use crate::store::MemorySessionStore;
    use std::path::PathBuf;

    const SEGMENT_DURATION: u64 = 10;

    fn builder() -> PlaylistBuilder {
        let store = Arc::new(MemorySessionStore::new());
        let registry = Arc::new(BackendRegistry::new(vec![Arc::new(LocalBackend::new(
            PathBuf::from("/tmp/streams"),
            "http://localhost:8080",
        ))]));
        PlaylistBuilder::new(
            store,
            registry,
            Arc::new(SessionLocks::new()),
            SEGMENT_DURATION,
            6,
        )
    }

    async fn seed_session(builder: &PlaylistBuilder, id: &str) {
        let session = Session::new(
            id,
            "rtmp://example.com/live",
            vec!["LOCAL".to_string()],
            VideoQuality::Low,
            None,
            None,
        );
        builder.store.save(&session).await;
    }

    #[test]
    fn test_extract_sequence() {
        assert_eq!(extract_sequence("segment_42.ts"), 42);
        assert_eq!(extract_sequence("advertisement_7.ts"), 7);
        assert_eq!(extract_sequence("garbage.ts"), 0);
        assert_eq!(extract_sequence(""), 0);
    }

    #[tokio::test]
    async fn test_media_sequence_tracks_window_minimum() {
        let builder = builder();
        seed_session(&builder, "s1").await;

        for seq in 0..10 {
            builder.add_segment("s1", &format!("segment_{seq}.ts")).await;
            let session = builder.store.get("s1").await.unwrap();
            assert!(session.window_len() <= 6);
            let manifest = session.playlist("local").unwrap();
            let expected = format!("#EXT-X-MEDIA-SEQUENCE:{}", session.first_sequence());
            assert!(manifest.contains(&expected), "manifest: {manifest}");
        }

        let session = builder.store.get("s1").await.unwrap();
        assert_eq!(session.first_sequence(), 4);
        assert_eq!(session.segment_count, 10);
    }

    #[tokio::test]
    async fn test_discontinuity_markers_at_break_boundaries() {
        let builder = builder();
        seed_session(&builder, "s1").await;

        let ad = AdvertisementInsert::new(
            "/ads/spot.ts",
            2 * SEGMENT_DURATION,
            &[
                "advertisement_3.ts".to_string(),
                "advertisement_4.ts".to_string(),
            ],
        );
        builder.insert_advertisement("s1", 3, ad).await.unwrap();

        // Window [1(regular), 2(regular), 3(ad), 4(ad), 5(regular)].
        for name in [
            "segment_1.ts",
            "segment_2.ts",
            "advertisement_3.ts",
            "advertisement_4.ts",
            "segment_5.ts",
        ] {
            builder.add_segment("s1", name).await;
        }

        let manifest = builder.playlist_content("s1", "local").await;
        let markers = manifest.matches("#EXT-X-DISCONTINUITY\n").count();
        assert_eq!(markers, 2, "manifest: {manifest}");

        // One marker entering the break, one leaving it; the break's entries
        // appear exactly once.
        let lines: Vec<&str> = manifest.lines().collect();
        let entering = lines
            .iter()
            .position(|l| *l == "#EXT-X-DISCONTINUITY")
            .unwrap();
        assert!(lines[entering + 2].contains("advertisement_3.ts"));
        assert_eq!(manifest.matches("advertisement_3.ts").count(), 1);
        assert_eq!(manifest.matches("advertisement_4.ts").count(), 1);
        assert!(manifest.contains("/streams/s1/segment_5.ts"));
        assert!(!manifest.contains("/streams/s1/segment_3.ts"));
    }

    #[tokio::test]
    async fn test_ad_entry_durations_apportioned_and_clamped() {
        let builder = builder();
        seed_session(&builder, "s1").await;

        // 15 seconds over two entries with a 10 second base: 10 then 5.
        let ad = AdvertisementInsert::new(
            "/ads/spot.ts",
            15,
            &[
                "advertisement_1.ts".to_string(),
                "advertisement_2.ts".to_string(),
            ],
        );
        builder.insert_advertisement("s1", 1, ad).await.unwrap();
        builder.add_segment("s1", "advertisement_1.ts").await;

        let manifest = builder.playlist_content("s1", "local").await;
        assert!(manifest.contains("#EXTINF:10.0,"), "manifest: {manifest}");
        assert!(manifest.contains("#EXTINF:5.0,"), "manifest: {manifest}");

        // Three entries against 15 seconds: the tail clamps to 1, never 0.
        let ad = AdvertisementInsert::new(
            "/ads/spot.ts",
            15,
            &[
                "advertisement_1.ts".to_string(),
                "advertisement_2.ts".to_string(),
                "advertisement_3.ts".to_string(),
            ],
        );
        builder.insert_advertisement("s1", 1, ad).await.unwrap();
        let manifest = builder.playlist_content("s1", "local").await;
        assert!(manifest.contains("#EXTINF:1.0,"), "manifest: {manifest}");
        assert!(!manifest.contains("#EXTINF:0.0,"), "manifest: {manifest}");
    }

    #[tokio::test]
    async fn test_empty_playlist_for_unknown_session_or_backend() {
        let builder = builder();

        let manifest = builder.playlist_content("missing", "local").await;
        assert_eq!(
            manifest,
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n"
        );

        seed_session(&builder, "s1").await;
        let manifest = builder.playlist_content("s1", "gcs").await;
        assert!(manifest.contains("#EXT-X-MEDIA-SEQUENCE:0"));
    }

    #[tokio::test]
    async fn test_malformed_name_lands_on_sequence_zero() {
        let builder = builder();
        seed_session(&builder, "s1").await;

        builder.add_segment("s1", "garbage.ts").await;
        let session = builder.store.get("s1").await.unwrap();
        assert_eq!(session.first_sequence(), 0);
        assert_eq!(session.window_len(), 1);
    }

    #[tokio::test]
    async fn test_add_segment_for_unknown_session_is_noop() {
        let builder = builder();
        builder.add_segment("missing", "segment_1.ts").await;
        assert!(builder.store.get("missing").await.is_none());
    }
}
