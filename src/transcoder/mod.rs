//! External transcoder process construction and supervision.
//!
//! ffmpeg is a supervised child process, not a library binding: the command
//! line is built by a pure function and the manager only spawns, records the
//! pid and waits for exit.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::model::{VideoQuality, Watermark};
use crate::store::SessionStore;

/// Exit code ffmpeg conventionally returns when a live input terminates.
const LIVE_TERMINATION_EXIT_CODE: i32 = 255;

/// Builds the full ffmpeg argument list for a live segmenting run.
///
/// Pure so the command line is testable without spawning anything. The
/// filter graph resets timestamps, halves the frame rate and applies the
/// optional watermark (image overlay wins over text when both are set).
pub fn build_args(
    source_url: &str,
    output_pattern: &Path,
    quality: VideoQuality,
    watermark: Option<&Watermark>,
    segment_duration_secs: u64,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-live_start_index".into(),
        "-1".into(),
        "-i".into(),
        source_url.into(),
    ];

    let filter = match watermark {
        Some(wm) if wm.image_path.is_some() => {
            let image = wm.image_path.clone().unwrap_or_default();
            args.push("-i".into());
            args.push(image);
            format!(
                "[0:v]setpts=PTS-STARTPTS,select='not(mod(n\\,2))'[filtered];\
                 [1:v]scale=-1:{},format=rgba,colorchannelmixer=aa={}[watermark];\
                 [filtered][watermark]overlay={}:{}[outv]",
                wm.size, wm.opacity, wm.x, wm.y
            )
        }
        Some(wm) if wm.text.is_some() => {
            let text = wm.text.clone().unwrap_or_default();
            format!(
                "[0:v]setpts=PTS-STARTPTS,select='not(mod(n\\,2))',\
                 drawtext=text='{}':fontsize={}:fontcolor={}@{}:x={}:y={}[outv]",
                text, wm.size, wm.color, wm.opacity, wm.x, wm.y
            )
        }
        _ => "[0:v]setpts=PTS-STARTPTS,select='not(mod(n\\,2))'[outv]".to_string(),
    };

    args.extend(["-filter_complex".into(), filter]);
    args.extend([
        "-map".into(),
        "[outv]".into(),
        "-map".into(),
        "0:a?".into(),
    ]);

    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-b:v".into(),
        format!("{}k", quality.video_bitrate_kbps()),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{}k", quality.audio_bitrate_kbps()),
    ]);

    args.extend([
        "-f".into(),
        "segment".into(),
        "-segment_time".into(),
        segment_duration_secs.to_string(),
        "-segment_format".into(),
        "mpegts".into(),
        "-segment_list_size".into(),
        "0".into(),
        "-segment_list_flags".into(),
        "+live".into(),
    ]);

    args.extend(["-copyts".into(), "-start_at_zero".into()]);
    args.push(output_pattern.to_string_lossy().into_owned());
    args
}

pub struct TranscoderManager {
    ffmpeg_path: String,
    segment_duration_secs: u64,
    store: Arc<dyn SessionStore>,
}

impl TranscoderManager {
    pub fn new(
        ffmpeg_path: impl Into<String>,
        segment_duration_secs: u64,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            segment_duration_secs,
            store,
        }
    }

    /// Spawns ffmpeg for the session and supervises it until exit.
    ///
    /// Records the pid and runtime flags on the session before blocking on
    /// process exit; the flags are cleared when the process ends, however it
    /// ends. Callers run this off their critical path.
    pub async fn start_processing(
        &self,
        session_id: &str,
        source_url: &str,
        output_pattern: &Path,
        quality: VideoQuality,
        watermark: Option<&Watermark>,
    ) -> Result<()> {
        if let Some(parent) = output_pattern.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = build_args(
            source_url,
            output_pattern,
            quality,
            watermark,
            self.segment_duration_secs,
        );
        tracing::info!(
            session_id = %session_id,
            "Starting transcoder: {} {}",
            self.ffmpeg_path,
            args.join(" ")
        );

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::Transcoder(format!("failed to spawn {}: {e}", self.ffmpeg_path))
            })?;

        if let Some(mut session) = self.store.get(session_id).await {
            session.pid = child.id();
            session.active = true;
            session.processing = true;
            self.store.save(&session).await;
        }

        let wait_result = child.wait().await;

        // Clear the runtime flags whatever the outcome.
        if let Some(mut session) = self.store.get(session_id).await {
            session.pid = None;
            session.processing = false;
            session.active = false;
            self.store.save(&session).await;
        }

        let status = wait_result
            .map_err(|e| Error::Transcoder(format!("failed waiting for transcoder: {e}")))?;

        match status.code() {
            Some(0) | Some(LIVE_TERMINATION_EXIT_CODE) => {
                tracing::info!(session_id = %session_id, "Transcoder finished");
            }
            code => {
                tracing::warn!(session_id = %session_id, ?code, "Transcoder stopped abnormally");
            }
        }
        Ok(())
    }

    /// Forcibly terminates the transcoder recorded for the session, if any.
    /// Tolerates unknown sessions and already-exited processes.
    pub async fn stop_process(&self, session_id: &str) {
        let Some(session) = self.store.get(session_id).await else {
            return;
        };
        let Some(pid) = session.pid else {
            return;
        };
        kill_pid(pid);
        tracing::info!(session_id = %session_id, pid, "Transcoder process stopped");
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // ESRCH just means the process already exited.
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        tracing::debug!(pid, "Kill failed: {}", e);
    }
}

#[cfg(not(unix))]
fn kill_pid(pid: u32) {
    tracing::warn!(pid, "Forcible process termination is not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn pattern() -> PathBuf {
        PathBuf::from("/tmp/streams/abc/segment_%d.ts")
    }

    #[test]
    fn test_build_args_without_watermark() {
        let args = build_args(
            "rtmp://example.com/live",
            &pattern(),
            VideoQuality::Medium,
            None,
            10,
        );

        let expected: Vec<String> = [
            "-live_start_index",
            "-1",
            "-i",
            "rtmp://example.com/live",
            "-filter_complex",
            "[0:v]setpts=PTS-STARTPTS,select='not(mod(n\\,2))'[outv]",
            "-map",
            "[outv]",
            "-map",
            "0:a?",
            "-c:v",
            "libx264",
            "-b:v",
            "2500k",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-f",
            "segment",
            "-segment_time",
            "10",
            "-segment_format",
            "mpegts",
            "-segment_list_size",
            "0",
            "-segment_list_flags",
            "+live",
            "-copyts",
            "-start_at_zero",
            "/tmp/streams/abc/segment_%d.ts",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(args, expected);
    }

    #[test]
    fn test_build_args_with_text_watermark() {
        let watermark = Watermark {
            text: Some("LIVE".to_string()),
            ..Watermark::default()
        };
        let args = build_args(
            "rtmp://example.com/live",
            &pattern(),
            VideoQuality::Low,
            Some(&watermark),
            10,
        );

        let filter_index = args.iter().position(|a| a == "-filter_complex").unwrap();
        let filter = &args[filter_index + 1];
        assert!(filter.contains("drawtext=text='LIVE'"));
        assert!(filter.contains("fontsize=24"));
        assert!(filter.contains("fontcolor=white@0.8"));
        assert!(filter.contains("x=10:y=10"));
        // text watermark adds no second input
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 1);
    }

    #[test]
    fn test_build_args_with_image_watermark() {
        let watermark = Watermark {
            text: Some("ignored".to_string()),
            image_path: Some("/tmp/logo.png".to_string()),
            size: 48,
            ..Watermark::default()
        };
        let args = build_args(
            "rtmp://example.com/live",
            &pattern(),
            VideoQuality::Low,
            Some(&watermark),
            10,
        );

        // image input is appended as a second -i
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        assert!(args.contains(&"/tmp/logo.png".to_string()));

        let filter_index = args.iter().position(|a| a == "-filter_complex").unwrap();
        let filter = &args[filter_index + 1];
        assert!(filter.contains("scale=-1:48"));
        assert!(filter.contains("colorchannelmixer=aa=0.8"));
        assert!(filter.contains("overlay=10:10"));
        assert!(!filter.contains("drawtext"), "image overlay wins over text");
    }

    #[test]
    fn test_quality_drives_bitrates() {
        for (quality, video, audio) in [
            (VideoQuality::Low, "800k", "96k"),
            (VideoQuality::Medium, "2500k", "128k"),
            (VideoQuality::High, "5000k", "192k"),
        ] {
            let args = build_args("rtmp://example.com/live", &pattern(), quality, None, 10);
            assert!(args.contains(&video.to_string()));
            assert!(args.contains(&audio.to_string()));
        }
    }
}
