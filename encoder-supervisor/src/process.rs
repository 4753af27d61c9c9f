//! Per-variant ffmpeg process handling
//!
//! One ffmpeg child per (stream, variant) pulls the stream source,
//! scales/encodes to the variant's parameters and writes an HLS segment
//! window to `<output_dir>/<stream>/<variant>/`. Health is the process
//! being alive AND the playlist file staying fresh.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use abr_policy::QualityVariant;
use tokio::process::{Child, Command};

use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::supervisor::SegmentMeta;

pub(crate) struct VariantProcess {
    stream_id: String,
    variant_id: String,
    child: Option<Child>,
    out_dir: PathBuf,
    stale_after: Duration,
}

impl VariantProcess {
    pub fn new(config: &SupervisorConfig, stream_id: &str, variant: &QualityVariant) -> Self {
        let out_dir = config.output_dir.join(stream_id).join(&variant.id);
        Self {
            stream_id: stream_id.to_string(),
            variant_id: variant.id.clone(),
            child: None,
            out_dir,
            stale_after: Duration::from_secs(config.stale_after_secs),
        }
    }

    /// Spawn ffmpeg for this variant.
    pub async fn spawn(
        &mut self,
        config: &SupervisorConfig,
        variant: &QualityVariant,
    ) -> Result<(), SupervisorError> {
        tokio::fs::create_dir_all(&self.out_dir).await?;

        let source = config.source_for(&self.stream_id);
        let segment_pattern = self.out_dir.join("segment_%05d.ts");
        let playlist_path = self.playlist_path();

        let scale = format!("scale={}:{}", variant.width, variant.height);
        let video_rate = format!("{}", variant.video_bitrate);
        let audio_rate = format!("{}", variant.audio_bitrate);

        tracing::info!(
            stream = %self.stream_id,
            variant = %self.variant_id,
            %source,
            "starting variant encoder"
        );

        let child = Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-loglevel",
                "warning",
                "-i",
                &source,
                // Per-variant encode
                "-vf",
                &scale,
                "-c:v",
                "libx264",
                "-b:v",
                &video_rate,
                "-c:a",
                "aac",
                "-b:a",
                &audio_rate,
                // HLS segmenter output
                "-f",
                "hls",
                "-hls_time",
                &config.segment_seconds.to_string(),
                "-hls_list_size",
                &config.list_size.to_string(),
                "-hls_flags",
                "delete_segments+append_list",
                "-hls_segment_filename",
                segment_pattern.to_str().unwrap_or("segment_%05d.ts"),
            ])
            .arg(&playlist_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SupervisorError::FfmpegNotFound
                } else {
                    SupervisorError::Spawn {
                        stream_id: self.stream_id.clone(),
                        variant_id: self.variant_id.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        self.child = Some(child);
        Ok(())
    }

    /// Kill the child if it is still running.
    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::info!(
                stream = %self.stream_id,
                variant = %self.variant_id,
                "stopping variant encoder"
            );
            let _ = child.kill().await;
        }
    }

    /// Whether the process is alive and its playlist output is fresh.
    pub async fn check_health(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::warn!(
                    stream = %self.stream_id,
                    variant = %self.variant_id,
                    %status,
                    "variant encoder exited"
                );
                self.child = None;
                return false;
            }
            Ok(None) => {}
            Err(_) => {
                self.child = None;
                return false;
            }
        }

        // Process alive; check output freshness
        if let Ok(metadata) = tokio::fs::metadata(self.playlist_path()).await {
            if let Ok(modified) = metadata.modified() {
                let age = std::time::SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or_default();
                if age > self.stale_after {
                    tracing::warn!(
                        stream = %self.stream_id,
                        variant = %self.variant_id,
                        age_secs = age.as_secs(),
                        "variant output is stale, marking unhealthy"
                    );
                    return false;
                }
            }
        }

        true
    }

    /// Whether the playlist file exists yet (bring-up readiness check).
    pub async fn output_ready(&self) -> bool {
        tokio::fs::metadata(self.playlist_path()).await.is_ok()
    }

    /// Current segment window parsed from the segmenter's playlist.
    pub async fn segments(&self) -> Result<Vec<SegmentMeta>, SupervisorError> {
        let text = tokio::fs::read_to_string(self.playlist_path()).await?;
        Ok(parse_segments(&text))
    }

    pub fn playlist_path(&self) -> PathBuf {
        self.out_dir.join("index.m3u8")
    }

    /// Remove this variant's output directory.
    pub async fn cleanup(&self) -> Result<(), SupervisorError> {
        if self.out_dir.exists() {
            tokio::fs::remove_dir_all(&self.out_dir).await?;
        }
        Ok(())
    }
}

impl Drop for VariantProcess {
    fn drop(&mut self) {
        if let Some(ref mut child) = self.child {
            let _ = child.start_kill();
        }
    }
}

/// Parse the segment window out of a segmenter-written media playlist.
///
/// Sequence numbers continue from `#EXT-X-MEDIA-SEQUENCE`; lines that are
/// not `#EXTINF` + URI pairs are ignored.
pub(crate) fn parse_segments(playlist: &str) -> Vec<SegmentMeta> {
    let mut media_sequence: u64 = 0;
    let mut pending_duration: Option<f32> = None;
    let mut segments = Vec::new();

    for line in playlist.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            media_sequence = rest.parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let duration = rest
                .trim_end_matches(',')
                .split(',')
                .next()
                .and_then(|d| d.parse().ok())
                .unwrap_or(0.0);
            pending_duration = Some(duration);
        } else if !line.is_empty() && !line.starts_with('#') {
            if let Some(duration) = pending_duration.take() {
                segments.push(SegmentMeta {
                    sequence: media_sequence + segments.len() as u64,
                    filename: line.to_string(),
                    duration,
                });
            }
        }
    }

    segments
}
