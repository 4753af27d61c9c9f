//! Playlist document rendering
//!
//! Pure functions of (ladder snapshot, segment metadata); no state, no
//! side effects, safe to call concurrently. Output follows the HLS
//! tag-per-line text format.

use abr_policy::{effective_bandwidth, QualityVariant};
use encoder_supervisor::SegmentMeta;

/// MIME type for both playlist flavors
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Segments advertised per media playlist
pub const SEGMENT_WINDOW: usize = 6;

/// Render the master (multivariant) playlist.
///
/// Lists currently enabled variants ordered by descending bandwidth,
/// ties broken by id, so regeneration is deterministic for a fixed
/// enabled set regardless of input order. Variant URIs are relative to
/// the master's own URL: `variants/{id}/playlist.m3u8` resolves to the
/// media-playlist route when the master is served under
/// `.../abr/playlist.m3u8`.
pub fn master_playlist(variants: &[QualityVariant]) -> String {
    let mut enabled: Vec<&QualityVariant> = variants.iter().filter(|v| v.enabled).collect();
    enabled.sort_by(|a, b| {
        effective_bandwidth(b)
            .cmp(&effective_bandwidth(a))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for v in enabled {
        playlist.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\nvariants/{}/playlist.m3u8\n",
            effective_bandwidth(v),
            v.width,
            v.height,
            v.id
        ));
    }
    playlist
}

/// Render a live media playlist from the most recent `window` segments.
///
/// Sequence numbers are taken from the segment metadata and must be
/// monotonically increasing; no `#EXT-X-ENDLIST` since the stream is
/// live.
pub fn media_playlist(segments: &[SegmentMeta], window: usize) -> String {
    let start = segments.len().saturating_sub(window);
    let window = &segments[start..];

    let target_duration = window
        .iter()
        .map(|s| s.duration.ceil() as u32)
        .max()
        .unwrap_or(3);
    let media_sequence = window.first().map(|s| s.sequence).unwrap_or(0);

    let mut playlist = format!(
        "#EXTM3U\n\
         #EXT-X-VERSION:3\n\
         #EXT-X-TARGETDURATION:{}\n\
         #EXT-X-MEDIA-SEQUENCE:{}\n",
        target_duration, media_sequence
    );

    for seg in window {
        playlist.push_str(&format!("#EXTINF:{:.3},\n{}\n", seg.duration, seg.filename));
    }

    playlist
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(id: &str, w: u32, h: u32, bandwidth: u64, enabled: bool) -> QualityVariant {
        QualityVariant {
            id: id.to_string(),
            label: id.to_string(),
            width: w,
            height: h,
            video_bitrate: bandwidth,
            audio_bitrate: 0,
            bandwidth,
            enabled,
        }
    }

    #[test]
    fn test_master_orders_descending_by_bandwidth() {
        let variants = vec![
            variant("480p", 854, 480, 800_000, true),
            variant("1080p", 1920, 1080, 5_000_000, true),
            variant("720p", 1280, 720, 2_500_000, true),
        ];
        let playlist = master_playlist(&variants);

        let p1080 = playlist.find("1080p/playlist.m3u8").unwrap();
        let p720 = playlist.find("720p/playlist.m3u8").unwrap();
        let p480 = playlist.find("480p/playlist.m3u8").unwrap();
        assert!(p1080 < p720 && p720 < p480);

        assert!(playlist.starts_with("#EXTM3U\n"));
        assert!(playlist.contains("#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080"));
    }

    #[test]
    fn test_master_deterministic_regardless_of_input_order() {
        let a = vec![
            variant("480p", 854, 480, 800_000, true),
            variant("720p", 1280, 720, 2_500_000, true),
        ];
        let b = vec![
            variant("720p", 1280, 720, 2_500_000, true),
            variant("480p", 854, 480, 800_000, true),
        ];
        assert_eq!(master_playlist(&a), master_playlist(&b));
    }

    #[test]
    fn test_master_uris_resolve_to_media_route() {
        let rendered = master_playlist(&[variant("720p", 1280, 720, 2_500_000, true)]);
        let uri = rendered.lines().find(|l| l.ends_with(".m3u8")).unwrap();
        assert_eq!(uri, "variants/720p/playlist.m3u8");

        // A player resolves the variant URI against the master's own URL;
        // the result must be the media-playlist route
        let master_url = "/api/streams/ch1/abr/playlist.m3u8";
        let base = &master_url[..master_url.rfind('/').unwrap() + 1];
        assert_eq!(
            format!("{base}{uri}"),
            "/api/streams/ch1/abr/variants/720p/playlist.m3u8"
        );
    }

    #[test]
    fn test_master_skips_disabled_variants() {
        let variants = vec![
            variant("480p", 854, 480, 800_000, true),
            variant("1080p", 1920, 1080, 5_000_000, false),
        ];
        let playlist = master_playlist(&variants);
        assert!(playlist.contains("480p"));
        assert!(!playlist.contains("1080p"));
    }

    #[test]
    fn test_media_playlist_window() {
        let segments: Vec<SegmentMeta> = (0..10)
            .map(|i| SegmentMeta {
                sequence: i,
                filename: format!("segment_{i:05}.ts"),
                duration: 2.0,
            })
            .collect();

        let playlist = media_playlist(&segments, SEGMENT_WINDOW);

        // Only the most recent 6 segments, sequence picks up where the
        // window starts
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:4"));
        assert!(!playlist.contains("segment_00003.ts"));
        assert!(playlist.contains("segment_00004.ts"));
        assert!(playlist.contains("segment_00009.ts"));
        assert!(playlist.contains("#EXT-X-TARGETDURATION:2"));
        // Live playlists must not be terminated
        assert!(!playlist.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_media_playlist_empty() {
        let playlist = media_playlist(&[], SEGMENT_WINDOW);
        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:0"));
        assert!(playlist.contains("#EXT-X-TARGETDURATION:3"));
    }
}
