// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! ffprobe output parsing.

use std::path::Path;

use serde::Deserialize;

use crate::error::{ArchiveError, Result};

/// Dimensions and duration of the first video stream of a file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    /// Seconds; zero for stills.
    pub duration: f64,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Arguments for `ffprobe` that produce the JSON [`parse_probe`] expects.
pub fn probe_args(path: &Path) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-print_format".into(),
        "json".into(),
        "-show_format".into(),
        "-show_streams".into(),
        path.to_string_lossy().to_string(),
    ]
}

/// Parse ffprobe's JSON. Stream duration wins over container duration.
pub fn parse_probe(path: &Path, json: &[u8]) -> Result<MediaInfo> {
    let probe_err = |reason: String| ArchiveError::MediaProbe { path: path.to_path_buf(), reason };

    let probe: FfprobeOutput =
        serde_json::from_slice(json).map_err(|e| probe_err(format!("bad ffprobe output: {e}")))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| probe_err("no video stream".into()))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(probe_err("video stream has no dimensions".into())),
    };

    let duration = video
        .duration
        .as_deref()
        .and_then(parse_seconds)
        .or_else(|| probe.format.as_ref()?.duration.as_deref().and_then(parse_seconds))
        .unwrap_or(0.0);

    Ok(MediaInfo { width, height, duration })
}

fn parse_seconds(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|d| d.is_finite() && *d >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_stream_duration() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "duration": "9.0"},
                {"codec_type": "video", "width": 1920, "height": 1080, "duration": "5.050000"}
            ],
            "format": {"duration": "5.100000"}
        }"#;
        let info = parse_probe(Path::new("a.mp4"), json).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.duration - 5.05).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_container_duration() {
        let json = br#"{"streams":[{"codec_type":"video","width":640,"height":360}],
                        "format":{"duration":"3.2"}}"#;
        let info = parse_probe(Path::new("a.webm"), json).unwrap();
        assert!((info.duration - 3.2).abs() < 1e-9);
    }

    #[test]
    fn still_image_has_zero_duration() {
        let json = br#"{"streams":[{"codec_type":"video","width":320,"height":240}]}"#;
        let info = parse_probe(Path::new("t.jpg"), json).unwrap();
        assert_eq!(info.duration, 0.0);
    }

    #[test]
    fn missing_video_stream_is_a_probe_error() {
        let json = br#"{"streams":[{"codec_type":"audio"}]}"#;
        let err = parse_probe(Path::new("a.mp4"), json).unwrap_err();
        assert!(matches!(err, ArchiveError::MediaProbe { .. }));
    }
}
