// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Picture-in-picture filter graph and encode parameters.
//!
//! ```text
//! [1:v] crop? → scale ow:-2 ─────────┐
//!                                    ▼
//! [0:v] ───────────────────────► overlay (W-ow-m, m) → drawtext caption → drawtext counter → [out]
//! ```
//!
//! Without an overlay still the graph degrades to the two `drawtext` stages.

use std::path::Path;

use crate::clip::BoundingBox;
use crate::config::{EncoderProfile, MediaConfig, OutputFormat};
use crate::media::probe::MediaInfo;

/// Padding around the detection box when cropping the still.
const BOX_PADDING: f64 = 0.1;
/// Gap between the overlay's bottom edge and the caption.
const CAPTION_GAP: u32 = 4;
/// Distance of the counter from the lower-left corner.
const COUNTER_PADDING: u32 = 20;

/// Geometry of the overlay and its captions for one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct PipLayout {
    pub overlay_width: u32,
    /// Known only when the still was probed.
    pub overlay_height: Option<u32>,
    pub overlay_x: u32,
    pub overlay_y: u32,
    pub caption_size: u32,
    pub counter_size: u32,
}

impl PipLayout {
    /// Overlay is an eighth of the main width, `margin` px from the top-right corner.
    pub fn compute(main: &MediaInfo, still: Option<&MediaInfo>, margin: u32) -> Self {
        let overlay_width = even((main.width / 8).max(2));
        let overlay_x = main.width.saturating_sub(overlay_width + margin);
        let overlay_height = still
            .filter(|s| s.width > 0)
            .map(|s| even(((overlay_width as u64 * s.height as u64) / s.width as u64).max(2) as u32));

        PipLayout {
            overlay_width,
            overlay_height,
            overlay_x,
            overlay_y: margin,
            caption_size: (overlay_width / 12).max(12),
            counter_size: (main.width / 40).max(12),
        }
    }
}

fn even(v: u32) -> u32 {
    v - v % 2
}

/// Running counter, `index` is 1-based.
pub fn counter_text(index: usize, total: usize) -> String {
    format!("{index}/{total}")
}

/// Escape a value for use inside a filter option, then for the graph itself.
pub fn escape_filter_value(text: &str) -> String {
    let mut option_level = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '\'' | ':') {
            option_level.push('\\');
        }
        option_level.push(c);
    }
    let mut graph_level = String::with_capacity(option_level.len());
    for c in option_level.chars() {
        if matches!(c, '\\' | '\'' | ',' | ';' | '[' | ']') {
            graph_level.push('\\');
        }
        graph_level.push(c);
    }
    graph_level
}

/// Inputs for one PiP graph.
pub struct PipGraph<'a> {
    pub layout: &'a PipLayout,
    pub caption: &'a str,
    pub counter: &'a str,
    /// Present when the still is usable as input `1`.
    pub overlay: bool,
    pub crop: Option<BoundingBox>,
    pub font_file: Option<&'a Path>,
}

impl PipGraph<'_> {
    /// Render the `-filter_complex` description; the result is labelled `[out]`.
    pub fn render(&self) -> String {
        let l = self.layout;
        let font = self
            .font_file
            .map(|f| format!(":fontfile={}", escape_filter_value(&f.to_string_lossy())))
            .unwrap_or_default();
        let shadow = "shadowcolor=black:shadowx=2:shadowy=2";

        let counter = format!(
            "drawtext=expansion=none{font}:text={}:fontcolor=white:fontsize={}:x={pad}:y=h-th-{pad}:{shadow}",
            escape_filter_value(self.counter),
            l.counter_size,
            pad = COUNTER_PADDING,
        );

        if !self.overlay {
            let caption = format!(
                "drawtext=expansion=none{font}:text={}:fontcolor=white:fontsize={}:x=w-tw-{m}:y={m}:{shadow}",
                escape_filter_value(self.caption),
                l.caption_size,
                m = l.overlay_y,
            );
            return format!("[0:v]{caption},{counter}[out]");
        }

        let crop = self
            .crop
            .filter(|b| !b.is_empty())
            .map(|b| {
                let p = b.padded(BOX_PADDING);
                format!(
                    "crop=w=iw*{:.4}:h=ih*{:.4}:x=iw*{:.4}:y=ih*{:.4},",
                    p.w, p.h, p.x, p.y
                )
            })
            .unwrap_or_default();

        let caption_y = match l.overlay_height {
            Some(h) => (l.overlay_y + h + CAPTION_GAP).to_string(),
            None => format!("{}", l.overlay_y + l.overlay_width + CAPTION_GAP),
        };
        let caption = format!(
            "drawtext=expansion=none{font}:text={}:fontcolor=white:fontsize={}:x={}:y={}:{shadow}",
            escape_filter_value(self.caption),
            l.caption_size,
            l.overlay_x,
            caption_y,
        );

        format!(
            "[1:v]{crop}scale={}:-2[pip];[0:v][pip]overlay={}:{}[base];[base]{caption},{counter}[out]",
            l.overlay_width, l.overlay_x, l.overlay_y,
        )
    }
}

/// Codec, rate and tagging arguments shared by every rendered clip of a run.
///
/// All clips of a run go through the same profile, which is what makes the
/// later stream-copy concatenation valid.
pub fn encode_args(media: &MediaConfig, format: OutputFormat) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    match format {
        OutputFormat::Webm => {
            let crf = media.webm_crf.to_string();
            push(&["-c:v", "libvpx-vp9", "-crf", crf.as_str(), "-b:v", "0", "-pix_fmt", "yuv420p"]);
            push(&["-c:a", "libopus"]);
        }
        OutputFormat::Mp4 => {
            match media.encoder.resolve() {
                EncoderProfile::Hardware => {
                    push(&["-c:v", media.hardware_codec.as_str(), "-b:v", media.hardware_bitrate.as_str()]);
                }
                _ => {
                    let crf = media.software_crf.to_string();
                    push(&[
                        "-c:v",
                        media.software_codec.as_str(),
                        "-crf",
                        crf.as_str(),
                        "-preset",
                        media.software_preset.as_str(),
                        "-pix_fmt",
                        "yuv420p",
                    ]);
                }
            }
            push(&["-tag:v", "hvc1", "-c:a", "copy"]);
        }
    }
    let rate = media.frame_rate.to_string();
    push(&["-r", rate.as_str()]);
    args
}

/// Container name for `-f`.
pub fn muxer(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Mp4 => "mp4",
        OutputFormat::Webm => "webm",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(width: u32, height: u32) -> MediaInfo {
        MediaInfo { width, height, duration: 0.0 }
    }

    #[test]
    fn overlay_is_an_eighth_in_the_top_right() {
        let layout = PipLayout::compute(&info(1920, 1080), None, 10);
        assert_eq!(layout.overlay_width, 240);
        assert_eq!(layout.overlay_x, 1920 - 240 - 10);
        assert_eq!(layout.overlay_y, 10);
        assert_eq!(layout.counter_size, 48);
        assert_eq!(layout.overlay_height, None);
    }

    #[test]
    fn overlay_height_follows_still_aspect() {
        let layout = PipLayout::compute(&info(1280, 720), Some(&info(400, 300)), 10);
        assert_eq!(layout.overlay_width, 160);
        assert_eq!(layout.overlay_height, Some(120));
    }

    #[test]
    fn escaping_protects_option_and_graph_syntax() {
        assert_eq!(escape_filter_value("person: 87%"), r"person\\: 87%");
        assert_eq!(escape_filter_value("3/10"), "3/10");
        assert_eq!(escape_filter_value("a,b"), r"a\,b");
    }

    #[test]
    fn graph_with_overlay() {
        let layout = PipLayout::compute(&info(1920, 1080), Some(&info(320, 240)), 10);
        let graph = PipGraph {
            layout: &layout,
            caption: "car: 90%",
            counter: "2/7",
            overlay: true,
            crop: None,
            font_file: None,
        }
        .render();
        assert!(graph.starts_with("[1:v]scale=240:-2[pip];[0:v][pip]overlay=1670:10[base];"));
        assert!(graph.contains(r"text=car\\: 90%"));
        assert!(graph.contains("text=2/7"));
        assert!(graph.contains("y=194"));
        assert!(graph.ends_with("[out]"));
    }

    #[test]
    fn graph_without_overlay_only_draws_text() {
        let layout = PipLayout::compute(&info(640, 360), None, 10);
        let graph = PipGraph {
            layout: &layout,
            caption: "dog: 50%",
            counter: "1/1",
            overlay: false,
            crop: Some(BoundingBox::new(0.2, 0.2, 0.2, 0.2)),
            font_file: None,
        }
        .render();
        assert!(graph.starts_with("[0:v]drawtext="));
        assert!(!graph.contains("overlay"));
        assert!(!graph.contains("crop"));
    }

    #[test]
    fn crop_uses_padded_box() {
        let layout = PipLayout::compute(&info(1920, 1080), None, 10);
        let graph = PipGraph {
            layout: &layout,
            caption: "x",
            counter: "1/1",
            overlay: true,
            crop: Some(BoundingBox::new(0.5, 0.5, 0.2, 0.2)),
            font_file: None,
        }
        .render();
        assert!(graph.starts_with("[1:v]crop=w=iw*0.2400:h=ih*0.2400:x=iw*0.4800:y=ih*0.4800,scale="));
    }

    #[test]
    fn software_mp4_profile() {
        let media = MediaConfig { encoder: EncoderProfile::Software, ..MediaConfig::default() };
        let args = encode_args(&media, OutputFormat::Mp4);
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx265"]));
        assert!(args.windows(2).any(|w| w == ["-tag:v", "hvc1"]));
        assert!(args.windows(2).any(|w| w == ["-r", "20"]));
    }

    #[test]
    fn webm_profile_uses_vp9_and_opus() {
        let args = encode_args(&MediaConfig::default(), OutputFormat::Webm);
        assert!(args.windows(2).any(|w| w == ["-c:v", "libvpx-vp9"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "libopus"]));
        assert!(!args.iter().any(|a| a == "hvc1"));
    }
}
