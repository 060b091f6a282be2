// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Clip descriptors, per-clip processing results, and the archive run key.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::OutputFormat;

/// Normalized detection rectangle; every component is in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        let c = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self { x: c(x), y: c(y), w: c(w), h: c(h) }
    }

    /// Grow the box by `fraction` of its size on each side, clamped to the frame.
    pub fn padded(&self, fraction: f64) -> BoundingBox {
        let pad_x = self.w * fraction;
        let pad_y = self.h * fraction;
        let x1 = (self.x - pad_x).max(0.0);
        let y1 = (self.y - pad_y).max(0.0);
        let x2 = (self.x + self.w + pad_x).min(1.0);
        let y2 = (self.y + self.h + pad_y).min(1.0);
        BoundingBox { x: x1, y: y1, w: x2 - x1, h: y2 - y1 }
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0.0 || self.h <= 0.0
    }
}

/// Event object as returned by the event query endpoint.
#[derive(Debug, Deserialize)]
pub struct EventRecord {
    pub id: String,
    #[serde(default)]
    pub camera: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default)]
    pub score: Option<f64>,
    pub start_time: f64,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default, rename = "box")]
    pub bounding_box: Option<Vec<f64>>,
}

/// Identity and metadata of one detected event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipDescriptor {
    pub id: String,
    pub camera: String,
    pub label: String,
    pub zone: Option<String>,
    pub score: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub bounding_box: Option<BoundingBox>,
}

impl From<EventRecord> for ClipDescriptor {
    fn from(event: EventRecord) -> Self {
        let end_time = match event.end_time {
            Some(end) if end >= event.start_time => end,
            Some(end) => {
                warn!(event = event.id, start = event.start_time, end, "Event ends before it starts, clamping");
                event.start_time
            }
            None => event.start_time,
        };
        let bounding_box = event
            .bounding_box
            .filter(|b| b.len() == 4)
            .map(|b| BoundingBox::new(b[0], b[1], b[2], b[3]));

        ClipDescriptor {
            id: event.id,
            camera: event.camera,
            label: event.label.unwrap_or_default(),
            zone: event.zones.into_iter().next(),
            score: event.score.unwrap_or(0.0).clamp(0.0, 1.0),
            start_time: event.start_time,
            end_time,
            bounding_box,
        }
    }
}

impl ClipDescriptor {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Score as a whole percentage.
    pub fn score_percent(&self) -> u32 {
        (self.score * 100.0).round() as u32
    }

    /// `label: 87%`, burned into the rendered clip.
    pub fn caption(&self) -> String {
        format!("{}: {}%", self.label, self.score_percent())
    }

    /// Local start time as `YYYY-MM-DD HH:MM:SS`.
    pub fn formatted_start(&self) -> String {
        let secs = self.start_time.floor() as i64;
        let nanos = ((self.start_time - secs as f64) * 1e9) as u32;
        match Local.timestamp_opt(secs, nanos).earliest() {
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => format!("{:.0}", self.start_time),
        }
    }

    pub fn chapter_title(&self) -> String {
        format!("{} ({}%) - {}", self.label, self.score_percent(), self.formatted_start())
    }
}

/// Where a clip stands in the processing pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClipStatus {
    #[default]
    Pending,
    Succeeded,
    Failed(String),
}

/// Outcome of processing one clip. Written once by the processor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessingResult {
    pub download_path: Option<PathBuf>,
    pub snapshot_path: Option<PathBuf>,
    pub rendered_path: Option<PathBuf>,
    /// Measured duration of the rendered clip in seconds.
    pub actual_duration: Option<f64>,
    pub status: ClipStatus,
}

impl ProcessingResult {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn succeeded(
        download_path: PathBuf,
        snapshot_path: Option<PathBuf>,
        rendered_path: PathBuf,
        actual_duration: f64,
    ) -> Self {
        Self {
            download_path: Some(download_path),
            snapshot_path,
            rendered_path: Some(rendered_path),
            actual_duration: Some(actual_duration),
            status: ClipStatus::Succeeded,
        }
    }

    /// A failed result never carries file references.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ClipStatus::Failed(reason.into()),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ClipStatus::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ClipStatus::Failed(_))
    }
}

/// A descriptor paired with what happened to it.
#[derive(Debug, Clone)]
pub struct ClipRecord {
    pub descriptor: ClipDescriptor,
    pub result: ProcessingResult,
}

/// One archive invocation: a (date, camera, zone?, label?) tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRun {
    pub date: NaiveDate,
    pub camera: String,
    pub zone: Option<String>,
    pub label: Option<String>,
}

impl ArchiveRun {
    pub fn new(date: NaiveDate, camera: impl Into<String>) -> Self {
        Self { date, camera: camera.into(), zone: None, label: None }
    }

    pub fn with_zone(mut self, zone: Option<String>) -> Self {
        self.zone = zone;
        self
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    /// `{date}-{camera}[-{zone}][-{label}]`
    pub fn file_stem(&self) -> String {
        let mut parts = vec![self.date.format("%Y-%m-%d").to_string(), self.camera.clone()];
        parts.extend(self.zone.iter().cloned());
        parts.extend(self.label.iter().cloned());
        parts.join("-")
    }

    /// Canonical archive path for this run.
    pub fn output_path(&self, output_dir: &Path, format: OutputFormat) -> PathBuf {
        output_dir.join(format!("{}.{}", self.file_stem(), format.extension()))
    }
}
