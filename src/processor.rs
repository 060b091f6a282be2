// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-clip worker: download → thumbnail → probe → PiP render → measure.
//!
//! Every file a worker writes lives under the run's work directory and is
//! named after the clip id, so concurrent workers never collide. Ids are
//! reduced to a file-name-safe key first; the catalog does not promise them
//! free of path separators.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::catalog::EventCatalogClient;
use crate::clip::{ClipDescriptor, ProcessingResult};
use crate::config::{MediaConfig, OutputFormat};
use crate::error::{ArchiveError, Result};
use crate::media::filters::{self, PipGraph, PipLayout};
use crate::media::{FfmpegCommand, MediaEngine, MediaInfo};

/// 1-based position of a clip within its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipPosition {
    pub index: usize,
    pub total: usize,
}

impl ClipPosition {
    pub fn counter(&self) -> String {
        filters::counter_text(self.index, self.total)
    }
}

/// File-name-safe form of a clip id. A rewritten id gets the clip's position
/// appended so two rewritten ids cannot map to the same key.
pub fn file_key(clip_id: &str, position: ClipPosition) -> String {
    let safe: String = clip_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    if safe == clip_id && !safe.is_empty() {
        safe
    } else {
        format!("{safe}-{}", position.index)
    }
}

/// Turns one descriptor into a rendered clip. Never fails the run itself;
/// problems are reported through [`ProcessingResult::failed`].
#[async_trait]
pub trait ClipWorker: Send + Sync {
    async fn process(&self, clip: &ClipDescriptor, position: ClipPosition, work_dir: &Path) -> ProcessingResult;
}

/// The production worker: catalog client plus media engine.
pub struct ClipProcessor {
    client: EventCatalogClient,
    engine: Arc<dyn MediaEngine>,
    media: MediaConfig,
    format: OutputFormat,
}

/// Files produced for one clip.
struct Rendered {
    download: PathBuf,
    snapshot: Option<PathBuf>,
    output: PathBuf,
    duration: f64,
}

impl ClipProcessor {
    pub fn new(
        client: EventCatalogClient,
        engine: Arc<dyn MediaEngine>,
        media: MediaConfig,
        format: OutputFormat,
    ) -> Self {
        Self { client, engine, media, format }
    }

    async fn render(&self, clip: &ClipDescriptor, position: ClipPosition, work_dir: &Path) -> Result<Rendered> {
        let key = file_key(&clip.id, position);
        let download = work_dir.join(format!("clip_{key}.mp4"));
        let bytes = self.client.download_clip(&clip.id, &download).await?;
        debug!(clip = clip.id, bytes, "Raw clip stored");

        let main = self.engine.probe(&download).await?;
        let (snapshot, still) = self.fetch_still(clip, &key, work_dir).await;

        let layout = PipLayout::compute(&main, still.as_ref(), self.media.overlay_margin);
        let caption = clip.caption();
        let counter = position.counter();
        let graph = PipGraph {
            layout: &layout,
            caption: &caption,
            counter: &counter,
            overlay: snapshot.is_some(),
            crop: if self.media.crop_to_box { clip.bounding_box } else { None },
            font_file: self.media.font_file.as_deref(),
        }
        .render();

        let output = work_dir.join(format!("pip_{key}.{}", self.format.extension()));
        let mut command = FfmpegCommand::new(&output).input(&download);
        if let Some(still) = &snapshot {
            command = command.input(still);
        }
        let command = command
            .filter_complex(graph)
            .map("[out]")
            .map("0:a?")
            .output_args(filters::encode_args(&self.media, self.format));
        self.engine.run(&command).await?;

        let rendered = self.engine.probe(&output).await?;
        if rendered.duration <= 0.0 {
            return Err(ArchiveError::MediaProbe {
                path: output,
                reason: "rendered clip has no duration".into(),
            });
        }

        Ok(Rendered { download, snapshot, output, duration: rendered.duration })
    }

    /// Download and probe the overlay still. Any failure means "no overlay".
    async fn fetch_still(
        &self,
        clip: &ClipDescriptor,
        key: &str,
        work_dir: &Path,
    ) -> (Option<PathBuf>, Option<MediaInfo>) {
        let path = work_dir.join(format!("snapshot_{key}.jpg"));
        if let Err(e) = self.client.download_thumbnail(&clip.id, &path).await {
            warn!(clip = clip.id, error = %e, "Thumbnail unavailable, rendering without overlay");
            return (None, None);
        }
        match self.engine.probe(&path).await {
            Ok(info) => (Some(path), Some(info)),
            Err(e) => {
                warn!(clip = clip.id, error = %e, "Thumbnail unreadable, rendering without overlay");
                (None, None)
            }
        }
    }
}

#[async_trait]
impl ClipWorker for ClipProcessor {
    async fn process(&self, clip: &ClipDescriptor, position: ClipPosition, work_dir: &Path) -> ProcessingResult {
        let started = Instant::now();
        match self.render(clip, position, work_dir).await {
            Ok(r) => {
                info!(
                    clip = clip.id,
                    position = %position.counter(),
                    duration = r.duration,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Clip rendered"
                );
                ProcessingResult::succeeded(r.download, r.snapshot, r.output, r.duration)
            }
            Err(e) => {
                warn!(
                    clip = clip.id,
                    position = %position.counter(),
                    reason = e.reason_code(),
                    error = %e,
                    "Clip failed"
                );
                ProcessingResult::failed(e.to_string())
            }
        }
    }
}
