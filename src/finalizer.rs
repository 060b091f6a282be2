// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Two-stage publish: stream-copy concat, then chapter merge into a staging
//! file that is renamed onto the canonical path only once complete.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::OutputFormat;
use crate::error::{ArchiveError, Result};
use crate::media::filters;
use crate::media::{FfmpegCommand, MediaEngine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The output already existed; nothing was touched.
    Skipped(PathBuf),
    Written(PathBuf),
}

pub struct ArchiveFinalizer {
    engine: Arc<dyn MediaEngine>,
    format: OutputFormat,
}

/// Removes the staging file unless disarmed.
struct StagingGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            match std::fs::remove_file(&self.path) {
                Ok(()) => warn!(path = ?self.path, "Removed incomplete archive"),
                Err(e) => warn!(path = ?self.path, error = %e, "Cannot remove incomplete archive"),
            }
        }
    }
}

impl ArchiveFinalizer {
    pub fn new(engine: Arc<dyn MediaEngine>, format: OutputFormat) -> Self {
        Self { engine, format }
    }

    /// Staging path next to `output`, so the final rename stays on one filesystem.
    pub fn staging_path(output: &Path) -> PathBuf {
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "archive".into());
        output.with_file_name(format!(".{name}.partial"))
    }

    pub async fn finalize(
        &self,
        concat_list: &Path,
        metadata: &Path,
        output: &Path,
        work_dir: &Path,
    ) -> Result<FinalizeOutcome> {
        if output.exists() {
            info!(output = ?output, "Archive already exists, skipping");
            return Ok(FinalizeOutcome::Skipped(output.to_path_buf()));
        }
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let started = Instant::now();
        let muxer = filters::muxer(self.format);

        let joined = work_dir.join(format!("concat.{}", self.format.extension()));
        let concat = FfmpegCommand::new(&joined)
            .input_with(["-f", "concat", "-safe", "0"], concat_list)
            .map("0")
            .stream_copy()
            .format(muxer);
        self.engine.run(&concat).await?;
        info!(
            intermediate = ?joined,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Clips concatenated"
        );

        let staging = Self::staging_path(output);
        let mut guard = StagingGuard { path: staging.clone(), armed: true };

        let mut merge = FfmpegCommand::new(&staging)
            .input(&joined)
            .input(metadata)
            .map("0")
            .output_args(["-map_metadata", "1", "-map_chapters", "1"])
            .stream_copy();
        if self.format == OutputFormat::Mp4 {
            merge = merge.output_args(["-tag:v", "hvc1", "-movflags", "+faststart"]);
        }
        let merge = merge.format(muxer);
        self.engine.run(&merge).await?;

        if !staging.exists() {
            return Err(ArchiveError::engine(
                format!("chapter merge produced no file at {}", staging.display()),
                None,
                None,
            ));
        }
        // A concurrent run may have published meanwhile; keep its file.
        if output.exists() {
            info!(output = ?output, "Archive appeared during finalization, discarding ours");
            return Ok(FinalizeOutcome::Skipped(output.to_path_buf()));
        }
        tokio::fs::rename(&staging, output).await?;
        guard.armed = false;

        info!(
            output = ?output,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Archive published"
        );
        Ok(FinalizeOutcome::Written(output.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaInfo;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Writes the requested output unless told to fail on the n-th call.
    struct RecordingEngine {
        fail_on: Option<usize>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl MediaEngine for RecordingEngine {
        async fn probe(&self, _path: &Path) -> Result<MediaInfo> {
            Ok(MediaInfo { width: 1, height: 1, duration: 1.0 })
        }

        async fn run(&self, command: &FfmpegCommand) -> Result<()> {
            let n = {
                let mut calls = self.calls.lock();
                calls.push(command.build_args());
                calls.len()
            };
            std::fs::write(command.output(), b"partial")?;
            if self.fail_on == Some(n) {
                return Err(ArchiveError::engine("merge failed", Some("boom".into()), Some(1)));
            }
            Ok(())
        }
    }

    fn engine(fail_on: Option<usize>) -> Arc<RecordingEngine> {
        Arc::new(RecordingEngine { fail_on, calls: Mutex::new(Vec::new()) })
    }

    #[tokio::test]
    async fn publishes_through_staging() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out/2024-10-08-cam.mp4");
        let eng = engine(None);
        let finalizer = ArchiveFinalizer::new(eng.clone(), OutputFormat::Mp4);

        let outcome = finalizer
            .finalize(Path::new("list.txt"), Path::new("meta"), &out, dir.path())
            .await
            .unwrap();
        assert_eq!(outcome, FinalizeOutcome::Written(out.clone()));
        assert!(out.exists());
        assert!(!ArchiveFinalizer::staging_path(&out).exists());

        let calls = eng.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].windows(2).any(|w| w == ["-f", "concat"]));
        assert!(calls[1].windows(2).any(|w| w == ["-map_chapters", "1"]));
        assert!(calls[1].windows(2).any(|w| w == ["-movflags", "+faststart"]));
    }

    #[tokio::test]
    async fn failed_merge_leaves_nothing_at_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("2024-10-08-cam.webm");
        let finalizer = ArchiveFinalizer::new(engine(Some(2)), OutputFormat::Webm);

        let err = finalizer
            .finalize(Path::new("list.txt"), Path::new("meta"), &out, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Engine { exit_code: Some(1), .. }));
        assert!(!out.exists());
        assert!(!ArchiveFinalizer::staging_path(&out).exists());
    }

    #[tokio::test]
    async fn existing_output_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("done.mp4");
        std::fs::write(&out, b"archive").unwrap();
        let eng = engine(None);
        let finalizer = ArchiveFinalizer::new(eng.clone(), OutputFormat::Mp4);

        let outcome = finalizer
            .finalize(Path::new("list.txt"), Path::new("meta"), &out, dir.path())
            .await
            .unwrap();
        assert_eq!(outcome, FinalizeOutcome::Skipped(out.clone()));
        assert!(eng.calls.lock().is_empty());
        assert_eq!(std::fs::read(&out).unwrap(), b"archive");
    }
}
