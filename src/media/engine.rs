// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Media engine boundary.
//!
//! The pipeline only ever talks to [`MediaEngine`]; [`FfmpegEngine`] runs the
//! real `ffmpeg` / `ffprobe` binaries as child processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::MediaConfig;
use crate::error::{ArchiveError, Result};
use crate::media::command::FfmpegCommand;
use crate::media::probe::{self, MediaInfo};

/// Keep at most this much of the engine's stderr in an error.
const STDERR_TAIL_BYTES: usize = 4096;

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Read dimensions and duration of the first video stream.
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Execute one invocation; a non-zero exit becomes [`ArchiveError::Engine`].
    async fn run(&self, command: &FfmpegCommand) -> Result<()>;
}

/// Child-process engine backed by the ffmpeg command line tools.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Option<Duration>,
}

impl FfmpegEngine {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_bin.clone(),
            ffprobe: config.ffprobe_bin.clone(),
            timeout: config.engine_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Resolve both binaries, failing early when either is missing.
    pub fn check(&self) -> Result<()> {
        for bin in [&self.ffmpeg, &self.ffprobe] {
            which::which(bin)
                .map_err(|e| ArchiveError::Config(format!("{} not found: {e}", bin.display())))?;
        }
        Ok(())
    }

    async fn output_of(&self, mut cmd: Command) -> Result<std::process::Output> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.output();
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child).await {
                Ok(out) => Ok(out?),
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs(), "Media engine timed out, process killed");
                    Err(ArchiveError::engine(
                        format!("timed out after {}s", limit.as_secs()),
                        None,
                        None,
                    ))
                }
            },
            None => Ok(child.await?),
        }
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args(probe::probe_args(path));

        let output = self.output_of(cmd).await.map_err(|e| ArchiveError::MediaProbe {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(ArchiveError::MediaProbe {
                path: path.to_path_buf(),
                reason: stderr_tail(&output.stderr).unwrap_or_else(|| format!("ffprobe exited with {}", output.status)),
            });
        }
        probe::parse_probe(path, &output.stdout)
    }

    async fn run(&self, command: &FfmpegCommand) -> Result<()> {
        let args = command.build_args();
        debug!(cmd = %format!("{} {}", self.ffmpeg.display(), args.join(" ")), "Running media engine");

        let started = Instant::now();
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(&args);
        let output = self.output_of(cmd).await?;

        if output.status.success() {
            debug!(
                output = ?command.output(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Media engine finished"
            );
            Ok(())
        } else {
            Err(ArchiveError::engine(
                format!("ffmpeg exited with {} writing {}", output.status, command.output().display()),
                stderr_tail(&output.stderr),
                output.status.code(),
            ))
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut start = text.len().saturating_sub(STDERR_TAIL_BYTES);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    Some(text[start..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = format!("{}final error line", "x".repeat(STDERR_TAIL_BYTES * 2));
        let tail = stderr_tail(long.as_bytes()).unwrap();
        assert_eq!(tail.len(), STDERR_TAIL_BYTES);
        assert!(tail.ends_with("final error line"));
        assert_eq!(stderr_tail(b"  \n"), None);
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let engine = FfmpegEngine::new(&MediaConfig {
            ffmpeg_bin: PathBuf::from("/nonexistent/ffmpeg-binary"),
            ..MediaConfig::default()
        });
        let cmd = FfmpegCommand::new("/tmp/never.mp4").input("/tmp/never-in.mp4");
        let err = engine.run(&cmd).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Io(_)));
        assert!(engine.check().is_err());
    }
}
