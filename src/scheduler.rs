// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Bounded-concurrency batch execution.
//!
//! Clips are processed chunk by chunk. Inside a chunk at most `concurrency`
//! workers run at once; each writes only its own result slot, so completion
//! order never affects the order of the returned records. The failure
//! threshold is evaluated between chunks and once more at the end.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clip::{ClipDescriptor, ClipRecord, ClipStatus, ProcessingResult};
use crate::config::BatchConfig;
use crate::error::{ArchiveError, Result};
use crate::processor::{ClipPosition, ClipWorker};

/// Limits applied to one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub concurrency: usize,
    pub chunk_size: usize,
    /// Abort once strictly more than this many clips failed.
    pub max_failures: usize,
}

impl From<&BatchConfig> for BatchPolicy {
    fn from(cfg: &BatchConfig) -> Self {
        Self {
            concurrency: cfg.concurrency.max(1),
            chunk_size: cfg.chunk_size.max(1),
            max_failures: cfg.max_failures,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

impl BatchSummary {
    fn of(results: &[ProcessingResult]) -> Self {
        Self {
            succeeded: results.iter().filter(|r| r.is_success()).count(),
            failed: results.iter().filter(|r| r.is_failed()).count(),
            total: results.len(),
        }
    }
}

pub struct BatchScheduler<W> {
    worker: Arc<W>,
    policy: BatchPolicy,
    cancel: CancellationToken,
}

impl<W: ClipWorker + 'static> BatchScheduler<W> {
    pub fn new(worker: Arc<W>, policy: BatchPolicy, cancel: CancellationToken) -> Self {
        Self { worker, policy, cancel }
    }

    /// Process every clip, returning records in the input order.
    ///
    /// On interrupt no new clip starts, in-flight clips are awaited, and
    /// [`ArchiveError::Interrupted`] is returned.
    pub async fn run(&self, clips: Vec<ClipDescriptor>, work_dir: &Path) -> Result<(Vec<ClipRecord>, BatchSummary)> {
        let total = clips.len();
        if total == 0 {
            return Ok((Vec::new(), BatchSummary::default()));
        }

        let started = Instant::now();
        let clips: Arc<[ClipDescriptor]> = clips.into();
        let slots = Arc::new(Mutex::new(vec![ProcessingResult::pending(); total]));
        let semaphore = Arc::new(Semaphore::new(self.policy.concurrency));
        let work_dir: PathBuf = work_dir.to_path_buf();

        info!(
            clips = total,
            concurrency = self.policy.concurrency,
            chunk_size = self.policy.chunk_size,
            "Batch started"
        );

        for chunk_start in (0..total).step_by(self.policy.chunk_size) {
            let chunk_end = (chunk_start + self.policy.chunk_size).min(total);
            let mut tasks = JoinSet::new();
            let mut launched = chunk_start;

            for index in chunk_start..chunk_end {
                let permit = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    permit = semaphore.clone().acquire_owned() => permit
                        .map_err(|e| ArchiveError::Config(format!("worker pool closed: {e}")))?,
                };
                if self.cancel.is_cancelled() {
                    break;
                }

                let worker = self.worker.clone();
                let clips = clips.clone();
                let slots = slots.clone();
                let work_dir = work_dir.clone();
                let position = ClipPosition { index: index + 1, total };
                tasks.spawn(async move {
                    let _permit = permit;
                    let mut result = worker.process(&clips[index], position, &work_dir).await;
                    if result.status == ClipStatus::Pending {
                        result = ProcessingResult::failed("worker returned no result");
                    }
                    slots.lock()[index] = result;
                });
                launched = index + 1;
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Clip task did not complete");
                }
            }

            {
                // Started but never reported back (panicked task).
                let mut slots = slots.lock();
                for slot in &mut slots[chunk_start..launched] {
                    if slot.status == ClipStatus::Pending {
                        *slot = ProcessingResult::failed("clip task panicked");
                    }
                }
            }

            if self.cancel.is_cancelled() {
                let done = BatchSummary::of(&slots.lock()[..launched]);
                warn!(
                    succeeded = done.succeeded,
                    failed = done.failed,
                    remaining = total - launched,
                    "Batch interrupted"
                );
                return Err(ArchiveError::Interrupted);
            }

            let so_far = BatchSummary::of(&slots.lock()[..chunk_end]);
            if chunk_end < total && so_far.failed > self.policy.max_failures {
                error!(
                    failed = so_far.failed,
                    processed = chunk_end,
                    total,
                    max_failures = self.policy.max_failures,
                    "Failure threshold exceeded, aborting batch"
                );
                if so_far.succeeded == 0 {
                    return Err(ArchiveError::NoClipsProcessed { total });
                }
                return Err(ArchiveError::TooManyFailures {
                    failed: so_far.failed,
                    total,
                    max_failures: self.policy.max_failures,
                });
            }
            info!(processed = chunk_end, total, failed = so_far.failed, "Chunk finished");
        }

        let results = std::mem::take(&mut *slots.lock());
        let summary = BatchSummary::of(&results);
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );

        if summary.succeeded == 0 {
            return Err(ArchiveError::NoClipsProcessed { total });
        }
        if summary.failed > self.policy.max_failures {
            return Err(ArchiveError::TooManyFailures {
                failed: summary.failed,
                total,
                max_failures: self.policy.max_failures,
            });
        }

        let records = clips
            .iter()
            .cloned()
            .zip(results)
            .map(|(descriptor, result)| ClipRecord { descriptor, result })
            .collect();
        Ok((records, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn clip(i: usize) -> ClipDescriptor {
        ClipDescriptor {
            id: format!("ev{i}"),
            camera: "cam".into(),
            label: "person".into(),
            zone: None,
            score: 0.9,
            start_time: 1000.0 + i as f64,
            end_time: 1001.0 + i as f64,
            bounding_box: None,
        }
    }

    /// Sleeps a per-clip amount, fails the ids in `failing`, tracks concurrency.
    struct ScriptedWorker {
        failing: HashSet<String>,
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl ScriptedWorker {
        fn new(failing: &[usize]) -> Self {
            Self {
                failing: failing.iter().map(|i| format!("ev{i}")).collect(),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ClipWorker for ScriptedWorker {
        async fn process(&self, clip: &ClipDescriptor, position: ClipPosition, work_dir: &Path) -> ProcessingResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            // Later clips finish first.
            tokio::time::sleep(Duration::from_millis(((position.total - position.index) * 7) as u64)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&clip.id) {
                ProcessingResult::failed("scripted failure")
            } else {
                let out = work_dir.join(format!("pip_{}.mp4", clip.id));
                ProcessingResult::succeeded(work_dir.join("raw"), None, out, position.index as f64)
            }
        }
    }

    fn policy(concurrency: usize, chunk_size: usize) -> BatchPolicy {
        BatchPolicy { concurrency, chunk_size, max_failures: 2 }
    }

    #[tokio::test]
    async fn records_keep_input_order_and_bounded_concurrency() {
        let worker = Arc::new(ScriptedWorker::new(&[]));
        let scheduler = BatchScheduler::new(worker.clone(), policy(3, 4), CancellationToken::new());
        let clips: Vec<_> = (0..10).map(clip).collect();

        let (records, summary) = scheduler.run(clips, Path::new("/tmp/w")).await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.descriptor.id.clone()).collect();
        assert_eq!(ids, (0..10).map(|i| format!("ev{i}")).collect::<Vec<_>>());
        assert_eq!(records[4].result.actual_duration, Some(5.0));
        assert_eq!(summary, BatchSummary { succeeded: 10, failed: 0, total: 10 });
        assert!(worker.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn two_failures_are_tolerated() {
        let worker = Arc::new(ScriptedWorker::new(&[1, 7]));
        let scheduler = BatchScheduler::new(worker, policy(4, 25), CancellationToken::new());
        let (records, summary) = scheduler.run((0..10).map(clip).collect(), Path::new("/tmp/w")).await.unwrap();
        assert_eq!(summary.failed, 2);
        assert!(records[1].result.is_failed());
        assert!(records[1].result.rendered_path.is_none());
    }

    #[tokio::test]
    async fn three_failures_abort() {
        let worker = Arc::new(ScriptedWorker::new(&[0, 4, 9]));
        let scheduler = BatchScheduler::new(worker, policy(4, 25), CancellationToken::new());
        let err = scheduler.run((0..10).map(clip).collect(), Path::new("/tmp/w")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::TooManyFailures { failed: 3, total: 10, max_failures: 2 }));
    }

    #[tokio::test]
    async fn threshold_stops_before_the_next_chunk() {
        let worker = Arc::new(ScriptedWorker::new(&[0, 1, 2]));
        let scheduler = BatchScheduler::new(worker.clone(), policy(2, 4), CancellationToken::new());
        let err = scheduler.run((0..12).map(clip).collect(), Path::new("/tmp/w")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::TooManyFailures { failed: 3, total: 12, .. }));
        assert_eq!(worker.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn all_failed_first_chunk_reports_no_clips() {
        let worker = Arc::new(ScriptedWorker::new(&(0..30).collect::<Vec<_>>()));
        let scheduler = BatchScheduler::new(worker.clone(), policy(4, 25), CancellationToken::new());
        let err = scheduler.run((0..30).map(clip).collect(), Path::new("/tmp/w")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::NoClipsProcessed { total: 30 }));
        assert_eq!(worker.calls.load(Ordering::SeqCst), 25);
    }

    #[tokio::test]
    async fn all_failed_reports_no_clips() {
        let worker = Arc::new(ScriptedWorker::new(&[0, 1]));
        let scheduler = BatchScheduler::new(worker, policy(2, 25), CancellationToken::new());
        let err = scheduler.run((0..2).map(clip).collect(), Path::new("/tmp/w")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::NoClipsProcessed { total: 2 }));
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let worker = Arc::new(ScriptedWorker::new(&[]));
        let token = CancellationToken::new();
        token.cancel();
        let scheduler = BatchScheduler::new(worker.clone(), policy(2, 25), token);
        let err = scheduler.run((0..5).map(clip).collect(), Path::new("/tmp/w")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Interrupted));
        assert_eq!(worker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let worker = Arc::new(ScriptedWorker::new(&[]));
        let scheduler = BatchScheduler::new(worker, policy(2, 25), CancellationToken::new());
        let (records, summary) = scheduler.run(Vec::new(), Path::new("/tmp/w")).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(summary.total, 0);
    }
}
