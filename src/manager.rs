// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Archive manager: runs one (date, camera, zone?, label?) archive end to end,
//! or a range of days one after another.
//!
//! Catalog → batch of clip workers → assembly → finalize. The run's work
//! directory is owned by [`archive`](ArchiveManager::archive) and closed on
//! every exit path; interrupts arrive through the shared cancellation token.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::assembler;
use crate::catalog::{ClipListing, EventCatalogClient, EventQuery};
use crate::clip::{ArchiveRun, ClipDescriptor};
use crate::config::Config;
use crate::error::{ArchiveError, Result};
use crate::finalizer::{ArchiveFinalizer, FinalizeOutcome};
use crate::lifecycle::WorkDir;
use crate::media::MediaEngine;
use crate::processor::ClipProcessor;
use crate::scheduler::{BatchPolicy, BatchScheduler};

/// State of one archive run while it executes.
#[derive(Debug)]
pub struct RunContext {
    pub run: ArchiveRun,
    pub output: PathBuf,
    started: Instant,
}

impl RunContext {
    fn new(run: ArchiveRun, output: PathBuf) -> Self {
        Self { run, output, started: Instant::now() }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn query(&self) -> EventQuery {
        EventQuery {
            date: self.run.date,
            camera: self.run.camera.clone(),
            zone: self.run.zone.clone(),
            label: self.run.label.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Archived {
        output: PathBuf,
        succeeded: usize,
        failed: usize,
        chapters: usize,
    },
    /// Output already existed.
    Skipped { output: PathBuf },
    /// The catalog had no clips for the day; no file is written.
    NoEvents,
}

/// Per-day results of a date-range invocation.
#[derive(Debug, Default)]
pub struct RangeSummary {
    pub archived: Vec<NaiveDate>,
    pub skipped: Vec<NaiveDate>,
    pub empty: Vec<NaiveDate>,
    pub failed: Vec<(NaiveDate, ArchiveError)>,
}

impl RangeSummary {
    pub fn days(&self) -> usize {
        self.archived.len() + self.skipped.len() + self.empty.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ArchiveManager {
    config: Config,
    client: EventCatalogClient,
    engine: Arc<dyn MediaEngine>,
    cancel: CancellationToken,
}

impl ArchiveManager {
    /// Create the manager from a validated [`Config`].
    pub fn new(config: Config, engine: Arc<dyn MediaEngine>, cancel: CancellationToken) -> Result<Self> {
        config.validate()?;
        let client = EventCatalogClient::new(&config.server)?;
        Ok(Self { config, client, engine, cancel })
    }

    pub fn client(&self) -> &EventCatalogClient {
        &self.client
    }

    pub fn output_path(&self, run: &ArchiveRun) -> PathBuf {
        run.output_path(&self.config.output.dir, self.config.output.format)
    }

    /// Archive one day. Returns without any network call when the output exists.
    pub async fn archive(&self, run: &ArchiveRun) -> Result<RunOutcome> {
        let ctx = RunContext::new(run.clone(), self.output_path(run));

        if ctx.output.exists() {
            info!(output = ?ctx.output, "Archive already exists, skipping");
            return Ok(RunOutcome::Skipped { output: ctx.output });
        }
        if self.cancel.is_cancelled() {
            return Err(ArchiveError::Interrupted);
        }

        info!(
            date = %ctx.run.date,
            camera = ctx.run.camera,
            zone = ?ctx.run.zone,
            label = ?ctx.run.label,
            output = ?ctx.output,
            "Archive run started"
        );

        let query = ctx.query();
        let clips = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ArchiveError::Interrupted),
            clips = self.client.fetch_events(&query) => clips?,
        };
        if clips.is_empty() {
            info!(date = %ctx.run.date, camera = ctx.run.camera, "No events with clips, nothing to archive");
            return Ok(RunOutcome::NoEvents);
        }

        let work = WorkDir::acquire(self.config.output.work_root.as_deref(), &ctx.run.file_stem())?;
        let outcome = self.execute(&ctx, clips, &work).await;
        let work_path = work.path().to_path_buf();
        if let Err(e) = work.close() {
            warn!(path = ?work_path, error = %e, "Cannot remove work directory");
        }

        match &outcome {
            Ok(RunOutcome::Archived { succeeded, failed, chapters, .. }) => info!(
                output = ?ctx.output,
                succeeded,
                failed,
                chapters,
                elapsed_ms = ctx.elapsed_ms(),
                "Archive run finished"
            ),
            Ok(_) => {}
            Err(e) => error!(
                date = %ctx.run.date,
                camera = ctx.run.camera,
                reason = e.reason_code(),
                error = %e,
                elapsed_ms = ctx.elapsed_ms(),
                "Archive run failed"
            ),
        }
        outcome
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        clips: Vec<ClipDescriptor>,
        work: &WorkDir,
    ) -> Result<RunOutcome> {
        let worker = Arc::new(ClipProcessor::new(
            self.client.clone(),
            self.engine.clone(),
            self.config.media.clone(),
            self.config.output.format,
        ));
        let scheduler = BatchScheduler::new(worker, BatchPolicy::from(&self.config.batch), self.cancel.clone());
        let (records, summary) = scheduler.run(clips, work.path()).await?;

        let assembly = assembler::assemble(&records)?;
        let (list, meta) = assembly.write_files(&ctx.run, work.path())?;

        let finalizer = ArchiveFinalizer::new(self.engine.clone(), self.config.output.format);
        let finalized = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ArchiveError::Interrupted),
            done = finalizer.finalize(&list, &meta, &ctx.output, work.path()) => done?,
        };

        Ok(match finalized {
            FinalizeOutcome::Skipped(output) => RunOutcome::Skipped { output },
            FinalizeOutcome::Written(output) => RunOutcome::Archived {
                output,
                succeeded: summary.succeeded,
                failed: summary.failed,
                chapters: assembly.chapters.len(),
            },
        })
    }

    /// Archive every day of `start..=end`. A failed day does not stop the
    /// range; an interrupt does.
    pub async fn archive_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        camera: &str,
        zone: Option<String>,
        label: Option<String>,
    ) -> Result<RangeSummary> {
        let mut summary = RangeSummary::default();
        for date in start.iter_days().take_while(|d| *d <= end) {
            let run = ArchiveRun::new(date, camera)
                .with_zone(zone.clone())
                .with_label(label.clone());
            match self.archive(&run).await {
                Ok(RunOutcome::Archived { .. }) => summary.archived.push(date),
                Ok(RunOutcome::Skipped { .. }) => summary.skipped.push(date),
                Ok(RunOutcome::NoEvents) => summary.empty.push(date),
                Err(ArchiveError::Interrupted) => return Err(ArchiveError::Interrupted),
                Err(e) => {
                    warn!(date = %date, reason = e.reason_code(), "Day failed, continuing with the range");
                    summary.failed.push((date, e));
                }
            }
        }
        info!(
            days = summary.days(),
            archived = summary.archived.len(),
            skipped = summary.skipped.len(),
            empty = summary.empty.len(),
            failed = summary.failed.len(),
            "Date range finished"
        );
        Ok(summary)
    }

    /// Describe the day's clips without downloading them.
    pub async fn list(&self, run: &ArchiveRun) -> Result<Vec<ClipListing>> {
        let query = RunContext::new(run.clone(), self.output_path(run)).query();
        let clips = self.client.fetch_events(&query).await?;
        Ok(self.client.listing(&clips))
    }
}

/// `clips_{date}_{camera}[_{zone}][_{label}].jsonl`
pub fn listing_file_name(run: &ArchiveRun) -> String {
    let mut parts = vec![
        "clips".to_string(),
        run.date.format("%Y-%m-%d").to_string(),
        run.camera.clone(),
    ];
    parts.extend(run.zone.iter().cloned());
    parts.extend(run.label.iter().cloned());
    format!("{}.jsonl", parts.join("_"))
}

/// Write one JSON object per line into `dir`. Returns the file path.
pub fn write_listing(dir: &Path, run: &ArchiveRun, listings: &[ClipListing]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(listing_file_name(run));
    let mut body = String::new();
    for listing in listings {
        let line = serde_json::to_string(listing)
            .map_err(|e| ArchiveError::Config(format!("Cannot serialize listing: {e}")))?;
        body.push_str(&line);
        body.push('\n');
    }
    std::fs::write(&path, body)?;
    Ok(path)
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| ArchiveError::InvalidDate(format!("'{s}': {e}")))
}

/// `YYYY-MM-DD:YYYY-MM-DD`, inclusive, start not after end.
pub fn parse_date_range(s: &str) -> Result<(NaiveDate, NaiveDate)> {
    let (start, end) = s
        .split_once(':')
        .ok_or_else(|| ArchiveError::InvalidDate(format!("'{s}': expected START:END")))?;
    let (start, end) = (parse_date(start)?, parse_date(end)?);
    if start > end {
        return Err(ArchiveError::InvalidDate(format!("range starts after it ends: {s}")));
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, d).unwrap()
    }

    #[test]
    fn parses_ranges() {
        assert_eq!(parse_date_range("2024-10-01:2024-10-03").unwrap(), (day(1), day(3)));
        assert_eq!(parse_date_range("2024-10-05:2024-10-05").unwrap(), (day(5), day(5)));
        assert!(matches!(parse_date_range("2024-10-05:2024-10-01"), Err(ArchiveError::InvalidDate(_))));
        assert!(matches!(parse_date_range("2024-10-05"), Err(ArchiveError::InvalidDate(_))));
        assert!(matches!(parse_date("2024-13-01"), Err(ArchiveError::InvalidDate(_))));
    }

    #[test]
    fn listing_file_names() {
        let run = ArchiveRun::new(day(8), "frontgate");
        assert_eq!(listing_file_name(&run), "clips_2024-10-08_frontgate.jsonl");
        let run = run.with_zone(Some("road".into())).with_label(Some("car".into()));
        assert_eq!(listing_file_name(&run), "clips_2024-10-08_frontgate_road_car.jsonl");
    }
}
