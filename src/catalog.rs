// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Event catalog client.
//!
//! Talks to the event server's HTTP API:
//!   GET /api/events?after=..&before=..&cameras=..[&zones=..][&labels=..]&has_clip=1
//!   GET /api/events/{id}/clip.mp4                      → raw clip (streamed)
//!   GET /api/events/{id}/{thumbnail|snapshot}.jpg      → overlay still

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate, TimeZone};
use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::clip::{ClipDescriptor, EventRecord};
use crate::config::ServerConfig;
use crate::error::{ArchiveError, Result};

/// Filters for one catalog query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub date: NaiveDate,
    pub camera: String,
    pub zone: Option<String>,
    pub label: Option<String>,
}

/// Half-open `[after, before)` window in epoch seconds covering `date` in local time.
pub fn day_window(date: NaiveDate) -> Result<(i64, i64)> {
    let next = date
        .succ_opt()
        .ok_or_else(|| ArchiveError::InvalidDate(format!("{date} has no following day")))?;
    Ok((local_midnight(date)?, local_midnight(next)?))
}

fn local_midnight(date: NaiveDate) -> Result<i64> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ArchiveError::InvalidDate(date.to_string()))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.timestamp())
        .ok_or_else(|| ArchiveError::InvalidDate(format!("{date} has no local midnight")))
}

/// Clip details as printed by listing mode.
#[derive(Debug, Clone, Serialize)]
pub struct ClipListing {
    pub count: usize,
    pub total: usize,
    pub id: String,
    pub camera: String,
    pub label: String,
    pub zone: Option<String>,
    pub score: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub formatted_datetime: String,
    pub clip_url: String,
    pub snapshot_url: String,
}

/// HTTP client for the event server. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventCatalogClient {
    http: reqwest::Client,
    base_url: String,
    config: ServerConfig,
}

impl EventCatalogClient {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .read_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ArchiveError::Config(format!("Cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config: config.clone(),
        })
    }

    pub fn events_url(&self) -> String {
        format!("{}/api/events", self.base_url)
    }

    pub fn clip_url(&self, clip_id: &str) -> String {
        format!("{}/api/events/{}/clip.mp4", self.base_url, clip_id)
    }

    pub fn thumbnail_url(&self, clip_id: &str) -> String {
        format!(
            "{}/api/events/{}/{}",
            self.base_url,
            clip_id,
            self.config.thumbnail_kind.file_name()
        )
    }

    /// Fetch all clip-bearing events for the query's day, sorted by start time.
    pub async fn fetch_events(&self, query: &EventQuery) -> Result<Vec<ClipDescriptor>> {
        let (after, before) = day_window(query.date)?;
        let url = self.events_url();

        let mut params: Vec<(&str, String)> = vec![
            ("after", after.to_string()),
            ("before", before.to_string()),
            ("cameras", query.camera.clone()),
            ("has_clip", "1".into()),
            ("limit", self.config.event_limit.to_string()),
        ];
        if let Some(zone) = &query.zone {
            params.push(("zones", zone.clone()));
        }
        if let Some(label) = &query.label {
            params.push(("labels", label.clone()));
        }

        let started = Instant::now();
        let remote = |reason: String| ArchiveError::RemoteQuery { url: url.clone(), reason };

        let response = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| remote(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(remote(format!("HTTP {status}")));
        }
        let events: Vec<EventRecord> = response
            .json()
            .await
            .map_err(|e| remote(format!("malformed response: {e}")))?;

        let mut clips: Vec<ClipDescriptor> = events.into_iter().map(ClipDescriptor::from).collect();
        // Stable: equal start times keep catalog order.
        clips.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

        info!(
            date = %query.date,
            camera = query.camera,
            zone = ?query.zone,
            label = ?query.label,
            events = clips.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Event catalog fetched"
        );
        Ok(clips)
    }

    /// Stream the raw clip to `dest`. Returns the number of bytes written.
    pub async fn download_clip(&self, clip_id: &str, dest: &Path) -> Result<u64> {
        let url = self.clip_url(clip_id);
        let transport = |reason: String| ArchiveError::Transport { url: url.clone(), reason };

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(transport(format!("HTTP {status}")));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let data = chunk.map_err(|e| transport(e.to_string()))?;
            file.write_all(&data).await?;
            written += data.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            return Err(transport("empty response body".into()));
        }
        debug!(clip = clip_id, bytes = written, "Clip downloaded");
        Ok(written)
    }

    /// Fetch the overlay still for a clip and write it to `dest`.
    pub async fn download_thumbnail(&self, clip_id: &str, dest: &Path) -> Result<u64> {
        let url = self.thumbnail_url(clip_id);
        let transport = |reason: String| ArchiveError::Transport { url: url.clone(), reason };

        let mut request = self
            .http
            .get(&url)
            .query(&[("quality", self.config.thumbnail_quality.to_string())]);
        if self.config.thumbnail_bbox {
            request = request.query(&[("bbox", "1")]);
        }

        let response = request.send().await.map_err(|e| transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(transport(format!("HTTP {status}")));
        }
        let bytes = response.bytes().await.map_err(|e| transport(e.to_string()))?;
        if bytes.is_empty() {
            return Err(transport("empty response body".into()));
        }
        tokio::fs::write(dest, &bytes).await?;
        debug!(clip = clip_id, bytes = bytes.len(), "Thumbnail downloaded");
        Ok(bytes.len() as u64)
    }

    /// Describe each clip of the catalog without downloading anything.
    pub fn listing(&self, clips: &[ClipDescriptor]) -> Vec<ClipListing> {
        let total = clips.len();
        clips
            .iter()
            .enumerate()
            .map(|(i, clip)| ClipListing {
                count: i + 1,
                total,
                id: clip.id.clone(),
                camera: clip.camera.clone(),
                label: clip.label.clone(),
                zone: clip.zone.clone(),
                score: clip.score,
                start_time: clip.start_time,
                end_time: clip.end_time,
                duration: clip.duration(),
                formatted_datetime: clip.formatted_start(),
                clip_url: self.clip_url(&clip.id),
                snapshot_url: self.thumbnail_url(&clip.id),
            })
            .collect()
    }
}
