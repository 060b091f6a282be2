// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Concatenation manifest and chapter document for one archive.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::clip::{ArchiveRun, ClipRecord};
use crate::error::{ArchiveError, Result};

pub const CONCAT_LIST_FILE: &str = "concat_list.txt";
pub const METADATA_FILE: &str = "chapters.ffmeta";

/// One chapter in milliseconds, half-open `[start_ms, end_ms)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterEntry {
    pub start_ms: u64,
    pub end_ms: u64,
    pub title: String,
}

/// Ordered rendered clips and their chapters; `chapters[i]` belongs to `concat_list[i]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    pub concat_list: Vec<PathBuf>,
    pub chapters: Vec<ChapterEntry>,
}

impl Assembly {
    pub fn is_empty(&self) -> bool {
        self.concat_list.is_empty()
    }

    pub fn total_ms(&self) -> u64 {
        self.chapters.last().map(|c| c.end_ms).unwrap_or(0)
    }

    /// Write the concat manifest and the metadata document into `work_dir`.
    /// Returns `(concat_list_file, metadata_file)`.
    pub fn write_files(&self, run: &ArchiveRun, work_dir: &Path) -> Result<(PathBuf, PathBuf)> {
        let list = work_dir.join(CONCAT_LIST_FILE);
        let meta = work_dir.join(METADATA_FILE);
        std::fs::write(&list, render_concat_list(&self.concat_list))?;
        std::fs::write(&meta, render_metadata(run, &self.chapters))?;
        debug!(list = ?list, meta = ?meta, clips = self.concat_list.len(), "Assembly written");
        Ok((list, meta))
    }
}

/// Fold successful records, in order, into the manifest and contiguous chapters.
/// Failed records are skipped without leaving a gap.
pub fn assemble(records: &[ClipRecord]) -> Result<Assembly> {
    let mut assembly = Assembly::default();
    let mut cursor_ms = 0u64;

    for record in records.iter().filter(|r| r.result.is_success()) {
        let (Some(path), Some(duration)) = (&record.result.rendered_path, record.result.actual_duration) else {
            return Err(ArchiveError::MediaProbe {
                path: record.result.rendered_path.clone().unwrap_or_default(),
                reason: format!("clip {} succeeded without a rendered file", record.descriptor.id),
            });
        };
        let length_ms = (duration * 1000.0).round().max(0.0) as u64;
        assembly.concat_list.push(path.clone());
        assembly.chapters.push(ChapterEntry {
            start_ms: cursor_ms,
            end_ms: cursor_ms + length_ms,
            title: record.descriptor.chapter_title(),
        });
        cursor_ms += length_ms;
    }
    Ok(assembly)
}

/// Concat demuxer manifest: one `file '<path>'` line per clip.
pub fn render_concat_list(paths: &[PathBuf]) -> String {
    let mut out = String::new();
    for path in paths {
        let quoted = path.to_string_lossy().replace('\'', r"'\''");
        let _ = writeln!(out, "file '{quoted}'");
    }
    out
}

/// `FFMETADATA1` document with run-level tags and one `[CHAPTER]` per entry.
pub fn render_metadata(run: &ArchiveRun, chapters: &[ChapterEntry]) -> String {
    let mut out = String::from(";FFMETADATA1\n");
    let title = format!("Event archive {} - {}", run.date.format("%Y-%m-%d"), run.camera);
    let _ = writeln!(out, "title={}", escape_metadata(&title));
    if let Some(zone) = &run.zone {
        let _ = writeln!(out, "comment={}", escape_metadata(&format!("Zone: {zone}")));
    }

    for chapter in chapters {
        out.push_str("\n[CHAPTER]\nTIMEBASE=1/1000\n");
        let _ = writeln!(out, "START={}", chapter.start_ms);
        let _ = writeln!(out, "END={}", chapter.end_ms);
        let _ = writeln!(out, "title={}", escape_metadata(&chapter.title));
    }
    out
}

fn escape_metadata(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::{ClipDescriptor, ProcessingResult};
    use chrono::NaiveDate;

    fn record(id: &str, start: f64, duration: Option<f64>) -> ClipRecord {
        let descriptor = ClipDescriptor {
            id: id.into(),
            camera: "frontgate".into(),
            label: "person".into(),
            zone: None,
            score: 0.87,
            start_time: start,
            end_time: start + duration.unwrap_or(1.0),
            bounding_box: None,
        };
        let result = match duration {
            Some(d) => ProcessingResult::succeeded(
                PathBuf::from(format!("/w/clip_{id}.mp4")),
                None,
                PathBuf::from(format!("/w/pip_{id}.mp4")),
                d,
            ),
            None => ProcessingResult::failed("boom"),
        };
        ClipRecord { descriptor, result }
    }

    #[test]
    fn chapters_accumulate_durations() {
        let records = [record("a", 100.0, Some(5.0)), record("b", 200.0, Some(3.0)), record("c", 300.0, Some(4.0))];
        let assembly = assemble(&records).unwrap();
        let bounds: Vec<_> = assembly.chapters.iter().map(|c| (c.start_ms, c.end_ms)).collect();
        assert_eq!(bounds, [(0, 5000), (5000, 8000), (8000, 12000)]);
        assert_eq!(assembly.concat_list.len(), 3);
        assert_eq!(assembly.concat_list[0], PathBuf::from("/w/pip_a.mp4"));
        assert_eq!(assembly.total_ms(), 12000);
        assert!(assembly.chapters[0].title.starts_with("person (87%) - "));
    }

    #[test]
    fn failed_clips_leave_no_gap() {
        let records = [record("a", 1.0, Some(2.5)), record("b", 2.0, None), record("c", 3.0, Some(1.25))];
        let assembly = assemble(&records).unwrap();
        assert_eq!(assembly.concat_list, [PathBuf::from("/w/pip_a.mp4"), PathBuf::from("/w/pip_c.mp4")]);
        assert_eq!(assembly.chapters[0].end_ms, assembly.chapters[1].start_ms);
        assert_eq!(assembly.chapters[1].end_ms, 3750);
    }

    #[test]
    fn empty_input_gives_empty_assembly() {
        let assembly = assemble(&[record("x", 1.0, None)]).unwrap();
        assert!(assembly.is_empty());
        assert_eq!(assembly.total_ms(), 0);
    }

    #[test]
    fn concat_list_quotes_paths() {
        let text = render_concat_list(&[PathBuf::from("/tmp/it's/pip_1.mp4")]);
        assert_eq!(text, "file '/tmp/it'\\''s/pip_1.mp4'\n");
    }

    #[test]
    fn metadata_document() {
        let run = ArchiveRun::new(NaiveDate::from_ymd_opt(2024, 10, 8).unwrap(), "frontgate")
            .with_zone(Some("road".into()));
        let chapters = [ChapterEntry { start_ms: 0, end_ms: 5000, title: "car (90%) - a=b; #1".into() }];
        let doc = render_metadata(&run, &chapters);
        assert!(doc.starts_with(";FFMETADATA1\ntitle=Event archive 2024-10-08 - frontgate\ncomment=Zone: road\n"));
        assert!(doc.contains("[CHAPTER]\nTIMEBASE=1/1000\nSTART=0\nEND=5000\n"));
        assert!(doc.contains(r"title=car (90%) - a\=b\; \#1"));
    }
}
