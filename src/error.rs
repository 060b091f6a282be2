// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Event query to {url} failed: {reason}")]
    RemoteQuery { url: String, reason: String },

    #[error("Download of {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Cannot probe {path:?}: {reason}")]
    MediaProbe { path: PathBuf, reason: String },

    #[error("Media engine failed: {message}{}", stderr_suffix(.stderr))]
    Engine {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Too many clips failed ({failed}/{total}, limit {max_failures})")]
    TooManyFailures {
        failed: usize,
        total: usize,
        max_failures: usize,
    },

    #[error("None of the {total} clips could be processed")]
    NoClipsProcessed { total: usize },

    #[error("Run interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub fn engine(message: impl Into<String>, stderr: Option<String>, exit_code: Option<i32>) -> Self {
        Self::Engine {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Stable code reported for a failed run.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::InvalidDate(_) => "invalid_date",
            Self::RemoteQuery { .. } => "remote_query",
            Self::Transport { .. } => "transport",
            Self::MediaProbe { .. } => "media_probe",
            Self::Engine { .. } => "engine",
            Self::TooManyFailures { .. } => "too_many_failures",
            Self::NoClipsProcessed { .. } => "no_clips_processed",
            Self::Interrupted => "interrupted",
            Self::Io(_) => "io",
        }
    }

    /// Errors a single clip can hit without taking the run down with it.
    pub fn is_clip_level(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::MediaProbe { .. } | Self::Engine { .. } | Self::Io(_)
        )
    }
}

fn stderr_suffix(stderr: &Option<String>) -> String {
    match stderr.as_deref().map(str::trim) {
        Some(tail) if !tail.is_empty() => format!(": {tail}"),
        _ => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
