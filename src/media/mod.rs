// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Media subsystem: ffmpeg command building, probing, PiP filter graphs and the engine boundary.

pub mod command;
pub mod engine;
pub mod filters;
pub mod probe;

pub use command::FfmpegCommand;
pub use engine::{FfmpegEngine, MediaEngine};
pub use probe::MediaInfo;
