// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Declarative engine invocation: inputs, filter graph, codec parameters, output.

use std::path::{Path, PathBuf};

/// One engine input with the options that precede its `-i`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInput {
    pub path: PathBuf,
    pub args: Vec<String>,
}

/// Builder for one ffmpeg invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegCommand {
    inputs: Vec<EngineInput>,
    output: PathBuf,
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with(std::iter::empty::<String>(), path)
    }

    /// Add an input preceded by its own options (e.g. `-f concat -safe 0`).
    pub fn input_with<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(EngineInput {
            path: path.as_ref().to_path_buf(),
            args: args.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn filter_complex(self, graph: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(graph)
    }

    pub fn map(self, stream: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(stream)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Copy every mapped stream without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    pub fn frame_rate(self, fps: u32) -> Self {
        self.output_arg("-r").output_arg(fps.to_string())
    }

    /// Force the output container instead of guessing it from the file name.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn inputs(&self) -> &[EngineInput] {
        &self.inputs
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// The `-filter_complex` graph, if one was set.
    pub fn graph(&self) -> Option<&str> {
        self.output_args
            .iter()
            .position(|a| a == "-filter_complex")
            .and_then(|i| self.output_args.get(i + 1))
            .map(String::as_str)
    }

    /// Build the full argument vector (without the program name).
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-nostdin".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}
