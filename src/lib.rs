// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

pub mod assembler;
pub mod catalog;
pub mod clip;
pub mod config;
pub mod error;
pub mod finalizer;
pub mod lifecycle;
pub mod manager;
pub mod media;
pub mod processor;
pub mod scheduler;
