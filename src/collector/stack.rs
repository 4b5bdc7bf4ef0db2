//! Call-stack capture for log entries
//!
//! Capture is abstracted behind [`StackCapture`] so tests and embedders can
//! swap in a deterministic or no-op implementation. The default
//! [`BacktraceCapture`] renders a `std::backtrace::Backtrace` and parses the
//! text form, so it only yields frames when debug info is available.

use crate::metadata::StackFrame;
use std::backtrace::Backtrace;

/// Frames kept per log entry
pub const MAX_STACK_FRAMES: usize = 12;

pub trait StackCapture: Send + Sync {
    /// Capture up to `max_frames` frames, innermost caller first
    fn capture(&self, max_frames: usize) -> Vec<StackFrame>;
}

/// Captures the current thread's stack, skipping the capture machinery and
/// this crate's recording frames
#[derive(Debug, Default, Clone, Copy)]
pub struct BacktraceCapture;

impl StackCapture for BacktraceCapture {
    fn capture(&self, max_frames: usize) -> Vec<StackFrame> {
        let rendered = Backtrace::force_capture().to_string();
        parse_backtrace(&rendered)
            .into_iter()
            .skip_while(|frame| is_recording_frame(&frame.call))
            .take(max_frames)
            .collect()
    }
}

/// Parse the `Display` form of a backtrace into frames
///
/// Symbols without a source location are dropped.
pub fn parse_backtrace(rendered: &str) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    let mut current: Option<String> = None;

    for line in rendered.lines() {
        let line = line.trim();
        if line.is_empty() || line.ends_with("backtrace:") {
            continue;
        }

        if let Some(location) = line.strip_prefix("at ") {
            let Some(call) = current.take() else {
                continue;
            };
            if let Some((file, line_no)) = split_location(location) {
                frames.push(StackFrame {
                    call,
                    is_vendor: is_vendor_path(&file),
                    file,
                    line: line_no,
                });
            }
            continue;
        }

        // "12: symbol" starts a frame, a bare symbol is an inlined frame
        let symbol = match line.split_once(": ") {
            Some((index, rest)) if index.chars().all(|c| c.is_ascii_digit()) => rest,
            _ => line,
        };
        current = Some(symbol.to_string());
    }

    frames
}

/// Split `path:line:column` (column optional) into path and line
fn split_location(location: &str) -> Option<(String, u32)> {
    let mut parts = location.rsplitn(3, ':');
    let last = parts.next()?;
    let middle = parts.next()?;

    match (parts.next(), middle.parse::<u32>(), last.parse::<u32>()) {
        (Some(path), Ok(line), Ok(_column)) => Some((path.to_string(), line)),
        (None, _, Ok(line)) => Some((middle.to_string(), line)),
        (Some(path), Err(_), Ok(line)) => Some((format!("{}:{}", path, middle), line)),
        _ => None,
    }
}

/// Third-party and toolchain sources
pub fn is_vendor_path(path: &str) -> bool {
    path.contains("/.cargo/registry/")
        || path.contains("/.cargo/git/")
        || path.contains("/vendor/")
        || path.starts_with("/rustc/")
}

fn is_recording_frame(call: &str) -> bool {
    let call = call.trim_start_matches('<');
    call.starts_with("std::backtrace")
        || call.starts_with("std::sys")
        || call.starts_with("reqscope::collector")
        || call.starts_with("reqscope::registry")
        || call.starts_with("reqscope::layer")
        || call.starts_with("core::ops::function")
}
