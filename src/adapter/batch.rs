//! Line-integrity protocol for engines that batch and rewrap text.
//!
//! Web engines accept a bounded amount of text per request and are free to
//! reflow it. To keep `target_text` aligned with `source_text` line by line,
//! every source line is followed by a sentinel line before sending. The
//! reply is cut back into segments at the sentinels; each segment becomes
//! exactly one target line. A reply that does not echo one sentinel per
//! line is rejected instead of being stitched together misaligned.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use crate::adapter::AdapterError;

pub const SENTINEL: &str = "[[MTLAND_SPLITTER]]";

fn sentinel_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\[\s*\[\s*MTLAND_SPLITTER\s*\]\s*\]").expect("sentinel pattern is valid")
    })
}

/// Split `lines` into consecutive batches, greedily and in order.
///
/// A batch holds at most `max_lines` lines, and its interleaved request text
/// (see [`interleave`]) is at most `max_chars` characters long. A single line
/// whose interleaved cost exceeds `max_chars` gets a batch of its own.
pub fn plan_batches(lines: &[&str], max_lines: usize, max_chars: usize) -> Vec<Range<usize>> {
    let max_lines = max_lines.max(1);
    let mut batches = Vec::new();
    let mut start = 0;
    let mut chars = 0;

    for (i, line) in lines.iter().enumerate() {
        let cost = interleaved_cost(line);
        let count = i - start;
        if count > 0 && (count >= max_lines || chars + cost > max_chars) {
            batches.push(start..i);
            start = i;
            chars = 0;
        }
        chars += cost;
    }
    if start < lines.len() {
        batches.push(start..lines.len());
    }
    batches
}

/// Characters a line adds to the request text: the trimmed line, its
/// sentinel line and the two separating newlines.
fn interleaved_cost(line: &str) -> usize {
    line.trim().chars().count() + 1 + SENTINEL.len() + 1
}

/// Build the request text for one batch: each trimmed line followed by a
/// sentinel line. `offset` is the index of the batch's first line in the
/// whole text and only feeds error reporting.
pub fn interleave(batch: &[&str], offset: usize) -> Result<String, AdapterError> {
    let mut text = String::new();
    for (i, line) in batch.iter().enumerate() {
        if sentinel_pattern().is_match(line) {
            return Err(AdapterError::SentinelInSource { line: offset + i });
        }
        if i > 0 {
            text.push('\n');
        }
        text.push_str(line.trim());
        text.push('\n');
        text.push_str(SENTINEL);
    }
    Ok(text)
}

/// Cut an engine reply back into `expected` lines.
///
/// Sentinels may appear with stray whitespace, in a different case or glued
/// to neighbouring text. Within a segment, wrapped sub-lines are trimmed and
/// joined with a single space; empty sub-lines are dropped.
pub fn reconstruct(response: &str, expected: usize) -> Result<Vec<String>, AdapterError> {
    let mut segments: Vec<&str> = sentinel_pattern().split(response).collect();
    // split always yields one more piece than there are separators
    let remainder = segments.pop().unwrap_or_default();

    let actual = if remainder.trim().is_empty() {
        segments.len()
    } else {
        segments.len() + 1
    };
    if actual != expected {
        return Err(AdapterError::LineMismatch { expected, actual });
    }

    Ok(segments
        .into_iter()
        .map(|segment| {
            segment
                .split('\n')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect())
}
