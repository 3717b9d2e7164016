use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::TimeWindow;
use crate::media::{timestamp, MediaSummary, TimeSpan};
use crate::steps;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("no chunk summaries to consolidate")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_length_secs")]
    pub chunk_length_secs: u64,
    #[serde(default = "default_min_tail_secs")]
    pub min_tail_secs: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_length_secs: default_chunk_length_secs(),
            min_tail_secs: default_min_tail_secs(),
        }
    }
}

fn default_chunk_length_secs() -> u64 {
    300
}

fn default_min_tail_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkWindow {
    pub index: usize,
    pub start_secs: u64,
    pub end_secs: u64,
}

impl ChunkWindow {
    pub fn len_secs(&self) -> u64 {
        self.end_secs - self.start_secs
    }

    pub fn time_window(&self) -> TimeWindow {
        TimeWindow::new(self.start_secs, self.end_secs)
    }

    pub fn step_id(&self) -> String {
        steps::content_summary_chunk(self.start_secs, self.end_secs)
    }
}

pub fn should_chunk(total_secs: u64, chunk_length_secs: u64, min_tail_secs: u64) -> bool {
    chunk_length_secs > 0
        && total_secs > chunk_length_secs
        && total_secs - chunk_length_secs > min_tail_secs
}

/// Contiguous windows covering `[0, total_secs)`.
///
/// Every window is `chunk_length_secs` long except the last, which absorbs a
/// remainder of at most `min_tail_secs`. Content too short to chunk yields a
/// single window.
pub fn plan(total_secs: u64, chunk_length_secs: u64, min_tail_secs: u64) -> Vec<ChunkWindow> {
    if total_secs == 0 {
        return Vec::new();
    }
    if !should_chunk(total_secs, chunk_length_secs, min_tail_secs) {
        return vec![ChunkWindow {
            index: 0,
            start_secs: 0,
            end_secs: total_secs,
        }];
    }

    let mut count = total_secs / chunk_length_secs;
    if total_secs % chunk_length_secs > min_tail_secs {
        count += 1;
    }
    let mut windows = Vec::with_capacity(count as usize);
    for index in 0..count {
        let start_secs = index * chunk_length_secs;
        let mut end_secs = (index + 1) * chunk_length_secs;
        if end_secs > total_secs || total_secs - end_secs <= min_tail_secs {
            end_secs = total_secs;
        }
        windows.push(ChunkWindow {
            index: index as usize,
            start_secs,
            end_secs,
        });
        if end_secs == total_secs {
            break;
        }
    }
    windows
}

/// What a content summary run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryScope {
    Whole {
        duration_secs: u64,
        content_type: String,
    },
    Chunk {
        duration_secs: u64,
        content_type: String,
        window: ChunkWindow,
    },
}

impl SummaryScope {
    pub fn step_id(&self) -> String {
        match self {
            SummaryScope::Whole { .. } => steps::CONTENT_SUMMARY.to_string(),
            SummaryScope::Chunk { window, .. } => window.step_id(),
        }
    }

    /// Seconds the generated segments must span.
    pub fn length_secs(&self) -> u64 {
        match self {
            SummaryScope::Whole { duration_secs, .. } => *duration_secs,
            SummaryScope::Chunk { window, .. } => window.len_secs(),
        }
    }

    pub fn duration_secs(&self) -> u64 {
        match self {
            SummaryScope::Whole { duration_secs, .. }
            | SummaryScope::Chunk { duration_secs, .. } => *duration_secs,
        }
    }

    pub fn start_secs(&self) -> u64 {
        match self {
            SummaryScope::Whole { .. } => 0,
            SummaryScope::Chunk { window, .. } => window.start_secs,
        }
    }

    pub fn end_secs(&self) -> u64 {
        match self {
            SummaryScope::Whole { duration_secs, .. } => *duration_secs,
            SummaryScope::Chunk { window, .. } => window.end_secs,
        }
    }

    pub fn content_type(&self) -> &str {
        match self {
            SummaryScope::Whole { content_type, .. } | SummaryScope::Chunk { content_type, .. } => {
                content_type
            }
        }
    }

    pub fn is_chunk(&self) -> bool {
        matches!(self, SummaryScope::Chunk { .. })
    }

    /// Clip window for the content cache; whole-media scopes use an unclipped cache.
    pub fn cache_window(&self) -> Option<TimeWindow> {
        match self {
            SummaryScope::Whole { .. } => None,
            SummaryScope::Chunk { window, .. } => Some(window.time_window()),
        }
    }
}

/// Spans are re-based onto the whole media; unparseable ones are dropped.
pub fn consolidate(
    parts: Vec<(ChunkWindow, MediaSummary)>,
    total_secs: u64,
) -> Result<MediaSummary, ChunkError> {
    let mut parts = parts.into_iter();
    let Some((first_window, first)) = parts.next() else {
        return Err(ChunkError::Empty);
    };

    let mut merged = MediaSummary {
        segment_timestamps: Vec::new(),
        cast: Vec::new(),
        length_in_seconds: total_secs,
        ..first.clone()
    };
    for (window, summary) in std::iter::once((first_window, first)).chain(parts) {
        for span in summary.segment_timestamps {
            let (Some(start), Some(end)) = (
                timestamp::rebase(&span.start, window.start_secs),
                timestamp::rebase(&span.end, window.start_secs),
            ) else {
                continue;
            };
            merged.segment_timestamps.push(TimeSpan { start, end });
        }
        merged.cast.extend(summary.cast);
    }
    Ok(merged)
}
