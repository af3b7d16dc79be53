//! Progress reporting for long-running shares.

use std::fmt;

use log::info;
use serde::Serialize;
use tokio::sync::mpsc;

/// One progress update. `part` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Rendering {
        part: usize,
        total: usize,
    },
    Uploading {
        part: usize,
        total: usize,
    },
    Chunk {
        part: usize,
        total: usize,
        segment: u32,
        bytes_sent: u64,
        total_bytes: u64,
        percent: u8,
    },
    Processing {
        part: usize,
        total: usize,
        progress_percent: Option<u8>,
    },
    Posting {
        part: usize,
        total: usize,
    },
    Posted {
        part: usize,
        total: usize,
        post_id: String,
    },
}

impl ProgressEvent {
    /// Phase transitions, as opposed to per-chunk ticks.
    pub fn is_milestone(&self) -> bool {
        !matches!(self, ProgressEvent::Chunk { .. })
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Rendering { part, total } => {
                write!(f, "Rendering video {part}/{total}...")
            }
            ProgressEvent::Uploading { part, total } => {
                write!(f, "Uploading video {part}/{total}...")
            }
            ProgressEvent::Chunk {
                part,
                total,
                percent,
                ..
            } => write!(f, "Uploading video {part}/{total}... {percent}%"),
            ProgressEvent::Processing {
                part,
                total,
                progress_percent,
            } => match progress_percent {
                Some(pct) => write!(f, "Processing video {part}/{total}... {pct}%"),
                None => write!(f, "Processing video {part}/{total}..."),
            },
            ProgressEvent::Posting { part, total } => write!(f, "Posting tweet {part}/{total}..."),
            ProgressEvent::Posted { part, total, .. } => {
                write!(f, "Posted {part}/{total} successfully")
            }
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// A full or closed channel drops the update rather than stalling the upload.
impl ProgressSink for mpsc::Sender<ProgressEvent> {
    fn report(&self, event: ProgressEvent) {
        let _ = self.try_send(event);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards events to a sink and keeps the milestone lines.
pub(crate) struct Trail<'a> {
    sink: &'a dyn ProgressSink,
    lines: Vec<String>,
}

impl<'a> Trail<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            lines: Vec::new(),
        }
    }

    pub(crate) fn emit(&mut self, event: ProgressEvent) {
        if event.is_milestone() {
            let line = event.to_string();
            info!("[publish] {line}");
            self.lines.push(line);
        }
        self.sink.report(event);
    }

    pub(crate) fn sink(&self) -> &'a dyn ProgressSink {
        self.sink
    }

    pub(crate) fn into_lines(self) -> Vec<String> {
        self.lines
    }
}
