//! Media upload model definitions

use std::fmt;
use std::path::Path;
use std::time::Duration;

use log::debug;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::constants::MIN_POLL_INTERVAL;

/// Opaque media identifier assigned by the upload service.
///
/// The raw value is never handed out as a plain string. Request builders pick
/// either [`MediaId::in_path`] or [`MediaId::in_body`] depending on where the
/// protocol phase expects the identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(String);

impl MediaId {
    /// Returns `None` for blank identifiers. Anything else is kept verbatim.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Identifier placed in a URL path segment.
    pub fn in_path(&self) -> MediaPath<'_> {
        MediaPath(&self.0)
    }

    /// Identifier placed in a JSON field, form field or query parameter.
    pub fn in_body(&self) -> MediaField<'_> {
        MediaField(&self.0)
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Media id destined for a URL path. Only URL builders accept it.
#[derive(Debug, Clone, Copy)]
pub struct MediaPath<'a>(&'a str);

impl MediaPath<'_> {
    /// Percent-encoded segment, safe to splice between `/`.
    pub fn segment(&self) -> String {
        utf8_percent_encode(self.0, NON_ALPHANUMERIC).to_string()
    }
}

/// Media id destined for a body field or query parameter.
#[derive(Debug, Clone, Copy)]
pub struct MediaField<'a>(&'a str);

impl MediaField<'_> {
    pub fn value(&self) -> &str {
        self.0
    }
}

/// Server-side media category classifier sent on initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaCategory {
    TweetVideo,
    TweetGif,
    TweetImage,
}

impl MediaCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaCategory::TweetVideo => "tweet_video",
            MediaCategory::TweetGif => "tweet_gif",
            MediaCategory::TweetImage => "tweet_image",
        }
    }

    pub fn for_media_type(media_type: &str) -> Self {
        if media_type.starts_with("video/") {
            MediaCategory::TweetVideo
        } else if media_type == "image/gif" {
            MediaCategory::TweetGif
        } else {
            MediaCategory::TweetImage
        }
    }
}

/// MIME type for a local media file, keyed on its extension.
///
/// QuickTime is declared as mp4; the v2 endpoint rejects `video/quicktime`.
pub fn media_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "gif" => "image/gif",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "video/mp4",
    }
}

/// Lifecycle of one chunked upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Initialized,
    Appending,
    Finalized,
    Processing,
    Ready,
    Failed,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Ready | UploadState::Failed)
    }
}

/// Book-keeping for one file between initialize and a terminal state.
#[derive(Debug, Clone)]
pub struct MediaUploadSession {
    media_id: MediaId,
    total_bytes: u64,
    bytes_sent: u64,
    next_segment: u32,
    state: UploadState,
}

impl MediaUploadSession {
    pub fn new(media_id: MediaId, total_bytes: u64) -> Self {
        Self {
            media_id,
            total_bytes,
            bytes_sent: 0,
            next_segment: 0,
            state: UploadState::Initialized,
        }
    }

    pub fn media_id(&self) -> &MediaId {
        &self.media_id
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Index the next APPEND must carry.
    pub fn next_segment(&self) -> u32 {
        self.next_segment
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Records one acknowledged chunk and advances the segment index.
    pub fn record_chunk(&mut self, len: usize) {
        self.state = UploadState::Appending;
        self.bytes_sent += len as u64;
        self.next_segment += 1;
    }

    /// Moves a finalized session to its processing-derived state.
    pub fn resolve_processing(&mut self, processing: Option<&ProcessingInfo>) {
        self.state = match processing.map(|p| p.state) {
            None | Some(ProcessingState::Succeeded) => UploadState::Ready,
            Some(ProcessingState::Failed) => UploadState::Failed,
            Some(ProcessingState::Pending | ProcessingState::InProgress) => {
                UploadState::Processing
            }
        };
        debug!(
            "[upload] session {} finalized after {} segments, state {:?}",
            self.media_id, self.next_segment, self.state
        );
    }

    pub fn fail(&mut self) {
        self.state = UploadState::Failed;
    }

    /// FINALIZE acknowledged with a 2xx.
    pub fn mark_finalized(&mut self) {
        self.state = UploadState::Finalized;
    }
}

/// Server-side transcoding state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl ProcessingState {
    /// Maps the wire value. `queued` is the v1.1 spelling of pending; anything
    /// unrecognised is treated as still in progress.
    pub fn from_wire(state: &str) -> Self {
        match state {
            "pending" | "queued" => ProcessingState::Pending,
            "in_progress" => ProcessingState::InProgress,
            "succeeded" => ProcessingState::Succeeded,
            "failed" => ProcessingState::Failed,
            other => {
                debug!("unknown processing state {other:?}, treating as in_progress");
                ProcessingState::InProgress
            }
        }
    }
}

/// Processing report embedded in finalize and status responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingInfo {
    pub state: ProcessingState,
    pub check_after_secs: u32,
    pub progress_percent: Option<u8>,
    pub error: Option<String>,
}

impl ProcessingInfo {
    pub fn new(state: ProcessingState, check_after_secs: u32) -> Self {
        Self {
            state,
            check_after_secs,
            progress_percent: None,
            error: None,
        }
    }

    /// Wait before the next poll, never shorter than [`MIN_POLL_INTERVAL`].
    pub fn poll_delay(&self) -> Duration {
        Duration::from_secs(u64::from(self.check_after_secs)).max(MIN_POLL_INTERVAL)
    }
}

/// Result of a completed chunked upload.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub media_id: MediaId,
    pub total_bytes: u64,
    pub bytes_sent: u64,
    pub segments: u32,
    pub processing: Option<ProcessingInfo>,
}
