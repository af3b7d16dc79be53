//! Error taxonomy for the upload and publish pipeline
//!
//! Every variant that comes from a remote response keeps the raw body, since
//! the API's error bodies are the only diagnostic signal available.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{MediaId, ThreadPost};

/// Failure below the HTTP status line: connect, timeout, body read.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Failure of a plain API read such as the account lookup.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("unreadable response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Which of the three upload exchanges (or the status probe) was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Initialize,
    Append,
    Finalize,
    Status,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadPhase::Initialize => "INIT",
            UploadPhase::Append => "APPEND",
            UploadPhase::Finalize => "FINALIZE",
            UploadPhase::Status => "STATUS",
        })
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{} is {size} bytes, above the {limit} byte upload ceiling", .path.display())]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("INIT failed - status {status}: {body}")]
    Init { status: u16, body: String },

    #[error("APPEND failed at segment {segment_index} - status {status}: {body}")]
    Append {
        segment_index: u32,
        status: u16,
        body: String,
    },

    #[error("FINALIZE failed - status {status}: {body}")]
    Finalize { status: u16, body: String },

    #[error("media processing failed for {media_id}: {reason}")]
    ProcessingFailed { media_id: MediaId, reason: String },

    #[error("{phase} returned success without {field}: {body}")]
    MalformedResponse {
        phase: UploadPhase,
        field: &'static str,
        body: String,
    },

    #[error("failed to read {} during {phase}: {source}", .path.display())]
    Io {
        path: PathBuf,
        phase: UploadPhase,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} request failed: {source}")]
    Transport {
        phase: UploadPhase,
        #[source]
        source: TransportError,
    },

    #[error("APPEND request failed at segment {segment_index}: {source}")]
    AppendTransport {
        segment_index: u32,
        #[source]
        source: TransportError,
    },

    #[error("upload cancelled during {phase}")]
    Cancelled { phase: UploadPhase },

    #[error("upload cancelled during APPEND of segment {segment_index}")]
    AppendCancelled { segment_index: u32 },
}

impl UploadError {
    /// Phase the failure belongs to; size and metadata checks count as
    /// initialize.
    pub fn phase(&self) -> UploadPhase {
        match self {
            UploadError::FileTooLarge { .. } | UploadError::Init { .. } => UploadPhase::Initialize,
            UploadError::Append { .. }
            | UploadError::AppendTransport { .. }
            | UploadError::AppendCancelled { .. } => UploadPhase::Append,
            UploadError::Finalize { .. } | UploadError::ProcessingFailed { .. } => {
                UploadPhase::Finalize
            }
            UploadError::MalformedResponse { phase, .. }
            | UploadError::Io { phase, .. }
            | UploadError::Transport { phase, .. }
            | UploadError::Cancelled { phase } => *phase,
        }
    }
}

/// Why the best-effort status probe could not be used.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status endpoint returned {status}: {body}")]
    Unavailable { status: u16, body: String },

    #[error("status response unreadable: {0}")]
    Unparseable(String),

    #[error("status request failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("media processing failed for {media_id}: {reason}")]
    Failed { media_id: MediaId, reason: String },

    #[error("cancelled while waiting for {media_id} to process")]
    Cancelled { media_id: MediaId },
}

#[derive(Debug, Error)]
pub enum PostError {
    #[error("post creation failed - status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("post creation returned success without data.id: {body}")]
    MalformedResponse { body: String },

    #[error("post request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("post creation gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<PostError>,
    },

    #[error("post creation cancelled")]
    Cancelled,
}

impl PostError {
    /// Media visibility lags the processing signal, so most failures are
    /// worth another attempt. Authorization failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PostError::Api { status, .. } => !matches!(status, 401 | 403),
            PostError::MalformedResponse { .. } | PostError::Transport(_) => true,
            PostError::RetryExhausted { .. } | PostError::Cancelled => false,
        }
    }
}

/// Thread publisher phase at which a part failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishPhase {
    Upload,
    Processing,
    Post,
}

impl fmt::Display for PublishPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PublishPhase::Upload => "upload",
            PublishPhase::Processing => "processing",
            PublishPhase::Post => "post creation",
        })
    }
}

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Post(#[from] PostError),
}

impl PhaseError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PhaseError::Upload(UploadError::Cancelled { .. } | UploadError::AppendCancelled { .. })
                | PhaseError::Processing(ProcessingError::Cancelled { .. })
                | PhaseError::Post(PostError::Cancelled)
        )
    }
}

/// A thread that stopped part-way. Posts created before the failure stay on
/// the platform and are listed here in order.
#[derive(Debug)]
pub struct PublishFailure {
    /// 0-based index of the part that failed
    pub index: usize,
    pub total: usize,
    pub phase: PublishPhase,
    pub source: PhaseError,
    pub posts: Vec<ThreadPost>,
    pub trail: Vec<String>,
}

impl PublishFailure {
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}

impl fmt::Display for PublishFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uploaded {}/{}, part {} failed during {}: {}",
            self.posts.len(),
            self.total,
            self.index + 1,
            self.phase,
            self.source
        )
    }
}

impl std::error::Error for PublishFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_not_retried() {
        let unauthorized = PostError::Api {
            status: 401,
            body: "{}".into(),
        };
        let not_ready = PostError::Api {
            status: 400,
            body: "media not ready".into(),
        };
        let empty = PostError::MalformedResponse { body: "{}".into() };

        assert!(!unauthorized.is_retryable());
        assert!(not_ready.is_retryable());
        assert!(empty.is_retryable());
        assert!(!PostError::Cancelled.is_retryable());
    }

    #[test]
    fn publish_failure_reads_as_a_partial_thread() {
        let failure = PublishFailure {
            index: 2,
            total: 3,
            phase: PublishPhase::Upload,
            source: PhaseError::Upload(UploadError::Append {
                segment_index: 4,
                status: 413,
                body: "too large".into(),
            }),
            posts: vec![
                ThreadPost {
                    post_id: "1".into(),
                    media_id: None,
                    text: "a".into(),
                    reply_to_post_id: None,
                },
                ThreadPost {
                    post_id: "2".into(),
                    media_id: None,
                    text: "b".into(),
                    reply_to_post_id: Some("1".into()),
                },
            ],
            trail: vec![],
        };

        assert_eq!(
            failure.to_string(),
            "uploaded 2/3, part 3 failed during upload: APPEND failed at segment 4 - status 413: too large"
        );
        assert!(!failure.is_cancelled());
    }

    #[test]
    fn append_failures_keep_their_segment() {
        let cancelled = UploadError::AppendCancelled { segment_index: 3 };
        assert_eq!(cancelled.phase(), UploadPhase::Append);
        assert!(PhaseError::Upload(cancelled).is_cancelled());

        let timeout = UploadError::AppendTransport {
            segment_index: 2,
            source: TransportError::InvalidRequest("operation timed out".into()),
        };
        assert_eq!(
            timeout.to_string(),
            "APPEND request failed at segment 2: invalid request: operation timed out"
        );
    }
}
