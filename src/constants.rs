//! Platform policy constants

use std::time::Duration;

/// Default X API base for v2 endpoints
pub const DEFAULT_API_BASE: &str = "https://api.x.com";

/// Default host for the legacy v1.1 upload endpoint
pub const DEFAULT_LEGACY_UPLOAD_BASE: &str = "https://upload.twitter.com";

/// Hard ceiling on a single uploaded file (512 MiB)
pub const MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;

/// Bytes per APPEND request (1 MiB). Larger chunks trip 413 on the v2 path.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Per-post video duration ceiling for standard accounts (140 s)
pub const STANDARD_DURATION_LIMIT: Duration = Duration::from_secs(140);

/// Per-post video duration ceiling for premium accounts (2 h)
pub const PREMIUM_DURATION_LIMIT: Duration = Duration::from_secs(7200);

/// Floor applied to server-suggested processing poll intervals
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// First backoff delay before re-attempting post creation
pub const POST_RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Re-attempts after the first post creation call, so at most 6 calls in
/// total with waits of 2, 4, 8, 16 and 32 s between them
pub const POST_MAX_RETRIES: u32 = 5;

/// Per-request HTTP timeout
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Caption used when the user does not provide one
pub const DEFAULT_POST_TEXT: &str = "Check out my audio recording!";
