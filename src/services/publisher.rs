//! Sequential thread publishing: upload, wait, post, repeat.

use std::cmp::min;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::constants::{POST_MAX_RETRIES, POST_RETRY_BASE_DELAY};
use crate::domain::{MediaId, PublishedThread, ThreadPost};
use crate::services::cancel::CancelFlag;
use crate::services::clock::{Sleeper, TokioSleeper};
use crate::services::composer::PostComposer;
use crate::services::error::{PhaseError, PostError, PublishFailure, PublishPhase};
use crate::services::processing::{ProcessingMonitor, StatusStrategy};
use crate::services::progress::{NoProgress, ProgressEvent, ProgressSink, Trail};
use crate::services::twitter::XClient;
use crate::services::uploader::ChunkedUploader;

/// Backoff schedule for post creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: POST_MAX_RETRIES,
            base_delay: POST_RETRY_BASE_DELAY,
            max_delay: Duration::from_secs(120),
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * self.exponential_base.powi(exponent);
        min(Duration::from_millis(delay_ms as u64), self.max_delay)
    }
}

/// One media file of a thread and what to append to the caption for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharePart {
    pub file: PathBuf,
    pub caption_suffix: Option<String>,
}

impl SharePart {
    pub fn new(file: impl Into<PathBuf>, caption_suffix: Option<String>) -> Self {
        Self {
            file: file.into(),
            caption_suffix,
        }
    }

    pub fn caption(&self, base_text: &str) -> String {
        format!(
            "{base_text}{}",
            self.caption_suffix.as_deref().unwrap_or_default()
        )
    }
}

/// Everything one publish call needs.
#[derive(Clone)]
pub struct ShareJob {
    pub parts: Vec<SharePart>,
    pub base_text: String,
    pub access_token: String,
    pub progress: Arc<dyn ProgressSink>,
}

impl ShareJob {
    pub fn new(parts: Vec<SharePart>, base_text: &str, access_token: &str) -> Self {
        Self {
            parts,
            base_text: base_text.to_string(),
            access_token: access_token.to_string(),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }
}

#[derive(Clone)]
pub struct ThreadPublisher {
    uploader: ChunkedUploader,
    monitor: ProcessingMonitor,
    composer: PostComposer,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
    cancel: CancelFlag,
}

impl ThreadPublisher {
    pub fn new(client: XClient) -> Self {
        Self::with_sleeper(client, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(client: XClient, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            uploader: ChunkedUploader::new(client.clone()),
            monitor: ProcessingMonitor::new(client.clone(), sleeper.clone()),
            composer: PostComposer::new(client),
            sleeper,
            retry: RetryPolicy::default(),
            cancel: CancelFlag::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_strategy(mut self, strategy: StatusStrategy) -> Self {
        self.monitor = self.monitor.with_strategy(strategy);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.uploader = self.uploader.with_cancel(cancel.clone());
        self.monitor = self.monitor.with_cancel(cancel.clone());
        self.cancel = cancel;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.uploader = self.uploader.with_chunk_size(chunk_size);
        self
    }

    pub async fn run(&self, job: &ShareJob) -> Result<PublishedThread, PublishFailure> {
        self.publish(
            &job.parts,
            &job.base_text,
            &job.access_token,
            job.progress.as_ref(),
        )
        .await
    }

    /// Publishes `parts` in order, each post replying to the previous one.
    /// Stops at the first failure; posts already created stay up and are
    /// returned in the failure.
    pub async fn publish(
        &self,
        parts: &[SharePart],
        base_text: &str,
        access_token: &str,
        progress: &dyn ProgressSink,
    ) -> Result<PublishedThread, PublishFailure> {
        let total = parts.len();
        let mut trail = Trail::new(progress);
        let mut posts: Vec<ThreadPost> = Vec::with_capacity(total);
        let mut previous_post_id: Option<String> = None;

        for (index, part) in parts.iter().enumerate() {
            let n = index + 1;
            let sink = trail.sink();

            trail.emit(ProgressEvent::Uploading { part: n, total });
            let upload = match self
                .uploader
                .upload_with_progress(&part.file, access_token, |segment, bytes_sent, total_bytes| {
                    sink.report(ProgressEvent::Chunk {
                        part: n,
                        total,
                        segment,
                        bytes_sent,
                        total_bytes,
                        percent: percent(bytes_sent, total_bytes),
                    });
                })
                .await
            {
                Ok(upload) => upload,
                Err(err) => {
                    return Err(failure(index, total, PublishPhase::Upload, err.into(), posts, trail));
                }
            };

            if let Some(info) = &upload.processing {
                trail.emit(ProgressEvent::Processing {
                    part: n,
                    total,
                    progress_percent: info.progress_percent,
                });
            }
            if let Err(err) = self
                .monitor
                .await_ready_with_progress(
                    &upload.media_id,
                    upload.processing.clone(),
                    access_token,
                    |info| {
                        sink.report(ProgressEvent::Processing {
                            part: n,
                            total,
                            progress_percent: info.progress_percent,
                        })
                    },
                )
                .await
            {
                return Err(failure(index, total, PublishPhase::Processing, err.into(), posts, trail));
            }

            trail.emit(ProgressEvent::Posting { part: n, total });
            let post = match self
                .post_with_retry(
                    &part.caption(base_text),
                    &upload.media_id,
                    previous_post_id.as_deref(),
                    access_token,
                )
                .await
            {
                Ok(post) => post,
                Err(err) => {
                    return Err(failure(index, total, PublishPhase::Post, err.into(), posts, trail));
                }
            };

            trail.emit(ProgressEvent::Posted {
                part: n,
                total,
                post_id: post.post_id.clone(),
            });
            previous_post_id = Some(post.post_id.clone());
            posts.push(post);
        }

        info!("[publish] thread of {total} posted");
        Ok(PublishedThread {
            posts,
            trail: trail.into_lines(),
        })
    }

    /// Newly processed media can take a moment to become attachable, so
    /// retryable failures are retried on the backoff schedule.
    async fn post_with_retry(
        &self,
        text: &str,
        media_id: &MediaId,
        reply_to: Option<&str>,
        access_token: &str,
    ) -> Result<ThreadPost, PostError> {
        let mut retries = 0;
        loop {
            let attempt = self
                .cancel
                .run(
                    self.composer
                        .create_post(text, Some(media_id), reply_to, access_token),
                )
                .await
                .ok_or(PostError::Cancelled)?;

            let err = match attempt {
                Ok(post) => return Ok(post),
                Err(err) => err,
            };
            if !err.is_retryable() {
                return Err(err);
            }
            if retries >= self.retry.max_retries {
                return Err(if retries == 0 {
                    err
                } else {
                    PostError::RetryExhausted {
                        attempts: retries + 1,
                        last: Box::new(err),
                    }
                });
            }

            retries += 1;
            let delay = self.retry.delay_for(retries);
            warn!(
                "[post] attempt {} failed, retrying in {:?}: {}",
                retries, delay, err
            );
            if self.cancel.sleep(self.sleeper.as_ref(), delay).await {
                return Err(PostError::Cancelled);
            }
        }
    }
}

fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        100
    } else {
        ((sent.saturating_mul(100)) / total).min(100) as u8
    }
}

fn failure(
    index: usize,
    total: usize,
    phase: PublishPhase,
    source: PhaseError,
    posts: Vec<ThreadPost>,
    trail: Trail<'_>,
) -> PublishFailure {
    let failure = PublishFailure {
        index,
        total,
        phase,
        source,
        posts,
        trail: trail.into_lines(),
    };
    if failure.is_cancelled() {
        info!("[publish] {failure}");
    } else {
        error!("[publish] {failure}");
    }
    failure
}
