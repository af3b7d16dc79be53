//! End-to-end sharing of one recorded note: split, render, publish.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::domain::{AccountTier, PublishedThread, Segment, ThreadStatus, plan_for_tier};
use crate::media::{
    AudioError, FfmpegRenderer, RenderError, RenderRequest, VideoQuality, VideoRenderer,
    extract_window, wav_duration_ms,
};
use crate::services::error::TransportError;
use crate::services::{
    CancelFlag, ProgressEvent, ProgressSink, PublishFailure, SharePart, ThreadPublisher,
    TokenProvider, XClient,
};

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("not signed in to X")]
    NotAuthenticated,

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("rendering part {part} failed: {source}")]
    Render {
        part: usize,
        #[source]
        source: RenderError,
    },

    #[error("failed to prepare working directory: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("background audio task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("share cancelled while preparing media")]
    Cancelled,

    #[error(transparent)]
    Publish(#[from] PublishFailure),
}

impl ShareError {
    /// Thread outcome for reporting; only publish failures can leave posts
    /// behind.
    pub fn thread_status(&self) -> Option<ThreadStatus> {
        match self {
            ShareError::Publish(_) => Some(ThreadStatus::PartialFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShareRequest {
    /// Full recording as WAV
    pub recording: PathBuf,
    /// Still image shown for the length of each clip
    pub image: PathBuf,
    /// Already rendered video of the whole recording
    pub preview: Option<PathBuf>,
    pub caption: Option<String>,
    pub tier: AccountTier,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShareReport {
    pub status: ThreadStatus,
    pub segments: Vec<Segment>,
    pub thread: PublishedThread,
}

pub struct SharePipeline {
    publisher: ThreadPublisher,
    renderer: Arc<dyn VideoRenderer>,
    quality: VideoQuality,
    default_caption: String,
    cancel: CancelFlag,
}

impl SharePipeline {
    pub fn new(publisher: ThreadPublisher, renderer: Arc<dyn VideoRenderer>) -> Self {
        let config = Config::default();
        Self {
            publisher,
            renderer,
            quality: config.video_quality,
            default_caption: config.default_caption,
            cancel: CancelFlag::default(),
        }
    }

    /// Pipeline wired from settings: reqwest transport, ffmpeg renderer,
    /// configured retry policy and status strategy.
    pub fn from_config(config: &Config, cancel: CancelFlag) -> Result<Self, TransportError> {
        let publisher = ThreadPublisher::new(XClient::open(config)?)
            .with_retry(config.retry_policy())
            .with_strategy(config.status_strategy);
        let renderer = Arc::new(FfmpegRenderer::new(config.ffmpeg_path.clone()));

        Ok(Self::new(publisher, renderer)
            .with_quality(config.video_quality)
            .with_default_caption(&config.default_caption)
            .with_cancel(cancel))
    }

    pub fn with_quality(mut self, quality: VideoQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_default_caption(mut self, caption: &str) -> Self {
        self.default_caption = caption.to_string();
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.publisher = self.publisher.with_cancel(cancel.clone());
        self.cancel = cancel;
        self
    }

    pub async fn share_recording(
        &self,
        request: &ShareRequest,
        tokens: &dyn TokenProvider,
        progress: &dyn ProgressSink,
    ) -> Result<ShareReport, ShareError> {
        let access_token = tokens.access_token().ok_or(ShareError::NotAuthenticated)?;

        let recording = request.recording.clone();
        let total_ms = tokio::task::spawn_blocking(move || wav_duration_ms(&recording)).await??;
        let segments = plan_for_tier(total_ms, request.tier);
        info!(
            "[share] {} is {total_ms}ms, {} part(s) at the {:?} ceiling",
            request.recording.display(),
            segments.len(),
            request.tier
        );

        let caption = request
            .caption
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(self.default_caption.as_str())
            .to_string();

        let workdir = tempfile::Builder::new()
            .prefix("echox-share-")
            .tempdir()
            .map_err(ShareError::Workspace)?;

        let parts = match (&request.preview, segments.as_slice()) {
            (Some(preview), [_single]) => {
                info!("[share] single part, reusing preview {}", preview.display());
                vec![SharePart::new(preview.clone(), None)]
            }
            _ => {
                self.render_parts(request, &segments, workdir.path(), progress)
                    .await?
            }
        };

        let thread = self
            .publisher
            .publish(&parts, &caption, &access_token, progress)
            .await?;

        Ok(ShareReport {
            status: ThreadStatus::Posted,
            segments,
            thread,
        })
    }

    async fn render_parts(
        &self,
        request: &ShareRequest,
        segments: &[Segment],
        workdir: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<SharePart>, ShareError> {
        let total = segments.len();
        let mut parts = Vec::with_capacity(total);

        for segment in segments {
            if self.cancel.is_cancelled() {
                return Err(ShareError::Cancelled);
            }
            let n = segment.sequence_index as usize + 1;
            progress.report(ProgressEvent::Rendering { part: n, total });
            info!("[share] rendering part {}", segment.label());

            let audio = workdir.join(format!("part{n}.wav"));
            let source = request.recording.clone();
            let target = audio.clone();
            let (start, duration) = (segment.start_offset_ms, segment.duration_ms);
            let written = tokio::task::spawn_blocking(move || {
                extract_window(&source, &target, start, duration)
            })
            .await??;
            if written != segment.duration_ms {
                warn!(
                    "[share] part {} audio is {written}ms, planned {}ms",
                    segment.label(),
                    segment.duration_ms
                );
            }

            let render = RenderRequest {
                image: request.image.clone(),
                audio,
                duration: segment.duration(),
                output: workdir.join(format!("part{n}.mp4")),
                quality: self.quality,
            };
            let file = self
                .cancel
                .run(self.renderer.render(&render))
                .await
                .ok_or(ShareError::Cancelled)?
                .map_err(|source| ShareError::Render { part: n, source })?;

            parts.push(SharePart::new(file, segment.caption_suffix()));
        }

        Ok(parts)
    }
}
