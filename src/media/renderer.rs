//! Still-image + narration video rendering through ffmpeg.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

const FRAME_RATE: u32 = 30;
const AUDIO_BITRATE: &str = "128k";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    #[default]
    P720,
    P1080,
}

impl VideoQuality {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            VideoQuality::P720 => (1280, 720),
            VideoQuality::P1080 => (1920, 1080),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub image: PathBuf,
    pub audio: PathBuf,
    pub duration: Duration,
    pub output: PathBuf,
    pub quality: VideoQuality,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ffmpeg exited with {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },

    #[error("renderer reported success but {} is missing", .0.display())]
    MissingOutput(PathBuf),
}

/// Produces one uploadable clip from a still image and an audio track.
#[async_trait]
pub trait VideoRenderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<PathBuf, RenderError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegRenderer {
    program: String,
}

impl Default for FfmpegRenderer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegRenderer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// H.264 yuv420p + AAC in MP4, letterboxed to the quality's frame size.
    pub fn args(request: &RenderRequest) -> Vec<String> {
        let (width, height) = request.quality.dimensions();
        let filter = format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,format=yuv420p"
        );

        vec![
            "-y".into(),
            "-loop".into(),
            "1".into(),
            "-framerate".into(),
            FRAME_RATE.to_string(),
            "-i".into(),
            request.image.to_string_lossy().into_owned(),
            "-i".into(),
            request.audio.to_string_lossy().into_owned(),
            "-t".into(),
            format!("{:.3}", request.duration.as_secs_f64()),
            "-vf".into(),
            filter,
            "-c:v".into(),
            "libx264".into(),
            "-tune".into(),
            "stillimage".into(),
            "-preset".into(),
            "veryfast".into(),
            "-r".into(),
            FRAME_RATE.to_string(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            AUDIO_BITRATE.into(),
            "-shortest".into(),
            "-movflags".into(),
            "+faststart".into(),
            request.output.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl VideoRenderer for FfmpegRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<PathBuf, RenderError> {
        debug!(
            "[render] {} + {} -> {} ({:?})",
            request.image.display(),
            request.audio.display(),
            request.output.display(),
            request.quality
        );

        let output = Command::new(&self.program)
            .args(Self::args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RenderError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&request.output).await;
            return Err(RenderError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if !tokio::fs::try_exists(&request.output).await.unwrap_or(false) {
            return Err(RenderError::MissingOutput(request.output.clone()));
        }
        Ok(request.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(quality: VideoQuality) -> RenderRequest {
        RenderRequest {
            image: PathBuf::from("/tmp/cover.png"),
            audio: PathBuf::from("/tmp/part1.wav"),
            duration: Duration::from_millis(140_000),
            output: PathBuf::from("/tmp/part1.mp4"),
            quality,
        }
    }

    #[test]
    fn args_encode_quality_and_duration() {
        let args = FfmpegRenderer::args(&request(VideoQuality::P1080));

        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "140.000");
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[vf + 1].starts_with("scale=1920:1080"));
        assert!(args[vf + 1].ends_with("format=yuv420p"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/part1.mp4"));
    }

    #[test]
    fn quality_names_are_stable() {
        assert_eq!(serde_json::to_string(&VideoQuality::P720).unwrap(), "\"p720\"");
        assert_eq!(VideoQuality::default().dimensions(), (1280, 720));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let renderer = FfmpegRenderer::new("/nonexistent/echox-ffmpeg");
        let err = renderer.render(&request(VideoQuality::P720)).await.unwrap_err();
        assert!(matches!(err, RenderError::Spawn { .. }));
    }
}
