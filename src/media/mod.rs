//! Local media preparation: audio windows and clip rendering

pub mod audio;
pub mod renderer;

pub use audio::{AudioError, PcmFormat, extract_window, pcm_to_wav, wav_duration_ms};
pub use renderer::{FfmpegRenderer, RenderError, RenderRequest, VideoQuality, VideoRenderer};
