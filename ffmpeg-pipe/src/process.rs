//! Launching the external decoder.
//!
//! ```text
//!                 ┌─► stdout: rawvideo, W*H*3 bytes per frame ──► video reader
//! ffmpeg -i url ──┤
//!                 └─► stderr: s16le 44.1kHz stereo (audio sources) ──► audio reader
//!                     or diagnostics (video-only sources)        ──► log drain
//! ```

use std::process::Stdio;

use tokio::io::AsyncRead;

use crate::error::{PipeError, Result};
use crate::frame::PixelFormat;
use crate::probe::SourceDescriptor;

pub const AUDIO_SAMPLE_RATE: u32 = 44_100;
pub const AUDIO_CHANNELS: u16 = 2;
pub const AUDIO_FRAMES_PER_BLOCK: usize = 4096;
/// 4096 frames * 2 channels * 2 bytes
pub const AUDIO_BLOCK_BYTES: usize = AUDIO_FRAMES_PER_BLOCK * AUDIO_CHANNELS as usize * 2;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Everything the decoder needs to start one source.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub audio: bool,
    pub debug: bool,
}

impl DecodeRequest {
    pub fn new(descriptor: &SourceDescriptor, pixel_format: PixelFormat, debug: bool) -> Self {
        Self {
            url: descriptor.url.clone(),
            width: descriptor.width,
            height: descriptor.height,
            pixel_format,
            audio: descriptor.has_audio,
            debug,
        }
    }
}

/// Handle on a running decode process, exclusively owned by one pipeline.
pub trait DecodeProcess: Send {
    /// Requests termination; returns immediately.
    fn kill(&mut self) -> std::io::Result<()>;

    /// Non-blocking check whether the process is gone.
    fn has_exited(&mut self) -> bool;
}

/// A started decoder: the process plus its output channels.
pub struct DecodeOutput {
    pub process: Box<dyn DecodeProcess>,
    pub video: BoxedReader,
    pub audio: Option<BoxedReader>,
    pub diagnostics: Option<BoxedReader>,
}

/// Starts decode processes. Must be called from within a tokio runtime.
pub trait Decoder: Send + Sync {
    fn spawn(&self, request: &DecodeRequest) -> Result<DecodeOutput>;
}

/// Decoder backed by the `ffmpeg` executable.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: String,
    rtsp_transport: String,
}

impl Ffmpeg {
    pub fn new(program: impl Into<String>, rtsp_transport: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            rtsp_transport: rtsp_transport.into(),
        }
    }

    pub fn args(&self, req: &DecodeRequest) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

        push(&["-nostdin", "-hide_banner"]);
        // stderr carries PCM for audio sources, so ffmpeg must stay silent there
        let loglevel = if req.audio {
            "quiet"
        } else if req.debug {
            "info"
        } else {
            "error"
        };
        push(&["-loglevel", loglevel]);

        if req.url.starts_with("rtsp://") {
            push(&["-rtsp_transport", self.rtsp_transport.as_str()]);
        } else if req.url.starts_with("http://") || req.url.starts_with("https://") {
            push(&[
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "2",
            ]);
        }

        let scale = format!("scale={}:{}", req.width, req.height);
        push(&["-i", req.url.as_str()]);
        push(&[
            "-map",
            "0:v:0",
            "-vf",
            scale.as_str(),
            "-f",
            "rawvideo",
            "-pix_fmt",
            req.pixel_format.ffmpeg_name(),
            "pipe:1",
        ]);

        if req.audio {
            let rate = AUDIO_SAMPLE_RATE.to_string();
            let channels = AUDIO_CHANNELS.to_string();
            push(&[
                "-map",
                "0:a:0",
                "-f",
                "s16le",
                "-acodec",
                "pcm_s16le",
                "-ac",
                channels.as_str(),
                "-ar",
                rate.as_str(),
                "pipe:2",
            ]);
        }

        args
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg", "tcp")
    }
}

impl Decoder for Ffmpeg {
    fn spawn(&self, req: &DecodeRequest) -> Result<DecodeOutput> {
        let args = self.args(req);
        log::debug!("ffmpeg: {} {}", self.program, args.join(" "));

        let mut child = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PipeError::SpawnFailed {
                url: req.url.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| PipeError::SpawnFailed {
            url: req.url.clone(),
            source: std::io::Error::other("stdout not captured"),
        })?;
        let stderr = child.stderr.take().map(|s| Box::new(s) as BoxedReader);

        let (audio, diagnostics) = if req.audio {
            (stderr, None)
        } else {
            (None, stderr)
        };

        Ok(DecodeOutput {
            process: Box::new(FfmpegProcess { child }),
            video: Box::new(stdout),
            audio,
            diagnostics,
        })
    }
}

struct FfmpegProcess {
    child: tokio::process::Child,
}

impl DecodeProcess for FfmpegProcess {
    fn kill(&mut self) -> std::io::Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        self.child.start_kill()
    }

    fn has_exited(&mut self) -> bool {
        // an error here means the child can no longer be observed; treat as gone
        !matches!(self.child.try_wait(), Ok(None))
    }
}
