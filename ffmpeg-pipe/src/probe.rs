//! Source probing through the external `ffprobe` utility.

use std::fmt;
use std::process::Stdio;

use serde::Deserialize;

use crate::error::{PipeError, Result};

/// Frame size used when a source does not report its dimensions.
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// Format-level info (corresponds to ffprobe format).
#[derive(Debug, Clone, Default)]
pub struct FormatInfo {
    /// Format name, e.g. "rtsp"
    pub format_name: String,
    /// Duration in seconds; None for live sources.
    pub duration_sec: Option<f64>,
    /// Total bitrate in bps; 0 if unknown.
    pub bit_rate: i64,
    pub nb_streams: u32,
}

/// Per-stream info (corresponds to ffprobe stream).
#[derive(Debug, Clone, Default)]
pub struct StreamInfo {
    pub index: usize,
    /// "video" | "audio" | "data" etc.
    pub codec_type: String,
    pub codec_name: String,
    pub time_base: String,
    /// Frame rate, e.g. "25/1"
    pub rate: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

impl StreamInfo {
    pub fn is_video(&self) -> bool {
        self.codec_type == "video"
    }

    pub fn is_audio(&self) -> bool {
        self.codec_type == "audio"
    }
}

/// Full probe result (format + streams, like ffprobe).
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub format: FormatInfo,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn video(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.is_video())
    }

    pub fn has_video(&self) -> bool {
        self.video().is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.streams.iter().any(|s| s.is_audio())
    }

    /// Parses the JSON printed by `ffprobe -print_format json -show_format -show_streams`.
    pub fn from_ffprobe_json(raw: &[u8]) -> serde_json::Result<Self> {
        let out: FfprobeOutput = serde_json::from_slice(raw)?;
        let format = out.format.unwrap_or_default();
        let streams: Vec<StreamInfo> = out
            .streams
            .into_iter()
            .map(|s| StreamInfo {
                index: s.index,
                codec_type: s.codec_type.unwrap_or_default(),
                codec_name: s.codec_name.unwrap_or_default(),
                time_base: s.time_base.unwrap_or_default(),
                rate: s.r_frame_rate.unwrap_or_default(),
                width: s.width.filter(|w| *w > 0),
                height: s.height.filter(|h| *h > 0),
                sample_rate: s.sample_rate.and_then(|v| v.parse().ok()),
                channels: s.channels,
            })
            .collect();

        Ok(Self {
            format: FormatInfo {
                format_name: format.format_name.unwrap_or_default(),
                duration_sec: format.duration.and_then(|d| d.parse().ok()),
                bit_rate: format.bit_rate.and_then(|b| b.parse().ok()).unwrap_or(0),
                nb_streams: format.nb_streams.unwrap_or(streams.len() as u32),
            },
            streams,
        })
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FORMAT]")?;
        writeln!(f, "format_name={}", self.format.format_name)?;
        match self.format.duration_sec {
            Some(d) => writeln!(f, "duration_sec={:.3}", d)?,
            None => writeln!(f, "duration_sec=N/A")?,
        }
        writeln!(f, "bit_rate={}", self.format.bit_rate)?;
        writeln!(f, "nb_streams={}", self.format.nb_streams)?;
        writeln!(f, "[/FORMAT]")?;
        for s in &self.streams {
            writeln!(f, "[STREAM]")?;
            writeln!(f, "index={}", s.index)?;
            writeln!(f, "codec_type={}", s.codec_type)?;
            writeln!(f, "codec_name={}", s.codec_name)?;
            writeln!(f, "time_base={}", s.time_base)?;
            writeln!(f, "rate={}", s.rate)?;
            if let (Some(w), Some(h)) = (s.width, s.height) {
                writeln!(f, "size={}x{}", w, h)?;
            }
            if let Some(sr) = s.sample_rate {
                writeln!(f, "sample_rate={}", sr)?;
            }
            if let Some(c) = s.channels {
                writeln!(f, "channels={}", c)?;
            }
            writeln!(f, "[/STREAM]")?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    index: usize,
    codec_type: Option<String>,
    codec_name: Option<String>,
    time_base: Option<String>,
    r_frame_rate: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    sample_rate: Option<String>,
    channels: Option<u32>,
}

#[derive(Deserialize, Default)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    nb_streams: Option<u32>,
}

/// What the wall needs to know about a source. Immutable once probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

impl SourceDescriptor {
    pub fn new(url: impl Into<String>, width: u32, height: u32, has_audio: bool) -> Self {
        Self {
            url: url.into(),
            width,
            height,
            has_audio,
        }
    }

    /// Builds a descriptor from probe output. A source without a video stream
    /// is rejected; a missing frame size falls back to 640x480.
    pub fn from_media_info(url: &str, info: &MediaInfo, allow_audio: bool) -> Result<Self> {
        let video = info.video().ok_or_else(|| PipeError::ProbeFailed {
            url: url.to_string(),
            reason: "no video stream".to_string(),
        })?;

        let (width, height) = match (video.width, video.height) {
            (Some(w), Some(h)) => (w, h),
            _ => {
                log::warn!(
                    "probe: {} did not report a frame size, using {}x{}",
                    url,
                    DEFAULT_WIDTH,
                    DEFAULT_HEIGHT
                );
                (DEFAULT_WIDTH, DEFAULT_HEIGHT)
            }
        };

        Ok(Self {
            url: url.to_string(),
            width,
            height,
            has_audio: allow_audio && info.has_audio(),
        })
    }
}

/// Queries a source's media characteristics without decoding it.
#[allow(async_fn_in_trait)]
pub trait Probe {
    async fn probe(&self, url: &str) -> Result<MediaInfo>;
}

/// Probe backed by the `ffprobe` executable.
#[derive(Debug, Clone)]
pub struct Ffprobe {
    program: String,
}

impl Ffprobe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(url: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        if url.starts_with("rtsp://") {
            args.push("-rtsp_transport".to_string());
            args.push("tcp".to_string());
        }
        args.push(url.to_string());
        args
    }
}

impl Default for Ffprobe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl Probe for Ffprobe {
    async fn probe(&self, url: &str) -> Result<MediaInfo> {
        let failed = |reason: String| PipeError::ProbeFailed {
            url: url.to_string(),
            reason,
        };

        // kill_on_drop: a caller-side timeout drops this future and must not
        // leave ffprobe behind
        let output = tokio::process::Command::new(&self.program)
            .args(Self::args(url))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| failed(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        MediaInfo::from_ffprobe_json(&output.stdout).map_err(|e| failed(e.to_string()))
    }
}
