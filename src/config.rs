use std::time::Duration;

use clap::Parser;
use ffmpeg_pipe::{PipeSettings, PixelFormat};

/// Live video wall: decodes every source and tiles them in one window.
#[derive(Debug, Clone, Parser)]
#[command(name = "nvr-wall", version, about)]
pub struct WallConfig {
    /// Source URLs (rtsp://, http://, file paths, anything ffmpeg opens)
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,

    /// Initial window width
    #[arg(long, default_value_t = 1680)]
    pub width: u32,

    /// Initial window height
    #[arg(long, default_value_t = 1050)]
    pub height: u32,

    /// Forward decoder diagnostics and log at debug level
    #[arg(long)]
    pub debug: bool,

    /// Never decode or play audio
    #[arg(long)]
    pub no_audio: bool,

    /// Raw layout requested from the decoder (rgb24 or bgr24)
    #[arg(long, default_value = "rgb24")]
    pub pixel_format: PixelFormat,

    /// Seconds to wait for each source's probe
    #[arg(long, default_value_t = 10)]
    pub probe_timeout: u64,

    /// Delay between compositor ticks, in milliseconds
    #[arg(long, default_value_t = 10)]
    pub tick_ms: u64,

    /// RTSP lower transport passed to ffmpeg
    #[arg(long, default_value = "tcp")]
    pub rtsp_transport: String,

    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: String,

    #[arg(long, default_value = "ffprobe")]
    pub ffprobe: String,

    /// Stream played by the audio preview toggle (M key)
    #[arg(long)]
    pub preview_url: Option<String>,

    /// Command used to play the preview stream; the URL is appended
    #[arg(long, default_value = "mpv --quiet --no-terminal --vo=null")]
    pub preview_player: String,
}

impl WallConfig {
    pub fn pipe_settings(&self) -> PipeSettings {
        PipeSettings {
            pixel_format: self.pixel_format,
            debug: self.debug,
            audio: !self.no_audio,
            probe_timeout: Duration::from_secs(self.probe_timeout),
            ..PipeSettings::default()
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WallConfig::try_parse_from(["nvr-wall", "rtsp://cam/1"]).unwrap();
        assert_eq!(config.urls, vec!["rtsp://cam/1"]);
        assert_eq!((config.width, config.height), (1680, 1050));
        assert_eq!(config.tick(), Duration::from_millis(10));
        assert_eq!(config.rtsp_transport, "tcp");
        assert!(config.preview_url.is_none());

        let settings = config.pipe_settings();
        assert!(settings.audio);
        assert!(!settings.debug);
        assert_eq!(settings.pixel_format, PixelFormat::Rgb24);
        assert_eq!(settings.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn test_overrides() {
        let config = WallConfig::try_parse_from([
            "nvr-wall",
            "--no-audio",
            "--debug",
            "--pixel-format",
            "bgr24",
            "--probe-timeout",
            "3",
            "--width",
            "800",
            "a",
            "b",
        ])
        .unwrap();
        assert_eq!(config.urls, vec!["a", "b"]);
        assert_eq!(config.width, 800);

        let settings = config.pipe_settings();
        assert!(!settings.audio);
        assert!(settings.debug);
        assert_eq!(settings.pixel_format, PixelFormat::Bgr24);
        assert_eq!(settings.probe_timeout, Duration::from_secs(3));
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_requires_a_source() {
        assert!(WallConfig::try_parse_from(["nvr-wall"]).is_err());
    }

    #[test]
    fn test_rejects_unknown_pixel_format() {
        assert!(WallConfig::try_parse_from(["nvr-wall", "--pixel-format", "yuv420p", "a"]).is_err());
    }
}
