use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::watch;

/// Packed 3-byte pixel layouts the decoder can be asked to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    #[default]
    Rgb24,
    Bgr24,
}

impl PixelFormat {
    /// Name understood by ffmpeg's `-pix_fmt`.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
        }
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb24" | "rgb" => Ok(PixelFormat::Rgb24),
            "bgr24" | "bgr" => Ok(PixelFormat::Bgr24),
            other => Err(format!("unsupported pixel format: {}", other)),
        }
    }
}

/// One fully decoded picture, `width * height * 3` bytes.
///
/// The payload is an immutable `Bytes`, so cloning a frame out of the slot is a
/// reference-count bump and a reader can never observe a half-written frame.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Position of this frame in the pipeline's output, starting at 1.
    pub seq: u64,
}

impl VideoFrame {
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 3
    }

    /// Returns the pixels as packed RGB24, swapping channels if needed.
    pub fn to_rgb(&self) -> Bytes {
        match self.format {
            PixelFormat::Rgb24 => self.data.clone(),
            PixelFormat::Bgr24 => {
                let mut rgb = Vec::with_capacity(self.data.len());
                for px in self.data.chunks_exact(3) {
                    rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                }
                Bytes::from(rgb)
            }
        }
    }
}

impl Display for VideoFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "VideoFrame {{ {}x{} {:?} seq={} data: {} }}",
            self.width,
            self.height,
            self.format,
            self.seq,
            self.data.len()
        )
    }
}

/// Latest-wins holder: every publish replaces the previous frame, nothing is
/// queued, and a slow reader simply misses intermediate frames.
pub struct FrameSlot {
    tx: watch::Sender<Option<VideoFrame>>,
    published: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            published: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, frame: VideoFrame) {
        self.tx.send_replace(Some(frame));
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Non-blocking snapshot of the most recent frame.
    pub fn latest(&self) -> Option<VideoFrame> {
        self.tx.borrow().clone()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64, fill: u8) -> VideoFrame {
        VideoFrame {
            data: Bytes::from(vec![fill; 12]),
            width: 2,
            height: 2,
            format: PixelFormat::Rgb24,
            seq,
        }
    }

    #[test]
    fn test_slot_starts_empty() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());
        assert_eq!(slot.published(), 0);
    }

    #[test]
    fn test_slot_keeps_only_latest() {
        let slot = FrameSlot::new();
        slot.publish(frame(1, 10));
        slot.publish(frame(2, 20));
        slot.publish(frame(3, 30));

        let latest = slot.latest().unwrap();
        assert_eq!(latest.seq, 3);
        assert!(latest.data.iter().all(|b| *b == 30));
        assert_eq!(slot.published(), 3);

        // reading does not consume
        assert_eq!(slot.latest().unwrap().seq, 3);
    }

    #[test]
    fn test_slot_clear() {
        let slot = FrameSlot::new();
        slot.publish(frame(1, 1));
        slot.clear();
        assert!(slot.latest().is_none());
    }

    #[test]
    fn test_bgr_to_rgb_swaps_channels() {
        let f = VideoFrame {
            data: Bytes::from(vec![1, 2, 3, 4, 5, 6]),
            width: 2,
            height: 1,
            format: PixelFormat::Bgr24,
            seq: 1,
        };
        assert_eq!(f.to_rgb().as_ref(), &[3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_pixel_format_parse() {
        assert_eq!("rgb24".parse::<PixelFormat>().unwrap(), PixelFormat::Rgb24);
        assert_eq!("BGR24".parse::<PixelFormat>().unwrap(), PixelFormat::Bgr24);
        assert!("yuv420p".parse::<PixelFormat>().is_err());
        assert_eq!(PixelFormat::Bgr24.ffmpeg_name(), "bgr24");
    }
}
