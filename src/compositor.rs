use fast_image_resize as fir;
use ffmpeg_pipe::{Pipeline, VideoFrame};

use crate::layout::{self, TileRect};

/// What the compositor reads from a pipeline.
pub trait FrameSource {
    fn latest_frame(&self) -> Option<VideoFrame>;
    fn is_working(&self) -> bool;
}

impl FrameSource for Pipeline {
    fn latest_frame(&self) -> Option<VideoFrame> {
        Pipeline::latest_frame(self)
    }

    fn is_working(&self) -> bool {
        Pipeline::is_working(self)
    }
}

/// Drawing target: an RGB canvas presented once per tick.
pub trait RenderSurface {
    fn size(&self) -> (u32, u32);
    /// Starts a new tick with a blank canvas.
    fn clear(&mut self);
    /// `rgb` holds `rect.width * rect.height` packed RGB24 pixels.
    fn draw_rgb(&mut self, rect: TileRect, rgb: &[u8]);
    fn present(&mut self) -> anyhow::Result<()>;
}

/// Scales each visible source's latest frame into its tile.
pub struct Compositor {
    resizer: fir::Resizer,
    options: fir::ResizeOptions,
    dst_rgb: Vec<u8>,
}

impl Default for Compositor {
    fn default() -> Self {
        Self {
            resizer: fir::Resizer::new(),
            options: fir::ResizeOptions::new()
                .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Bilinear)),
            dst_rgb: Vec::new(),
        }
    }
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws one tick and presents it. Returns how many tiles got a frame.
    pub fn tick<S: FrameSource, R: RenderSurface>(
        &mut self,
        streams: &[S],
        maximized: Option<usize>,
        surface: &mut R,
    ) -> anyhow::Result<usize> {
        surface.clear();
        let (width, height) = surface.size();

        let mut drawn = 0;
        for (index, rect) in layout::visible_tiles(streams.len(), width, height, maximized) {
            if rect.width == 0 || rect.height == 0 {
                continue;
            }
            let stream = &streams[index];
            if !stream.is_working() {
                continue;
            }
            let Some(frame) = stream.latest_frame() else {
                continue;
            };
            match self.scale(&frame, rect) {
                Ok(rgb) => {
                    surface.draw_rgb(rect, rgb);
                    drawn += 1;
                }
                Err(e) => log::debug!("Compositor: tile {} skipped: {}", index, e),
            }
        }

        surface.present()?;
        Ok(drawn)
    }

    fn scale(&mut self, frame: &VideoFrame, rect: TileRect) -> anyhow::Result<&[u8]> {
        let rgb = frame.to_rgb();
        let expected = VideoFrame::byte_len(frame.width, frame.height);
        if rgb.len() != expected {
            anyhow::bail!("frame holds {} bytes, expected {}", rgb.len(), expected);
        }

        self.dst_rgb.resize(VideoFrame::byte_len(rect.width, rect.height), 0);
        if (frame.width, frame.height) == (rect.width, rect.height) {
            self.dst_rgb.copy_from_slice(&rgb);
            return Ok(&self.dst_rgb);
        }

        {
            let src =
                fir::images::ImageRef::new(frame.width, frame.height, &rgb, fir::PixelType::U8x3)?;
            let mut dst = fir::images::Image::from_slice_u8(
                rect.width,
                rect.height,
                self.dst_rgb.as_mut_slice(),
                fir::PixelType::U8x3,
            )?;
            self.resizer.resize(&src, &mut dst, Some(&self.options))?;
        }
        Ok(&self.dst_rgb)
    }
}
