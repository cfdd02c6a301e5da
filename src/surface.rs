use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use softbuffer::{Context, Surface};
use winit::window::Window;

use crate::compositor::RenderSurface;
use crate::layout::TileRect;

/// Owned 0RGB pixel buffer the compositor draws into between presents.
#[derive(Debug, Default)]
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Blanks the canvas, reallocating if the size changed.
    pub fn reset(&mut self, width: u32, height: u32) {
        if (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
            self.pixels = vec![0; width as usize * height as usize];
        } else {
            self.pixels.fill(0);
        }
    }

    /// Copies a packed RGB24 block of `rect.width * rect.height` pixels,
    /// clipped to the canvas.
    pub fn blit_rgb(&mut self, rect: TileRect, rgb: &[u8]) {
        let src_stride = rect.width as usize * 3;
        if rgb.len() < src_stride * rect.height as usize || rect.x >= self.width {
            return;
        }
        let cols = rect.width.min(self.width - rect.x) as usize;
        let rows = rect.height.min(self.height.saturating_sub(rect.y)) as usize;

        for row in 0..rows {
            let src = &rgb[row * src_stride..row * src_stride + cols * 3];
            let start = (rect.y as usize + row) * self.width as usize + rect.x as usize;
            let dst = &mut self.pixels[start..start + cols];
            for (px, c) in dst.iter_mut().zip(src.chunks_exact(3)) {
                *px = (c[0] as u32) << 16 | (c[1] as u32) << 8 | c[2] as u32;
            }
        }
    }
}

/// winit window presented through softbuffer.
pub struct WindowSurface {
    window: Arc<Window>,
    surface: Surface<Arc<Window>, Arc<Window>>,
    // keeps the display connection open for the surface
    _context: Context<Arc<Window>>,
    canvas: Canvas,
}

impl WindowSurface {
    pub fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let context = Context::new(window.clone())
            .map_err(|e| anyhow!("{}", e))
            .context("failed to open the display for drawing")?;
        let surface = Surface::new(&context, window.clone())
            .map_err(|e| anyhow!("{}", e))
            .context("failed to create the drawing surface")?;
        let size = window.inner_size();
        Ok(Self {
            window,
            surface,
            _context: context,
            canvas: Canvas::new(size.width, size.height),
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl RenderSurface for WindowSurface {
    fn size(&self) -> (u32, u32) {
        self.canvas.size()
    }

    fn clear(&mut self) {
        let size = self.window.inner_size();
        self.canvas.reset(size.width, size.height);
    }

    fn draw_rgb(&mut self, rect: TileRect, rgb: &[u8]) {
        self.canvas.blit_rgb(rect, rgb);
    }

    fn present(&mut self) -> anyhow::Result<()> {
        let (width, height) = self.canvas.size();
        // minimized
        let (Some(w), Some(h)) = (NonZeroU32::new(width), NonZeroU32::new(height)) else {
            return Ok(());
        };
        self.surface
            .resize(w, h)
            .map_err(|e| anyhow!("surface resize failed: {}", e))?;
        let mut buffer = self
            .surface
            .buffer_mut()
            .map_err(|e| anyhow!("surface buffer unavailable: {}", e))?;
        buffer.copy_from_slice(self.canvas.pixels());
        buffer
            .present()
            .map_err(|e| anyhow!("present failed: {}", e))
    }
}
