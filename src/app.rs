//! `ApplicationHandler` driving the wall: input goes to the focus router and
//! the preview toggle, every redraw runs one compositor tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ffmpeg_pipe::StreamRegistry;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::compositor::Compositor;
use crate::config::WallConfig;
use crate::focus::FocusRouter;
use crate::preview::AudioPreview;
use crate::surface::WindowSurface;

/// Lets at most one compositor tick through per `interval`, however often the
/// event loop wakes up.
#[derive(Debug)]
pub struct TickPacer {
    interval: Duration,
    last: Option<Instant>,
}

impl TickPacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether a tick is due at `now`, and when the loop should wake next.
    pub fn poll(&mut self, now: Instant) -> (bool, Instant) {
        match self.last {
            Some(last) if now < last + self.interval => (false, last + self.interval),
            _ => {
                self.last = Some(now);
                (true, now + self.interval)
            }
        }
    }
}

pub struct WallApp {
    config: WallConfig,
    registry: StreamRegistry,
    router: FocusRouter,
    compositor: Compositor,
    preview: AudioPreview,
    pacer: TickPacer,
    surface: Option<WindowSurface>,
    cursor: (f64, f64),
    fatal: Option<anyhow::Error>,
    shut_down: bool,
}

impl WallApp {
    pub fn new(config: WallConfig, registry: StreamRegistry) -> Self {
        let preview = AudioPreview::new(&config.preview_player, config.preview_url.clone());
        let pacer = TickPacer::new(config.tick());
        Self {
            config,
            registry,
            router: FocusRouter::new(),
            compositor: Compositor::new(),
            preview,
            pacer,
            surface: None,
            cursor: (0.0, 0.0),
            fatal: None,
            shut_down: false,
        }
    }

    /// Error that ended the loop, if any.
    pub fn take_fatal(&mut self) -> Option<anyhow::Error> {
        self.fatal.take()
    }

    fn create_surface(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<WindowSurface> {
        let attributes = Window::default_attributes()
            .with_title("nvr-wall")
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = event_loop
            .create_window(attributes)
            .map_err(|e| anyhow::anyhow!("failed to create window: {}", e))?;
        WindowSurface::new(Arc::new(window))
    }

    fn handle_key(&mut self, event: KeyEvent, event_loop: &ActiveEventLoop) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        match event.logical_key {
            Key::Named(NamedKey::Escape) => {
                log::info!("App: escape pressed");
                self.shutdown();
                event_loop.exit();
            }
            Key::Character(ref c) if c.eq_ignore_ascii_case("m") => {
                self.preview.toggle();
            }
            _ => {}
        }
    }

    fn handle_click(&mut self) {
        let Some(surface) = self.surface.as_ref() else {
            return;
        };
        let size = surface.window().inner_size();
        let (x, y) = self.cursor;
        self.router.on_click(
            x as u32,
            y as u32,
            size.width,
            size.height,
            self.registry.pipelines(),
        );
        surface.window().request_redraw();
    }

    fn render(&mut self) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        self.router.reconcile(self.registry.pipelines());
        if let Err(e) = self.compositor.tick(
            self.registry.pipelines(),
            self.router.maximized(),
            surface,
        ) {
            log::warn!("App: frame not presented: {:#}", e);
        }
    }

    /// Releases focus first, then the preview player, then every pipeline.
    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        log::info!("App: shutting down");
        self.router.release(self.registry.pipelines());
        self.preview.stop();
        self.registry.stop_all();
    }
}

impl ApplicationHandler for WallApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.surface.is_some() {
            return;
        }
        match self.create_surface(event_loop) {
            Ok(surface) => {
                surface.window().request_redraw();
                self.surface = Some(surface);
            }
            Err(e) => {
                self.fatal = Some(e);
                self.shutdown();
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("App: window close requested");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => self.handle_key(event, event_loop),
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = (position.x, position.y);
            }
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => self.handle_click(),
            WindowEvent::RedrawRequested => {
                if !self.shut_down {
                    self.render();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.shut_down {
            event_loop.exit();
            return;
        }
        let (due, wake) = self.pacer.poll(Instant::now());
        if due {
            if let Some(surface) = self.surface.as_ref() {
                surface.window().request_redraw();
            }
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(wake));
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(10);

    #[test]
    fn test_first_poll_is_due() {
        let mut pacer = TickPacer::new(TICK);
        let now = Instant::now();
        assert_eq!(pacer.poll(now), (true, now + TICK));
    }

    #[test]
    fn test_early_wakeups_wait_for_the_tick() {
        let mut pacer = TickPacer::new(TICK);
        let start = Instant::now();
        pacer.poll(start);

        // redraw-driven wakeups inside the interval must not tick again
        for ms in [0, 1, 5, 9] {
            let (due, wake) = pacer.poll(start + Duration::from_millis(ms));
            assert!(!due, "ticked {} ms after the last tick", ms);
            assert_eq!(wake, start + TICK);
        }

        let later = start + TICK;
        assert_eq!(pacer.poll(later), (true, later + TICK));
    }

    #[test]
    fn test_tick_rate_is_bounded() {
        let mut pacer = TickPacer::new(TICK);
        let start = Instant::now();
        // the loop spinning every 100 us for 100 ms
        let ticks = (0..1000)
            .filter(|i| pacer.poll(start + Duration::from_micros(i * 100)).0)
            .count();
        assert_eq!(ticks, 10);
    }
}
