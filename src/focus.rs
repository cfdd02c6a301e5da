use ffmpeg_pipe::Pipeline;

use crate::layout;

/// What the router needs from a pipeline.
pub trait AudioFocus {
    fn start_audio(&self);
    /// Must not return before playback has released the sink.
    fn stop_audio(&self);
    fn is_alive(&self) -> bool;
}

impl AudioFocus for Pipeline {
    fn start_audio(&self) {
        Pipeline::start_audio(self)
    }

    fn stop_audio(&self) {
        Pipeline::stop_audio(self)
    }

    fn is_alive(&self) -> bool {
        Pipeline::is_alive(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    NoFocus,
    Focused(usize),
}

/// Maximize/restore state machine. Focusing a tile maximizes it and plays its
/// audio; any click while focused stops that audio and restores the grid.
/// There is no direct switch from one tile to another.
#[derive(Debug, Default)]
pub struct FocusRouter {
    focus: Focus,
}

impl FocusRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focus(&self) -> Focus {
        self.focus
    }

    pub fn maximized(&self) -> Option<usize> {
        match self.focus {
            Focus::NoFocus => None,
            Focus::Focused(i) => Some(i),
        }
    }

    /// Handles a left click at `(px, py)` in a `width` x `height` window.
    pub fn on_click<T: AudioFocus>(
        &mut self,
        px: u32,
        py: u32,
        width: u32,
        height: u32,
        streams: &[T],
    ) -> Focus {
        match self.focus {
            Focus::Focused(_) => self.restore(streams),
            Focus::NoFocus => {
                let index = layout::hit_test(px, py, width, height, streams.len());
                match streams.get(index) {
                    Some(stream) => {
                        stream.start_audio();
                        self.focus = Focus::Focused(index);
                        log::info!("Focus: maximized tile {}", index);
                    }
                    None => log::debug!("Focus: click ({}, {}) outside any tile", px, py),
                }
            }
        }
        self.focus
    }

    /// Restores the grid when the focused pipeline has died. Returns true if
    /// the focus was dropped.
    pub fn reconcile<T: AudioFocus>(&mut self, streams: &[T]) -> bool {
        let Focus::Focused(i) = self.focus else {
            return false;
        };
        if streams.get(i).is_some_and(|s| s.is_alive()) {
            return false;
        }
        log::warn!("Focus: tile {} stopped working, restoring grid", i);
        self.restore(streams);
        true
    }

    /// Drops any focus; used on shutdown.
    pub fn release<T: AudioFocus>(&mut self, streams: &[T]) {
        if self.focus != Focus::NoFocus {
            self.restore(streams);
        }
    }

    fn restore<T: AudioFocus>(&mut self, streams: &[T]) {
        if let Focus::Focused(i) = self.focus {
            if let Some(stream) = streams.get(i) {
                stream.stop_audio();
            }
            log::info!("Focus: restored grid from tile {}", i);
        }
        self.focus = Focus::NoFocus;
    }
}
