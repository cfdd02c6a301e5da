//! Per-source decode pipelines backed by external `ffprobe` / `ffmpeg`
//! processes: probing, raw frame and PCM readers, the latest-frame slot, the
//! bounded audio queue and audio playback.

pub mod audio_queue;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod probe;
pub mod process;
pub mod registry;
pub mod sink;

#[cfg(test)]
mod test_support;

pub use error::{PipeError, Result};
pub use frame::{PixelFormat, VideoFrame};
pub use pipeline::{PipeSettings, Pipeline};
pub use probe::{Ffprobe, MediaInfo, Probe, SourceDescriptor};
pub use process::{Decoder, Ffmpeg};
pub use registry::StreamRegistry;
pub use sink::{AudioOutput, RodioOutput};
