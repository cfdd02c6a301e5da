use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};

use crate::error::{PipeError, Result};
use crate::process::{AUDIO_CHANNELS, AUDIO_FRAMES_PER_BLOCK, AUDIO_SAMPLE_RATE};

/// Parameters the playback device is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_block: usize,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            sample_rate: AUDIO_SAMPLE_RATE,
            channels: AUDIO_CHANNELS,
            frames_per_block: AUDIO_FRAMES_PER_BLOCK,
        }
    }
}

/// An open playback device. Dropping it closes the device.
pub trait AudioSink {
    /// Plays one block of interleaved s16le PCM. May block to pace the caller,
    /// but returns promptly once `cancel` fires.
    fn write(&mut self, block: &[u8], cancel: &CancellationToken) -> Result<()>;
}

/// Opens playback devices. `open` runs on the playback thread, and the returned
/// sink never leaves it, so sinks need not be `Send`.
pub trait AudioOutput: Send + Sync {
    fn open(&self, spec: AudioSpec) -> Result<Box<dyn AudioSink>>;
}

/// Default system output through rodio.
#[derive(Debug, Default, Clone)]
pub struct RodioOutput;

/// Appended blocks allowed to wait in the rodio sink before `write` blocks.
const MAX_PENDING_BLOCKS: usize = 3;
const PENDING_POLL: Duration = Duration::from_millis(5);

impl AudioOutput for RodioOutput {
    fn open(&self, spec: AudioSpec) -> Result<Box<dyn AudioSink>> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| PipeError::SinkUnavailable(e.to_string()))?;
        let sink = Sink::try_new(&handle).map_err(|e| PipeError::SinkUnavailable(e.to_string()))?;
        sink.play();
        Ok(Box::new(RodioSink {
            _stream: stream,
            sink,
            spec,
        }))
    }
}

struct RodioSink {
    // must outlive the sink or playback stops
    _stream: OutputStream,
    sink: Sink,
    spec: AudioSpec,
}

impl AudioSink for RodioSink {
    fn write(&mut self, block: &[u8], cancel: &CancellationToken) -> Result<()> {
        let samples = pcm_s16le_to_samples(block);
        self.sink.append(SamplesBuffer::new(
            self.spec.channels,
            self.spec.sample_rate,
            samples,
        ));
        let sink = &self.sink;
        wait_for_room(|| sink.len(), MAX_PENDING_BLOCKS, cancel, PENDING_POLL);
        Ok(())
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        self.sink.stop();
    }
}

/// Sleeps until at most `max_pending` blocks are queued. Returns false when
/// cancelled first.
pub fn wait_for_room(
    pending: impl Fn() -> usize,
    max_pending: usize,
    cancel: &CancellationToken,
    poll: Duration,
) -> bool {
    while pending() > max_pending {
        if cancel.is_cancelled() {
            return false;
        }
        std::thread::sleep(poll);
    }
    true
}

/// Decodes interleaved little-endian 16-bit PCM. A trailing odd byte is ignored.
pub fn pcm_s16le_to_samples(block: &[u8]) -> Vec<i16> {
    block
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}
