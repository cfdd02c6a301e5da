use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    runtime::Handle,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    audio_queue::AudioQueue,
    error::{PipeError, Result},
    frame::{FrameSlot, PixelFormat, VideoFrame},
    probe::SourceDescriptor,
    process::{AUDIO_BLOCK_BYTES, BoxedReader, DecodeProcess, DecodeRequest, Decoder},
    sink::{AudioOutput, AudioSpec},
};

/// Consecutive short reads tolerated before a video reader gives up.
pub const MAX_SHORT_READS: u32 = 10;

/// Settings threaded into every pipeline at construction.
#[derive(Debug, Clone)]
pub struct PipeSettings {
    pub pixel_format: PixelFormat,
    /// Forward decoder diagnostics to the log.
    pub debug: bool,
    /// Allow audio for sources that carry it.
    pub audio: bool,
    pub probe_timeout: Duration,
    /// Back-off used by readers and the playback task when idle.
    pub poll_interval: Duration,
}

impl Default for PipeSettings {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Rgb24,
            debug: false,
            audio: true,
            probe_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(10),
        }
    }
}

struct Playback {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One source's decode process and its buffers.
///
/// Background work runs on the tokio runtime passed to [`Pipeline::start`]; the
/// blocking methods (`stop_audio`, `stop`) wait on it with `block_on` and must
/// be called from outside the runtime, i.e. from the control thread.
pub struct Pipeline {
    descriptor: SourceDescriptor,
    runtime: Handle,
    cancel: CancellationToken,
    stopped: AtomicBool,
    process: Mutex<Box<dyn DecodeProcess>>,
    frames: Arc<FrameSlot>,
    reader_alive: Arc<AtomicBool>,
    audio_queue: Arc<AudioQueue>,
    audio_active: Arc<AtomicBool>,
    playback: Mutex<Option<Playback>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    output: Arc<dyn AudioOutput>,
    poll_interval: Duration,
}

impl Pipeline {
    /// Spawns the decode process and its reader tasks.
    pub fn start(
        runtime: &Handle,
        descriptor: SourceDescriptor,
        decoder: &dyn Decoder,
        output: Arc<dyn AudioOutput>,
        settings: &PipeSettings,
    ) -> Result<Self> {
        let _guard = runtime.enter();

        let request = DecodeRequest::new(&descriptor, settings.pixel_format, settings.debug);
        let decoded = decoder.spawn(&request)?;

        log::info!(
            "Pipeline: started {} ({}x{}, audio={})",
            descriptor.url,
            descriptor.width,
            descriptor.height,
            descriptor.has_audio
        );

        let cancel = CancellationToken::new();
        let frames = Arc::new(FrameSlot::new());
        let reader_alive = Arc::new(AtomicBool::new(true));
        let audio_queue = Arc::new(AudioQueue::new());

        let mut tasks = Vec::new();
        tasks.push(runtime.spawn(read_video(
            decoded.video,
            VideoTarget {
                url: descriptor.url.clone(),
                width: descriptor.width,
                height: descriptor.height,
                format: settings.pixel_format,
                frames: Arc::clone(&frames),
                alive: Arc::clone(&reader_alive),
            },
            cancel.clone(),
            settings.poll_interval,
        )));

        if descriptor.has_audio {
            match decoded.audio {
                Some(audio) => tasks.push(runtime.spawn(read_audio(
                    audio,
                    Arc::clone(&audio_queue),
                    descriptor.url.clone(),
                    cancel.clone(),
                    settings.poll_interval,
                ))),
                None => log::warn!("Pipeline: {} has no audio channel", descriptor.url),
            }
        }

        if let Some(diagnostics) = decoded.diagnostics {
            tasks.push(runtime.spawn(drain_log(
                diagnostics,
                descriptor.url.clone(),
                settings.debug,
                cancel.clone(),
            )));
        }

        Ok(Self {
            descriptor,
            runtime: runtime.clone(),
            cancel,
            stopped: AtomicBool::new(false),
            process: Mutex::new(decoded.process),
            frames,
            reader_alive,
            audio_queue,
            audio_active: Arc::new(AtomicBool::new(false)),
            playback: Mutex::new(None),
            tasks: Mutex::new(tasks),
            output,
            poll_interval: settings.poll_interval,
        })
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    pub fn url(&self) -> &str {
        &self.descriptor.url
    }

    /// Non-blocking snapshot of the most recent decoded frame.
    pub fn latest_frame(&self) -> Option<VideoFrame> {
        self.frames.latest()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames.published()
    }

    /// Process running and video reader still reading.
    pub fn is_alive(&self) -> bool {
        if self.cancel.is_cancelled() || !self.reader_alive.load(Ordering::Relaxed) {
            return false;
        }
        let _guard = self.runtime.enter();
        !self.process.lock().has_exited()
    }

    /// Alive and has produced at least one frame.
    pub fn is_working(&self) -> bool {
        self.frames.published() > 0 && self.is_alive()
    }

    pub fn audio_enabled(&self) -> bool {
        self.descriptor.has_audio
    }

    pub fn is_audio_active(&self) -> bool {
        self.audio_active.load(Ordering::SeqCst)
    }

    pub fn audio_queue_len(&self) -> usize {
        self.audio_queue.len()
    }

    /// Starts playing this source's audio. No-op for sources without audio,
    /// when already playing, or after `stop`. The active flag drops back to
    /// false on its own if the sink cannot be opened or fails mid-stream.
    pub fn start_audio(&self) {
        if !self.descriptor.has_audio || self.cancel.is_cancelled() {
            return;
        }

        let mut playback = self.playback.lock();
        if playback.is_some() {
            return;
        }

        // blocks queued before focus are stale
        self.audio_queue.clear();

        let cancel = self.cancel.child_token();
        self.audio_active.store(true, Ordering::SeqCst);
        let handle = self.runtime.spawn_blocking({
            let cancel = cancel.clone();
            let output = Arc::clone(&self.output);
            let queue = Arc::clone(&self.audio_queue);
            let active = Arc::clone(&self.audio_active);
            let url = self.descriptor.url.clone();
            let poll = self.poll_interval;
            move || {
                play_audio(output, queue, url, cancel, poll);
                active.store(false, Ordering::SeqCst);
            }
        });

        *playback = Some(Playback { cancel, handle });
        log::info!("Pipeline: audio on for {}", self.descriptor.url);
    }

    /// Stops playback and blocks until the playback task has released the sink.
    pub fn stop_audio(&self) {
        let playback = self.playback.lock().take();
        if let Some(playback) = playback {
            playback.cancel.cancel();
            if let Err(e) = self.runtime.block_on(playback.handle) {
                log::warn!(
                    "Pipeline: audio task for {} failed: {}",
                    self.descriptor.url,
                    e
                );
            }
            log::info!("Pipeline: audio off for {}", self.descriptor.url);
        }
        self.audio_active.store(false, Ordering::SeqCst);
    }

    /// Stops audio, kills the process and joins every owned task. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        log::info!("Pipeline: stopping {}", self.descriptor.url);
        self.cancel.cancel();
        self.stop_audio();

        {
            let _guard = self.runtime.enter();
            if let Err(e) = self.process.lock().kill() {
                log::warn!(
                    "Pipeline: failed to kill decoder for {}: {}",
                    self.descriptor.url,
                    e
                );
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        self.runtime.block_on(async {
            for h in tasks {
                let _ = h.await;
            }
        });

        self.audio_queue.clear();
        self.reader_alive.store(false, Ordering::Relaxed);
        log::info!("Pipeline: stopped {}", self.descriptor.url);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // non-blocking teardown; `stop` is the orderly path
        self.cancel.cancel();
        if let Some(playback) = self.playback.get_mut().take() {
            playback.cancel.cancel();
        }
        let _ = self.process.get_mut().kill();
    }
}

struct VideoTarget {
    url: String,
    width: u32,
    height: u32,
    format: PixelFormat,
    frames: Arc<FrameSlot>,
    alive: Arc<AtomicBool>,
}

/// Fills `buf` completely or reports how far it got.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                PipeError::ProcessExited
            } else {
                PipeError::ShortRead {
                    expected: buf.len(),
                    got: filled,
                }
            });
        }
        filled += n;
    }
    Ok(())
}

/// Sleeps for `delay`; returns false if cancelled first.
async fn idle(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn read_video(
    mut reader: BoxedReader,
    target: VideoTarget,
    cancel: CancellationToken,
    poll: Duration,
) {
    let frame_len = VideoFrame::byte_len(target.width, target.height);
    let mut short_reads = 0u32;
    let mut seq = 0u64;

    loop {
        let mut buf = vec![0u8; frame_len];
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = read_full(&mut reader, &mut buf) => r,
        };

        match result {
            Ok(()) => {
                short_reads = 0;
                seq += 1;
                target.frames.publish(VideoFrame {
                    data: Bytes::from(buf),
                    width: target.width,
                    height: target.height,
                    format: target.format,
                    seq,
                });
            }
            Err(e) => {
                short_reads += 1;
                log::debug!(
                    "Pipeline: {} video read failed ({}/{}): {}",
                    target.url,
                    short_reads,
                    MAX_SHORT_READS,
                    e
                );
                if short_reads >= MAX_SHORT_READS {
                    log::warn!(
                        "Pipeline: {} gave up after {} consecutive short reads",
                        target.url,
                        short_reads
                    );
                    break;
                }
                if !idle(&cancel, poll).await {
                    break;
                }
            }
        }
    }

    target.alive.store(false, Ordering::Relaxed);
    log::debug!("Pipeline: {} video reader exited after {} frames", target.url, seq);
}

async fn read_audio(
    mut reader: BoxedReader,
    queue: Arc<AudioQueue>,
    url: String,
    cancel: CancellationToken,
    poll: Duration,
) {
    let mut dropped = 0u64;

    loop {
        let mut buf = vec![0u8; AUDIO_BLOCK_BYTES];
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = read_full(&mut reader, &mut buf) => r,
        };

        match result {
            Ok(()) => {
                if queue.push(Bytes::from(buf)).is_some() {
                    dropped += 1;
                }
            }
            Err(PipeError::ProcessExited) => {
                if !idle(&cancel, poll).await {
                    break;
                }
            }
            Err(e) => {
                log::debug!("Pipeline: {} audio read failed: {}", url, e);
                if !idle(&cancel, poll).await {
                    break;
                }
            }
        }
    }

    log::debug!(
        "Pipeline: {} audio reader exited, {} blocks dropped on overflow",
        url,
        dropped
    );
}

/// Keeps the diagnostic pipe empty so the decoder never blocks on it.
async fn drain_log(reader: BoxedReader, url: String, debug: bool, cancel: CancellationToken) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = reader.read_until(b'\n', &mut line) => r,
        };

        match result {
            Ok(0) => break,
            Ok(_) => {
                if debug {
                    let text = String::from_utf8_lossy(&line);
                    log::debug!("[{}] {}", url, text.trim_end());
                }
            }
            Err(e) => {
                log::debug!("Pipeline: {} log drain failed: {}", url, e);
                break;
            }
        }
    }
}

fn play_audio(
    output: Arc<dyn AudioOutput>,
    queue: Arc<AudioQueue>,
    url: String,
    cancel: CancellationToken,
    poll: Duration,
) {
    let mut sink = match output.open(AudioSpec::default()) {
        Ok(sink) => sink,
        Err(e) => {
            log::warn!("Pipeline: no audio for {}: {}", url, e);
            return;
        }
    };

    while !cancel.is_cancelled() {
        match queue.pop() {
            Some(block) => {
                if let Err(e) = sink.write(&block, &cancel) {
                    log::warn!("Pipeline: audio write for {} failed: {}", url, e);
                    break;
                }
            }
            None => std::thread::sleep(poll),
        }
    }

    drop(sink);
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
