//! In-memory decoder and audio output used by the unit tests.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{PipeError, Result},
    process::{BoxedReader, DecodeOutput, DecodeProcess, DecodeRequest, Decoder},
    sink::{AudioOutput, AudioSink, AudioSpec},
};

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[derive(Clone, Default)]
pub struct ProcessFlags {
    pub exited: Arc<AtomicBool>,
    pub killed: Arc<AtomicBool>,
}

struct ScriptedProcess {
    flags: ProcessFlags,
}

impl DecodeProcess for ScriptedProcess {
    fn kill(&mut self) -> std::io::Result<()> {
        self.flags.killed.store(true, Ordering::SeqCst);
        self.flags.exited.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        self.flags.exited.load(Ordering::SeqCst)
    }
}

/// Channels handed out for the next spawn.
pub enum Feed {
    /// Fixed bytes followed by EOF.
    Bytes(Vec<u8>),
    /// Open channel; the test keeps the writing end.
    Live(DuplexStream),
}

impl Feed {
    fn into_reader(self) -> BoxedReader {
        match self {
            Feed::Bytes(data) => Box::new(std::io::Cursor::new(data)),
            Feed::Live(stream) => Box::new(stream),
        }
    }
}

/// Open channel pair: the reader goes to the pipeline, the writer to the test.
pub fn live() -> (Feed, DuplexStream) {
    let (reader, writer) = tokio::io::duplex(64 * 1024);
    (Feed::Live(reader), writer)
}

/// Decoder that hands out scripted channels instead of spawning ffmpeg.
///
/// Spawns without a scripted video feed get an open channel whose writer is
/// kept alive by the decoder, so the pipeline just waits for data.
#[derive(Default)]
pub struct ScriptedDecoder {
    pub video: Mutex<Option<Feed>>,
    pub audio: Mutex<Option<Feed>>,
    pub diagnostics: Mutex<Option<Feed>>,
    pub flags: ProcessFlags,
    pub fail_urls: HashSet<String>,
    pub requests: Mutex<Vec<DecodeRequest>>,
    idle_writers: Mutex<Vec<DuplexStream>>,
}

impl ScriptedDecoder {
    pub fn with_video(feed: Feed) -> Self {
        let decoder = Self::default();
        *decoder.video.lock() = Some(feed);
        decoder
    }

    fn idle_feed(&self) -> Feed {
        let (feed, writer) = live();
        self.idle_writers.lock().push(writer);
        feed
    }
}

impl Decoder for ScriptedDecoder {
    fn spawn(&self, request: &DecodeRequest) -> Result<DecodeOutput> {
        if self.fail_urls.contains(&request.url) {
            return Err(PipeError::SpawnFailed {
                url: request.url.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted failure"),
            });
        }
        self.requests.lock().push(request.clone());

        let video = self.video.lock().take().unwrap_or_else(|| self.idle_feed());
        let audio = if request.audio {
            Some(self.audio.lock().take().unwrap_or_else(|| self.idle_feed()))
        } else {
            None
        };
        let diagnostics = self.diagnostics.lock().take();

        Ok(DecodeOutput {
            process: Box::new(ScriptedProcess {
                flags: self.flags.clone(),
            }),
            video: video.into_reader(),
            audio: audio.map(Feed::into_reader),
            diagnostics: diagnostics.map(Feed::into_reader),
        })
    }
}

/// Audio output that records every block written and every open/close.
#[derive(Default, Clone)]
pub struct RecordingOutput {
    pub blocks: Arc<Mutex<Vec<Bytes>>>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub unavailable: bool,
    /// Sinks accept one block, then stall like a device that stopped draining.
    pub stalled: bool,
}

impl RecordingOutput {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn stalled() -> Self {
        Self {
            stalled: true,
            ..Self::default()
        }
    }

    pub fn written(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn open_sinks(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.closed.load(Ordering::SeqCst)
    }
}

struct RecordingSink {
    blocks: Arc<Mutex<Vec<Bytes>>>,
    closed: Arc<AtomicUsize>,
    stalled: bool,
}

impl AudioSink for RecordingSink {
    fn write(&mut self, block: &[u8], cancel: &CancellationToken) -> Result<()> {
        self.blocks.lock().push(Bytes::copy_from_slice(block));
        if self.stalled {
            crate::sink::wait_for_room(|| usize::MAX, 0, cancel, Duration::from_millis(1));
        }
        Ok(())
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl AudioOutput for RecordingOutput {
    fn open(&self, _spec: AudioSpec) -> Result<Box<dyn AudioSink>> {
        if self.unavailable {
            return Err(PipeError::SinkUnavailable("no device in tests".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingSink {
            blocks: Arc::clone(&self.blocks),
            closed: Arc::clone(&self.closed),
            stalled: self.stalled,
        }))
    }
}
