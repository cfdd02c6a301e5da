use std::io;

/// Failures of a single source. None of these are fatal for the wall as a
/// whole: the registry simply ends up rendering fewer tiles.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// Probe errored or timed out; the source is excluded for the session.
    #[error("probe failed for {url}: {reason}")]
    ProbeFailed { url: String, reason: String },

    /// The decode process could not be started.
    #[error("failed to spawn decoder for {url}: {source}")]
    SpawnFailed {
        url: String,
        #[source]
        source: io::Error,
    },

    /// Fewer bytes than a whole frame/block were available.
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// The decode process closed its output channel.
    #[error("decode process exited")]
    ProcessExited,

    /// No audio device could be opened; playback fails closed.
    #[error("audio sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, PipeError>;
