//! Error taxonomy for a streaming session

use crate::config::ConfigError;
use crate::media::MediaError;
use crate::pipeline::watchdog::WatchdogError;
use crate::utils::net::HostError;

/// Convenience result type used across the streamer.
pub type StreamerResult<T> = Result<T, StreamerError>;

/// Where in the session a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configure,
    OpenInput,
    ProbeStream,
    OpenDecoder,
    AllocOutput,
    OpenEncoder,
    OpenSink,
    WriteHeader,
    BuildFilter,
    AllocPacket,
    Decode,
    Filter,
    Encode,
    Write,
    WriteTrailer,
    CloseSink,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Configure => "configure media library",
            Stage::OpenInput => "open input",
            Stage::ProbeStream => "probe stream",
            Stage::OpenDecoder => "open decoder",
            Stage::AllocOutput => "allocate output",
            Stage::OpenEncoder => "open encoder",
            Stage::OpenSink => "open sink",
            Stage::WriteHeader => "write header",
            Stage::BuildFilter => "build filter graph",
            Stage::AllocPacket => "allocate packet",
            Stage::Decode => "decode",
            Stage::Filter => "filter",
            Stage::Encode => "encode",
            Stage::Write => "write packet",
            Stage::WriteTrailer => "write trailer",
            Stage::CloseSink => "close sink",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Top-level error taxonomy of a session.
#[derive(thiserror::Error, Debug)]
pub enum StreamerError {
    /// Configuration rejected before any native resource was touched.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The stream does not satisfy the fixed capture policy.
    #[error("policy violation: {0}")]
    Policy(String),

    /// The output host could not be validated.
    #[error("invalid output host: {0}")]
    Host(#[from] HostError),

    /// A media library call failed.
    #[error("{stage} failed: {source}")]
    Media {
        stage: Stage,
        #[source]
        source: MediaError,
    },

    /// A network call failed after the watchdog interrupted it.
    #[error("{stage} interrupted by watchdog: {source}")]
    Watchdog {
        stage: Stage,
        #[source]
        source: MediaError,
    },

    /// Registering the watchdog failed.
    #[error(transparent)]
    Registry(#[from] WatchdogError),

    /// `setup` was called while a graph is still held.
    #[error("pipeline is already set up")]
    AlreadySetUp,

    /// `process` was called without a successful `setup`.
    #[error("pipeline is not set up")]
    NotSetUp,

    /// Inconsistent internal state (missing handle, double acquisition).
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl StreamerError {
    pub fn media(stage: Stage, source: MediaError) -> Self {
        Self::Media { stage, source }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    pub fn policy(msg: impl Into<String>) -> Self {
        Self::Policy(msg.into())
    }

    /// Classify a failed network call by whether the watchdog fired during it.
    pub fn network(stage: Stage, source: MediaError, timed_out: bool) -> Self {
        if timed_out {
            Self::Watchdog { stage, source }
        } else {
            Self::Media { stage, source }
        }
    }

    pub fn is_watchdog(&self) -> bool {
        matches!(self, StreamerError::Watchdog { .. })
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            StreamerError::Media { stage, .. } | StreamerError::Watchdog { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }
}
