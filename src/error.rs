//! Error types for the pipeline.
//!
//! Errors stay local to the thread that produced them. The handoff and
//! control paths only ever return [`Terminated`]; everything else is
//! reported through logs and [`PipelineStatus`](crate::PipelineStatus).

use thiserror::Error;

/// Invalid static configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A size that must be non-zero was zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Block boundaries must fall on the hop grid
    #[error("hop size {hop} does not divide block size {block}")]
    HopNotDividingBlock { hop: usize, block: usize },

    /// Every hop-grid window must be visited the same number of times
    #[error("windows per block ({windows}) x hop ({hop}) is not a multiple of block size {block}")]
    UnevenCoverage { windows: usize, hop: usize, block: usize },

    /// The hop leaves gaps between windows
    #[error("hop size {hop} exceeds window size {window}")]
    HopExceedsWindow { hop: usize, window: usize },

    /// The K windows of one cycle do not fit in the analysis history
    #[error("window span of {span} samples exceeds analysis history of {history} samples")]
    SpanExceedsHistory { span: usize, history: usize },

    /// Requested output delay cannot be honoured
    #[error("output delay of {requested} blocks is outside [{min}, {max}]")]
    OutputDelay { requested: usize, min: usize, max: usize },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Failure of a single overlap-add cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame transform returned a frame set of the wrong shape
    #[error("frame transform returned shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    /// A sample block of the wrong length was handed to the engine
    #[error("sample block has {actual} samples, expected {expected}")]
    BlockLength { expected: usize, actual: usize },
}

/// Errors raised by a device transport.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// No usable input/output device
    #[error("no audio device available: {0}")]
    NoDevice(String),

    /// Failed to build the stream
    #[error("failed to build audio stream: {0}")]
    StreamBuild(String),

    /// Failed to start or pause the stream
    #[error("failed to control audio stream: {0}")]
    StreamControl(String),

    /// Error reported by the stream while running
    #[error("audio stream error: {0}")]
    Stream(String),

    /// The device cannot deliver the sample format we need
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
}

/// Returned from blocking waits once shutdown has been requested.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("pipeline terminated")]
pub struct Terminated;

/// Errors from [`ControlSender::send`](crate::control::ControlSender::send).
#[derive(Error, Debug)]
pub enum ControlError<M> {
    /// A previous record is still queued; the record is handed back
    #[error("control channel full")]
    Full(M),

    #[error(transparent)]
    Terminated(#[from] Terminated),
}

/// Errors starting the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
