//! Voiscope - real-time substrate for live source separation
//!
//! Design principles:
//! - Two process threads: audio I/O (device callback) and processing
//! - Exactly one block handoff outstanding; request and done strictly alternate
//! - Control records are applied between blocks and acknowledged synchronously
//! - Display histories have one writer and any number of lock-free readers
//! - One shared terminate flag wakes every blocking wait
//!
//! ```no_run
//! use ndarray::{Array3, ArrayView3};
//! use voiscope::{Pipeline, PipelineConfig, Transport, TransportError};
//!
//! struct Silent;
//!
//! impl Transport for Silent {
//!     fn start(&mut self) -> Result<(), TransportError> { Ok(()) }
//!     fn stop(&mut self) -> Result<(), TransportError> { Ok(()) }
//!     fn is_active(&self) -> bool { false }
//! }
//!
//! let config = PipelineConfig::default();
//! let halve = |frames: ArrayView3<'_, f32>| -> Array3<f32> { frames.mapv(|x| x * 0.5) };
//! let mut pipeline = Pipeline::spawn(&config, halve, |_io| Ok(Silent)).unwrap();
//! pipeline.play().unwrap();
//! pipeline.shutdown();
//! ```

pub mod audio_io;
pub mod config;
pub mod control;
pub mod error;
pub mod frames;
pub mod handoff;
pub mod history;
pub mod pcm;
mod pipeline;
mod processing;
pub mod signal;

#[cfg(feature = "cpal_io")]
pub mod device;

pub use audio_io::{BlockIo, CallbackStats, PipelineStatus, StatsSnapshot, Transport};
pub use config::{FrameLayout, PipelineConfig};
pub use control::{ControlReceiver, ControlSender, LocalizationTarget, PlaybackCommand, SeparationCommand, SeparationParams};
pub use error::{ConfigError, ControlError, FrameError, PipelineError, Terminated, TransportError};
pub use frames::{FrameTransform, Identity, OverlapAdd};
pub use history::{HistoryBuffer, HistoryReader, HistoryReaders, HistorySet};
pub use pipeline::{Pipeline, PipelineHandle};
pub use signal::{Signal, Terminate, Waiter};
