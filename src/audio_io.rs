//! The audio I/O process.
//!
//! [`BlockIo`] is what runs inside the device callback: decode a block of
//! PCM, hand it to the processing side, peak-limit and encode the result.
//! [`Transport`] is the seam to the device binding. [`AudioIoProcess`] is
//! the idle loop that owns the transport, applies playback commands and
//! reports callback timing.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::control::{ControlReceiver, PlaybackCommand};
use crate::error::{Terminated, TransportError};
use crate::handoff::TransportEnd;
use crate::pcm;
use crate::signal::Waiter;

/// Everything the device callback needs for one block.
pub struct BlockIo {
    handoff: TransportEnd,
    input: Vec<f32>,
    output: Vec<f32>,
    stats: Arc<CallbackStats>,
}

impl BlockIo {
    pub fn new(handoff: TransportEnd, stats: Arc<CallbackStats>) -> Self {
        let n = handoff.block_samples();
        Self {
            handoff,
            input: vec![0.0; n],
            output: vec![0.0; n],
            stats,
        }
    }

    /// Interleaved samples per block
    pub fn block_samples(&self) -> usize {
        self.input.len()
    }

    /// Process one block of 16-bit PCM. Missing input is treated as silence.
    pub fn process_block(&mut self, input: &[i16], output: &mut [i16]) -> Result<(), Terminated> {
        let started = Instant::now();
        self.input.fill(0.0);
        pcm::decode(input, &mut self.input);
        self.exchange()?;
        pcm::encode(&self.output, output);
        self.stats.record(started.elapsed());
        Ok(())
    }

    /// Process one block of raw little-endian 16-bit PCM bytes.
    pub fn process_bytes(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), Terminated> {
        let started = Instant::now();
        self.input.fill(0.0);
        pcm::decode_bytes(input, &mut self.input);
        self.exchange()?;
        pcm::encode_bytes(&self.output, output);
        self.stats.record(started.elapsed());
        Ok(())
    }

    fn exchange(&mut self) -> Result<(), Terminated> {
        let dropped = self.handoff.dropped();
        self.handoff.exchange(&self.input, &mut self.output)?;
        if self.handoff.dropped() != dropped {
            self.stats.record_dropped();
        }
        pcm::peak_limit(&mut self.output);
        Ok(())
    }

    pub fn handoff(&self) -> &TransportEnd {
        &self.handoff
    }
}

/// Min/max/mean callback processing time, gathered without locks.
#[derive(Debug)]
pub struct CallbackStats {
    count: AtomicU64,
    total_ns: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
    dropped: AtomicU64,
}

impl Default for CallbackStats {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }
}

/// One report window of [`CallbackStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub count: u64,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    /// Blocks answered with silence because no exchange took place
    pub dropped: u64,
}

impl CallbackStats {
    #[inline]
    pub fn record(&self, elapsed: Duration) {
        let ns = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.min_ns.fetch_min(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Take the current window and start a new one.
    /// Returns `None` if nothing was recorded.
    pub fn take(&self) -> Option<StatsSnapshot> {
        let count = self.count.swap(0, Ordering::Relaxed);
        let total = self.total_ns.swap(0, Ordering::Relaxed);
        let min = self.min_ns.swap(u64::MAX, Ordering::Relaxed);
        let max = self.max_ns.swap(0, Ordering::Relaxed);
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        Some(StatsSnapshot {
            count,
            min: Duration::from_nanos(min.min(max)),
            max: Duration::from_nanos(max),
            mean: Duration::from_nanos(total / count),
            dropped,
        })
    }
}

/// A device binding that drives a [`BlockIo`] from its callback.
///
/// The binding owns the `BlockIo` it was built with and lives on the audio
/// I/O thread, so it need not be `Send`. `start` creates the stream on
/// first use and (re)starts it; `stop` pauses it.
pub trait Transport {
    fn start(&mut self) -> Result<(), TransportError>;

    fn stop(&mut self) -> Result<(), TransportError>;

    fn is_active(&self) -> bool;

    /// Error raised by the stream since the last call, if any
    fn take_error(&mut self) -> Option<TransportError> {
        None
    }
}

/// Stand-in for a transport that could not be built. Every start fails
/// with the build error.
pub(crate) struct Unavailable(pub TransportError);

impl Transport for Unavailable {
    fn start(&mut self) -> Result<(), TransportError> {
        Err(self.0.clone())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_active(&self) -> bool {
        false
    }
}

/// Observable state of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineStatus {
    Idle = 0,
    Running = 1,
    Stopped = 2,
    Failed = 3,
    Terminated = 4,
}

/// Shared cell holding a [`PipelineStatus`].
#[derive(Debug, Default)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn get(&self) -> PipelineStatus {
        match self.0.load(Ordering::Acquire) {
            0 => PipelineStatus::Idle,
            1 => PipelineStatus::Running,
            2 => PipelineStatus::Stopped,
            3 => PipelineStatus::Failed,
            _ => PipelineStatus::Terminated,
        }
    }

    pub fn set(&self, status: PipelineStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// Idle loop of the audio I/O process.
pub struct AudioIoProcess<T: Transport> {
    transport: T,
    playback: ControlReceiver<PlaybackCommand>,
    waiter: Waiter,
    stats: Arc<CallbackStats>,
    status: Arc<StatusCell>,
    stats_interval: Duration,
}

impl<T: Transport> AudioIoProcess<T> {
    pub fn new(
        transport: T,
        playback: ControlReceiver<PlaybackCommand>,
        waiter: Waiter,
        stats: Arc<CallbackStats>,
        status: Arc<StatusCell>,
        stats_interval: Duration,
    ) -> Self {
        Self {
            transport,
            playback,
            waiter,
            stats,
            status,
            stats_interval,
        }
    }

    /// Run until terminated. Stops the stream on the way out.
    pub fn run(mut self) {
        info!("audio process: started");
        let mut last_report = Instant::now();

        loop {
            if self.waiter.terminated() {
                debug!("audio process: received terminate");
                break;
            }

            let transport = &mut self.transport;
            let status = &self.status;
            let applied = self.playback.poll(|command| {
                debug!(?command, "audio process: received playback command");
                let result = match command {
                    PlaybackCommand::Start => transport.start().map(|_| PipelineStatus::Running),
                    PlaybackCommand::Stop => transport.stop().map(|_| PipelineStatus::Stopped),
                };
                match result {
                    Ok(next) => status.set(next),
                    Err(err) => {
                        error!(%err, "audio process: playback command failed");
                        status.set(PipelineStatus::Failed);
                    }
                }
            });
            if applied {
                debug!("audio process: ack set");
                continue;
            }

            if let Some(err) = self.transport.take_error() {
                error!(%err, "audio process: transport error, stopping stream");
                let _ = self.transport.stop();
                self.status.set(PipelineStatus::Failed);
            }

            let elapsed = last_report.elapsed();
            if elapsed >= self.stats_interval {
                if let Some(s) = self.stats.take() {
                    info!(
                        blocks = s.count,
                        min_us = s.min.as_micros() as u64,
                        max_us = s.max.as_micros() as u64,
                        mean_us = s.mean.as_micros() as u64,
                        "processing times"
                    );
                    if s.dropped > 0 {
                        warn!(dropped = s.dropped, "audio process: blocks replaced by silence");
                    }
                }
                last_report = Instant::now();
                continue;
            }

            if self.waiter.park_timeout(self.stats_interval - elapsed).is_err() {
                debug!("audio process: received terminate");
                break;
            }
        }

        if self.transport.is_active() {
            if let Err(err) = self.transport.stop() {
                error!(%err, "audio process: failed to stop stream");
            } else {
                debug!("audio process: stream stopped");
            }
        }
        self.status.set(PipelineStatus::Terminated);
        info!("audio process: exited");
    }
}
