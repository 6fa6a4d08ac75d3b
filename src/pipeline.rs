//! Spawning and owning the two process threads.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info};

use crate::audio_io::{AudioIoProcess, BlockIo, CallbackStats, PipelineStatus, StatusCell, Transport, Unavailable};
use crate::config::{FrameLayout, PipelineConfig};
use crate::control::{self, ControlSender, LocalizationTarget, PlaybackCommand, ProcessingControls, SeparationCommand};
use crate::error::{ControlError, PipelineError, TransportError};
use crate::frames::{FrameTransform, OverlapAdd};
use crate::handoff;
use crate::history::{HistoryReaders, HistorySet};
use crate::processing::ProcessingProcess;
use crate::signal::Terminate;

pub struct Pipeline;

impl Pipeline {
    /// Start the audio I/O and processing threads.
    ///
    /// `build_transport` runs on the audio I/O thread and receives the
    /// [`BlockIo`] its callback must drive. If it fails the pipeline keeps
    /// running with status [`PipelineStatus::Failed`] and every playback
    /// start fails.
    pub fn spawn<T, Tr, B>(config: &PipelineConfig, transform: T, build_transport: B) -> Result<PipelineHandle, PipelineError>
    where
        T: FrameTransform + 'static,
        Tr: Transport,
        B: FnOnce(BlockIo) -> Result<Tr, TransportError> + Send + 'static,
    {
        let layout = config.frame_layout()?;
        let terminate = Terminate::new();
        let capacity = config.control_queue_capacity;

        let processing_waiter = terminate.waiter();
        let audio_waiter = terminate.waiter();

        let (transport_end, compute_end) = handoff::channel(layout.block_samples(), &terminate, &processing_waiter);
        let (playback_tx, playback_rx) = control::channel(capacity, &terminate, &audio_waiter);
        let (separation_tx, separation_rx) = control::channel(capacity, &terminate, &processing_waiter);
        let (target_tx, target_rx) = control::channel(capacity, &terminate, &processing_waiter);

        let histories = HistorySet::new(config);
        let readers = histories.readers();
        let status = Arc::new(StatusCell::default());
        let stats = Arc::new(CallbackStats::default());

        let processing = ProcessingProcess::new(
            OverlapAdd::new(layout),
            transform,
            histories,
            compute_end,
            ProcessingControls {
                separation: separation_rx,
                target: target_rx,
            },
            processing_waiter,
        );
        let processing_thread = spawn_named("processing", terminate.clone(), move || processing.run())?;

        let audio_status = Arc::clone(&status);
        let stats_interval = Duration::from_millis(config.stats_interval_ms.max(1));
        let audio_thread = spawn_named("audio-io", terminate.clone(), move || {
            let io = BlockIo::new(transport_end, Arc::clone(&stats));
            match build_transport(io) {
                Ok(transport) => {
                    AudioIoProcess::new(transport, playback_rx, audio_waiter, stats, audio_status, stats_interval).run()
                }
                Err(err) => {
                    error!(%err, "audio process: failed to build transport");
                    audio_status.set(PipelineStatus::Failed);
                    AudioIoProcess::new(Unavailable(err), playback_rx, audio_waiter, stats, audio_status, stats_interval)
                        .run()
                }
            }
        });
        let audio_thread = match audio_thread {
            Ok(handle) => handle,
            Err(err) => {
                terminate.set();
                let _ = processing_thread.join();
                return Err(err);
            }
        };

        info!(?layout, latency = layout.latency_samples(), "pipeline: spawned");
        Ok(PipelineHandle {
            playback: playback_tx,
            separation: separation_tx,
            target: target_tx,
            histories: readers,
            status,
            layout,
            terminate,
            threads: vec![audio_thread, processing_thread],
        })
    }
}

/// Spawn a process thread that raises terminate if it panics, so its peer
/// is not left waiting on a handoff that will never complete.
fn spawn_named<F>(name: &'static str, terminate: Terminate, body: F) -> Result<JoinHandle<()>, PipelineError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("voiscope-{name}"))
        .spawn(move || {
            let _guard = TerminateOnPanic(terminate);
            body();
        })
        .map_err(|source| PipelineError::Spawn { name, source })
}

struct TerminateOnPanic(Terminate);

impl Drop for TerminateOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.set();
        }
    }
}

/// Owner of a running pipeline. Dropping it shuts the pipeline down.
pub struct PipelineHandle {
    playback: ControlSender<PlaybackCommand>,
    separation: ControlSender<SeparationCommand>,
    target: ControlSender<LocalizationTarget>,
    histories: HistoryReaders,
    status: Arc<StatusCell>,
    layout: FrameLayout,
    terminate: Terminate,
    threads: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Start playback, creating the stream on first use. Blocks until the
    /// audio I/O process has applied the command.
    pub fn play(&mut self) -> Result<(), ControlError<PlaybackCommand>> {
        self.playback.send(PlaybackCommand::Start)
    }

    pub fn pause(&mut self) -> Result<(), ControlError<PlaybackCommand>> {
        self.playback.send(PlaybackCommand::Stop)
    }

    pub fn playback(&mut self) -> &mut ControlSender<PlaybackCommand> {
        &mut self.playback
    }

    pub fn separation(&mut self) -> &mut ControlSender<SeparationCommand> {
        &mut self.separation
    }

    pub fn target(&mut self) -> &mut ControlSender<LocalizationTarget> {
        &mut self.target
    }

    /// Readers for every history the processing side publishes
    pub fn histories(&self) -> HistoryReaders {
        self.histories.clone()
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.get()
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Raise terminate and wait for both threads to exit.
    pub fn shutdown(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.terminate.set();
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("unnamed").to_owned();
            if handle.join().is_err() {
                error!(thread = %name, "pipeline: thread panicked");
            }
        }
        self.status.set(PipelineStatus::Terminated);
        info!("pipeline: shut down");
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.stop_threads();
    }
}
