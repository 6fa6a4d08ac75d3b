//! The processing process.
//!
//! Owns the overlap-add engine, the frame transform and the writing side
//! of the history set. Between blocks it applies pending control records;
//! when the audio side requests a handoff it runs one cycle and publishes.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::control::{ProcessingControls, SeparationCommand};
use crate::frames::{FrameTransform, OverlapAdd};
use crate::handoff::ComputeEnd;
use crate::history::HistorySet;
use crate::signal::Waiter;

/// Longest time the loop sleeps without re-checking its inputs.
/// Requests and control records wake it early.
const IDLE_PARK: Duration = Duration::from_millis(100);

pub struct ProcessingProcess<T: FrameTransform> {
    engine: OverlapAdd,
    transform: T,
    histories: HistorySet,
    compute: ComputeEnd,
    controls: ProcessingControls,
    waiter: Waiter,
    failed_cycles: u64,
}

impl<T: FrameTransform> ProcessingProcess<T> {
    pub(crate) fn new(
        engine: OverlapAdd,
        transform: T,
        histories: HistorySet,
        compute: ComputeEnd,
        controls: ProcessingControls,
        waiter: Waiter,
    ) -> Self {
        Self {
            engine,
            transform,
            histories,
            compute,
            controls,
            waiter,
            failed_cycles: 0,
        }
    }

    /// Run until terminated.
    pub fn run(mut self) {
        info!(layout = ?self.engine.layout(), "processing process: started");

        loop {
            if self.waiter.terminated() {
                debug!("processing process: received terminate");
                break;
            }

            self.apply_controls();

            if self.step() {
                continue;
            }

            if self.waiter.park_timeout(IDLE_PARK).is_err() {
                debug!("processing process: received terminate");
                break;
            }
        }

        if self.failed_cycles > 0 {
            warn!(failed = self.failed_cycles, "processing process: cycles dropped");
        }
        info!(cycles = self.compute.cycles(), "processing process: exited");
    }

    fn apply_controls(&mut self) {
        let transform = &mut self.transform;
        let engine = &mut self.engine;
        let applied = self.controls.separation.poll(|command| match command {
            SeparationCommand::Start(params) => {
                debug!(?params, "processing process: separation started");
                engine.reset();
                transform.start(&params);
            }
            SeparationCommand::Stop => {
                debug!("processing process: separation stopped");
                transform.stop();
            }
        });
        if applied {
            debug!("processing process: ack set");
        }

        let applied = self.controls.target.poll(|target| {
            debug!(?target, "processing process: localization target updated");
            transform.set_target(&target);
        });
        if applied {
            debug!("processing process: ack set");
        }
    }

    /// Serve one pending handoff. Returns whether a block was served.
    fn step(&mut self) -> bool {
        let engine = &mut self.engine;
        let transform = &mut self.transform;
        let mut outcome = Ok(());
        let served = self.compute.try_serve(|input, output| {
            outcome = engine.process_frames(input, output, transform);
        });
        if !served {
            return false;
        }

        match outcome {
            Ok(()) => self.transform.publish(&mut self.histories),
            Err(err) => {
                self.failed_cycles += 1;
                error!(%err, "processing process: cycle failed, emitting silence");
            }
        }
        true
    }
}
