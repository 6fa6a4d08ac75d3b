//! Synchronous request/acknowledge control channels.
//!
//! Each parameter group gets its own channel carrying a closed message
//! type. [`ControlSender::send`] queues one record, rings the receiving
//! process and blocks until that process has applied the record and set
//! the ack. The receiver only looks at its channels between blocks, so a
//! send can stall for up to one block period.
//!
//! `send` takes `&mut self` and the sender is not `Clone`, so a channel can
//! never have more than one outstanding record.

use crossbeam_utils::sync::Unparker;
use rtrb::{Consumer, Producer, PushError, RingBuffer};

use crate::error::ControlError;
use crate::signal::{Signal, Terminate, Waiter};

/// Playback control for the audio I/O process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackCommand {
    Start,
    Stop,
}

/// Model parameters handed to the transform when separation starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeparationParams {
    pub num_tdoas: usize,
    pub dictionary_size: usize,
}

/// Separation control for the processing process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeparationCommand {
    Start(SeparationParams),
    Stop,
}

/// Where to listen: a generalized Gaussian window over direction indices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalizationTarget {
    /// Centre of the window, in TDOA index units
    pub index: f32,
    /// Half-width of the window, in TDOA index units
    pub width: f32,
    /// Shape exponent; 2 is Gaussian, large values approach a boxcar
    pub shape: f32,
    /// Floor the window is lifted to, in `[0, 1]`
    pub noise_floor: f32,
}

impl LocalizationTarget {
    /// Map normalized slider positions in `[0, 1]` onto a target.
    pub fn from_sliders(num_tdoas: usize, index: f32, width: f32, shape: f32, noise_floor: f32) -> Self {
        let n = num_tdoas as f32;
        Self {
            index: index.clamp(0.0, 1.0) * n,
            width: width.clamp(0.0, 1.0) * n,
            shape: (shape.clamp(0.0, 1.0) * 10.0 - 5.0).exp(),
            noise_floor: noise_floor.clamp(0.0, 1.0),
        }
    }

    /// Evaluate `exp(-(|x - index| / width)^shape)` at each TDOA index and
    /// rescale the result to span `[noise_floor, 1]`.
    pub fn window(&self, num_tdoas: usize) -> Vec<f32> {
        let width = self.width.max(f32::EPSILON);
        let mut values: Vec<f32> = (0..num_tdoas)
            .map(|x| (-((x as f32 - self.index).abs() / width).powf(self.shape)).exp())
            .collect();

        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let range = max - min;
        for v in values.iter_mut() {
            let unit = if range > 0.0 { (*v - min) / range } else { 1.0 };
            *v = unit * (1.0 - self.noise_floor) + self.noise_floor;
        }
        values
    }
}

/// Create a channel whose records are applied by the thread owning `receiver`.
///
/// The sender gets its own waiter from `terminate` to block on the ack.
pub fn channel<M: Send>(
    capacity: usize,
    terminate: &Terminate,
    receiver: &Waiter,
) -> (ControlSender<M>, ControlReceiver<M>) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    let waiter = terminate.waiter();
    let ack = waiter.signal();

    let sender = ControlSender {
        producer,
        ack: ack.clone(),
        waiter,
        doorbell: receiver.unparker(),
    };
    let receiver = ControlReceiver { consumer, ack };
    (sender, receiver)
}

/// Sending half, owned by the control surface.
pub struct ControlSender<M> {
    producer: Producer<M>,
    ack: Signal,
    waiter: Waiter,
    doorbell: Unparker,
}

impl<M: Send> ControlSender<M> {
    /// Queue `record` and block until the receiver has applied it.
    pub fn send(&mut self, record: M) -> Result<(), ControlError<M>> {
        self.ack.clear();
        self.producer
            .push(record)
            .map_err(|PushError::Full(record)| ControlError::Full(record))?;
        self.doorbell.unpark();
        self.waiter.wait(&self.ack)?;
        self.ack.clear();
        Ok(())
    }
}

/// Receiving half, polled by the owning process between blocks.
pub struct ControlReceiver<M> {
    consumer: Consumer<M>,
    ack: Signal,
}

impl<M> ControlReceiver<M> {
    /// Apply a pending record, if any, then acknowledge it.
    /// Returns whether a record was applied.
    pub fn poll(&mut self, apply: impl FnOnce(M)) -> bool {
        match self.consumer.pop() {
            Ok(record) => {
                apply(record);
                self.ack.set();
                true
            }
            Err(_) => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.consumer.is_empty()
    }
}

/// Control records arriving at the processing process.
pub(crate) struct ProcessingControls {
    pub separation: ControlReceiver<SeparationCommand>,
    pub target: ControlReceiver<LocalizationTarget>,
}
